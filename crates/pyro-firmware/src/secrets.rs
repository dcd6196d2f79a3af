//! Device secrets baked in at build time
//!
//! `build.rs` turns `.env` into the constants included below. See
//! `.env.example` for the variable names.

use pyro_core::config::{Config, ConfigError, KnownNetwork, NetworkConfig, TelemetryConfig};

include!(concat!(env!("OUT_DIR"), "/secrets.rs"));

/// Assemble and validate the device configuration.
pub fn device_config() -> Result<Config<'static>, ConfigError> {
    let mut telemetry = TelemetryConfig {
        access_token: ACCESS_TOKEN,
        transport: TELEMETRY_TRANSPORT.parse()?,
        encrypted: TELEMETRY_ENCRYPTED,
        ..Default::default()
    };
    if let Some(host) = TELEMETRY_HOST {
        telemetry.host = host;
    }

    let config = Config {
        network: NetworkConfig::from_networks(KNOWN_NETWORKS)?,
        telemetry,
        timing: Default::default(),
    };
    config.validate()?;
    Ok(config)
}
