//! Device configuration
//!
//! Everything the device needs to know about its environment lives here:
//! which WiFi networks it may join, where telemetry goes, and the timing of
//! the control loop. The firmware assembles a [`Config`] at startup from
//! build-time secrets; the simulator builds one in code.

use core::str::FromStr;

use embassy_time::Duration;
use heapless::Vec;
use serde::{Deserialize, Serialize};
use thiserror_no_std::Error;

use crate::telemetry::mqtt;

/// Maximum number of entries in the known-network list
pub const MAX_KNOWN_NETWORKS: usize = 8;

/// ThingsBoard demo server used when no host is configured
pub const DEFAULT_TELEMETRY_HOST: &str = "demo.thingsboard.io";

/// MQTT client identifier used when none is configured
pub const DEFAULT_CLIENT_ID: &str = "pyro";

/// Largest packet the telemetry session will ever build or accept
pub const DEFAULT_MAX_MESSAGE_SIZE: u16 = 128;

#[derive(Serialize, Deserialize, Debug, Default)]
#[serde(bound(deserialize = "'de: 'a"))]
pub struct Config<'a> {
    pub network: NetworkConfig<'a>,
    pub telemetry: TelemetryConfig<'a>,
    pub timing: TimingConfig,
}

/// A wireless network the device is permitted to associate with.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct KnownNetwork<'a> {
    pub ssid: &'a str,
    pub passphrase: &'a str,
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(bound(deserialize = "'de: 'a"))]
pub struct NetworkConfig<'a> {
    /// Candidate networks. Scan results are matched against this list.
    pub known_networks: Vec<KnownNetwork<'a>, MAX_KNOWN_NETWORKS>,
    /// Minimum time between two association attempts
    pub check_interval_ms: u64,
}

impl Default for NetworkConfig<'_> {
    fn default() -> Self {
        Self {
            known_networks: Vec::new(),
            check_interval_ms: 30_000,
        }
    }
}

impl<'a> NetworkConfig<'a> {
    /// Build a network config from a static credential table.
    ///
    /// Entries past [`MAX_KNOWN_NETWORKS`] are rejected rather than dropped.
    pub fn from_networks(networks: &[KnownNetwork<'a>]) -> Result<Self, ConfigError> {
        let known_networks = Vec::from_slice(networks).map_err(|_| ConfigError::TooManyNetworks {
            given: networks.len(),
        })?;

        Ok(Self {
            known_networks,
            ..Default::default()
        })
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }
}

/// Session protocol used to reach the telemetry endpoint
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// Persistent MQTT session, one PUBLISH per value
    #[default]
    Mqtt,
    /// One HTTP POST per value, no session
    Http,
}

impl Transport {
    /// Well-known port for this transport
    pub const fn default_port(self, encrypted: bool) -> u16 {
        match (self, encrypted) {
            (Self::Mqtt, false) => 1883,
            (Self::Mqtt, true) => 8883,
            (Self::Http, false) => 80,
            (Self::Http, true) => 443,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Mqtt => "MQTT",
            Self::Http => "HTTP",
        }
    }
}

impl FromStr for Transport {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("mqtt") {
            Ok(Self::Mqtt)
        } else if s.eq_ignore_ascii_case("http") {
            Ok(Self::Http)
        } else {
            Err(ConfigError::UnknownTransport)
        }
    }
}

#[derive(Serialize, Deserialize, Debug)]
pub struct TelemetryConfig<'a> {
    pub host: &'a str,
    /// Explicit port; `None` picks the transport's well-known port
    pub port: Option<u16>,
    /// Per-device access token issued by the telemetry service
    pub access_token: &'a str,
    pub client_id: &'a str,
    pub transport: Transport,
    pub encrypted: bool,
    pub keep_alive_secs: u16,
    pub send_interval_ms: u64,
    pub max_message_size: u16,
}

impl Default for TelemetryConfig<'_> {
    fn default() -> Self {
        Self {
            host: DEFAULT_TELEMETRY_HOST,
            port: None,
            access_token: "",
            client_id: DEFAULT_CLIENT_ID,
            transport: Transport::Mqtt,
            encrypted: false,
            keep_alive_secs: 60,
            send_interval_ms: 10_000,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

impl TelemetryConfig<'_> {
    pub fn port(&self) -> u16 {
        self.port
            .unwrap_or_else(|| self.transport.default_port(self.encrypted))
    }

    pub fn send_interval(&self) -> Duration {
        Duration::from_millis(self.send_interval_ms)
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs as u64)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy)]
pub struct TimingConfig {
    /// Pause at the top of every control loop iteration
    pub loop_delay_ms: u64,
    /// How long a freshly drawn frame stays on the panel before the next one
    pub display_settle_ms: u64,
    /// Upper bound on the wait for the thermocouple's data-ready line
    pub sensor_ready_timeout_ms: u64,
    /// Treat a reading of exactly 0 degrees as "no data" and skip telemetry.
    ///
    /// The field device has always done this, which makes a genuine 0 °C
    /// reading indistinguishable from an uninitialized one. Turn it off once
    /// the thermocouple is known to report real zeroes.
    pub zero_reading_is_no_data: bool,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            loop_delay_ms: 10,
            display_settle_ms: 2_000,
            sensor_ready_timeout_ms: 500,
            zero_reading_is_no_data: true,
        }
    }
}

impl TimingConfig {
    pub fn loop_delay(&self) -> Duration {
        Duration::from_millis(self.loop_delay_ms)
    }

    pub fn display_settle(&self) -> Duration {
        Duration::from_millis(self.display_settle_ms)
    }

    pub fn sensor_ready_timeout(&self) -> Duration {
        Duration::from_millis(self.sensor_ready_timeout_ms)
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    #[error("telemetry host is empty")]
    EmptyHost,
    #[error("telemetry access token is missing")]
    MissingAccessToken,
    #[error("no known networks configured")]
    NoKnownNetworks,
    #[error("{given} known networks configured, at most 8 supported")]
    TooManyNetworks { given: usize },
    #[error("{0} must be greater than zero")]
    ZeroInterval(&'static str),
    #[error("max message size {configured} is below the {required} bytes a session needs")]
    MessageSizeTooSmall { configured: u16, required: usize },
    #[error("unknown telemetry transport")]
    UnknownTransport,
    #[error("encrypted telemetry requested but no TLS buffers were provided")]
    EncryptionUnavailable,
}

impl Config<'_> {
    /// Check the configuration for values the device cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let telemetry = &self.telemetry;

        if telemetry.host.is_empty() {
            return Err(ConfigError::EmptyHost);
        }
        if telemetry.access_token.is_empty() {
            return Err(ConfigError::MissingAccessToken);
        }
        if self.network.known_networks.is_empty() {
            return Err(ConfigError::NoKnownNetworks);
        }
        if self.network.check_interval_ms == 0 {
            return Err(ConfigError::ZeroInterval("WiFi check interval"));
        }
        if telemetry.send_interval_ms == 0 {
            return Err(ConfigError::ZeroInterval("telemetry send interval"));
        }
        if self.timing.sensor_ready_timeout_ms == 0 {
            return Err(ConfigError::ZeroInterval("sensor ready timeout"));
        }

        if telemetry.transport == Transport::Mqtt {
            let required = mqtt::required_buffer_len(telemetry.client_id, telemetry.access_token);
            if (telemetry.max_message_size as usize) < required {
                return Err(ConfigError::MessageSizeTooSmall {
                    configured: telemetry.max_message_size,
                    required,
                });
            }
        }

        Ok(())
    }
}
