//! esp-radio station as a [`WifiRadio`]

use core::fmt::Write as _;

use embassy_net::Stack;
use embassy_time::{Duration, WithTimeout};
use esp_radio::wifi::{ClientConfig, ModeConfig, ScanConfig, WifiController, WifiError};
use log::{debug, info, warn};
use pyro_core::config::KnownNetwork;
use pyro_core::network::{MAX_SCAN_RESULTS, ScanResults, Ssid, WifiRadio};
use thiserror_no_std::Error;

/// How long DHCP gets after association before the attempt counts as failed
pub const DHCP_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Error, Debug)]
pub enum RadioError {
    #[error("WiFi driver error: {0:?}")]
    Driver(WifiError),
    #[error("no DHCP lease")]
    DhcpTimeout,
}

impl From<WifiError> for RadioError {
    fn from(error: WifiError) -> Self {
        Self::Driver(error)
    }
}

/// Station-mode radio plus the IP stack riding on it.
///
/// "Connected" means associated *and* holding a DHCP lease; an association
/// without an address is no use for telemetry.
pub struct EspWifiRadio<'d> {
    controller: WifiController<'d>,
    stack: Stack<'d>,
    configured: bool,
}

impl<'d> EspWifiRadio<'d> {
    pub fn new(controller: WifiController<'d>, stack: Stack<'d>) -> Self {
        Self {
            controller,
            stack,
            configured: false,
        }
    }

    /// Start the station if needed. Scanning needs station mode, so a
    /// blank client config is applied before the first start.
    async fn ensure_started(&mut self) -> Result<(), RadioError> {
        if !self.controller.is_started().unwrap_or(false) {
            if !self.configured {
                self.controller
                    .set_config(&ModeConfig::Client(ClientConfig::default()))?;
                self.configured = true;
            }
            self.controller.start_async().await?;
            info!("WiFi station started");
        }
        Ok(())
    }
}

impl WifiRadio for EspWifiRadio<'_> {
    type Error = RadioError;

    fn is_connected(&mut self) -> bool {
        matches!(self.controller.is_connected(), Ok(true)) && self.stack.is_config_up()
    }

    async fn scan(&mut self) -> Result<ScanResults, RadioError> {
        self.ensure_started().await?;

        let found = self
            .controller
            .scan_with_config_async(ScanConfig::default())
            .await?;

        let mut results = ScanResults::new();
        for ap in found.iter() {
            let mut ssid = Ssid::new();
            if write!(ssid, "{}", ap.ssid.as_str()).is_err() {
                continue;
            }
            debug!("Saw {} ({} dBm)", ssid.as_str(), ap.signal_strength);
            if results.push(ssid).is_err() {
                warn!(
                    "More than {} access points in range, ignoring the rest",
                    MAX_SCAN_RESULTS
                );
                break;
            }
        }
        Ok(results)
    }

    /// Disconnect, apply the network's credentials, then start and connect.
    async fn associate(&mut self, network: &KnownNetwork<'_>) -> Result<(), RadioError> {
        if matches!(self.controller.is_connected(), Ok(true)) {
            let _ = self.controller.disconnect_async().await;
        }

        let client = ClientConfig::default()
            .with_ssid(network.ssid.into())
            .with_password(network.passphrase.into());
        self.controller.set_config(&ModeConfig::Client(client))?;
        self.configured = true;

        self.ensure_started().await?;

        if let Err(e) = self.controller.connect_async().await {
            let _ = self.controller.disconnect_async().await;
            return Err(e.into());
        }

        match self
            .stack
            .wait_config_up()
            .with_timeout(DHCP_TIMEOUT)
            .await
        {
            Ok(()) => {
                if let Some(v4) = self.stack.config_v4() {
                    info!("DHCP lease {}", v4.address);
                }
                Ok(())
            }
            Err(_) => {
                let _ = self.controller.disconnect_async().await;
                Err(RadioError::DhcpTimeout)
            }
        }
    }
}
