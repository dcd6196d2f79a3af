//! WiFi connectivity management
//!
//! The device only ever talks to networks from its compiled-in known list.
//! [`ConnectivityManager`] owns the radio, joins the first known network a
//! scan turns up, and rate-limits reconnection so a missing access point
//! never turns into a scan storm.
//!
//! Link loss is not monitored. It is noticed lazily the next time
//! [`ConnectivityManager::reconnect`] asks the radio whether it is still
//! associated.

use embassy_time::{Duration, Instant};
use heapless::{String, Vec};
use log::{debug, info, warn};
use thiserror_no_std::Error;

use crate::config::{KnownNetwork, NetworkConfig};

/// Longest SSID allowed by 802.11
pub const MAX_SSID_LEN: usize = 32;

/// Most access points a single scan reports
pub const MAX_SCAN_RESULTS: usize = 16;

pub type Ssid = String<MAX_SSID_LEN>;

/// Access points seen by one scan, in the order the radio reported them
pub type ScanResults = Vec<Ssid, MAX_SCAN_RESULTS>;

/// Station-mode WiFi radio
pub trait WifiRadio {
    type Error: core::fmt::Debug;

    /// Whether the radio is currently associated with an access point.
    fn is_connected(&mut self) -> bool;

    /// Scan for nearby access points.
    fn scan(&mut self) -> impl Future<Output = Result<ScanResults, Self::Error>>;

    /// Associate with `network` and wait for the result.
    fn associate(
        &mut self,
        network: &KnownNetwork<'_>,
    ) -> impl Future<Output = Result<(), Self::Error>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityState {
    Disconnected,
    Connected,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
    #[error("WiFi scan failed")]
    Scan,
    #[error("no known network in range")]
    NoKnownNetwork,
    #[error("association with {ssid} failed")]
    Association { ssid: Ssid },
}

pub struct ConnectivityManager<'c, R> {
    radio: R,
    known: &'c [KnownNetwork<'c>],
    check_interval: Duration,
    last_attempt: Option<Instant>,
    attempts: u32,
}

impl<'c, R: WifiRadio> ConnectivityManager<'c, R> {
    pub fn new(radio: R, known: &'c [KnownNetwork<'c>], check_interval: Duration) -> Self {
        Self {
            radio,
            known,
            check_interval,
            last_attempt: None,
            attempts: 0,
        }
    }

    pub fn from_config(radio: R, config: &'c NetworkConfig<'c>) -> Self {
        Self::new(radio, &config.known_networks, config.check_interval())
    }

    /// Current association state, asked fresh from the radio.
    pub fn state(&mut self) -> ConnectivityState {
        if self.radio.is_connected() {
            ConnectivityState::Connected
        } else {
            ConnectivityState::Disconnected
        }
    }

    pub fn is_connected(&mut self) -> bool {
        self.state() == ConnectivityState::Connected
    }

    /// First scanned network that is also in the known list.
    ///
    /// Scan order decides; signal strength is not considered.
    pub fn select_network(&self, scan: &[Ssid]) -> Option<&'c KnownNetwork<'c>> {
        let known = self.known;
        scan.iter()
            .find_map(|ssid| known.iter().find(|network| network.ssid == ssid.as_str()))
    }

    /// Scan and associate with the first known network in range.
    ///
    /// Counts as an attempt for rate limiting whether it succeeds or not.
    pub async fn join(&mut self, now: Instant) -> Result<Ssid, NetworkError> {
        self.last_attempt = Some(now);
        self.attempts = self.attempts.wrapping_add(1);

        info!("Scanning for known WiFi networks");
        let found = self.radio.scan().await.map_err(|e| {
            warn!("WiFi scan failed: {:?}", e);
            NetworkError::Scan
        })?;
        debug!("Scan found {} networks", found.len());

        let Some(network) = self.select_network(&found) else {
            warn!(
                "None of the {} known networks is in range, next attempt in {} ms",
                self.known.len(),
                self.check_interval.as_millis()
            );
            return Err(NetworkError::NoKnownNetwork);
        };

        let mut ssid = Ssid::new();
        // Known SSIDs longer than 32 bytes can never appear in a scan.
        let _ = ssid.push_str(network.ssid);

        info!("Connecting to {}", network.ssid);
        if let Err(e) = self.radio.associate(network).await {
            warn!(
                "Connection to {} failed: {:?}, next attempt in {} ms",
                network.ssid,
                e,
                self.check_interval.as_millis()
            );
            return Err(NetworkError::Association { ssid });
        }

        info!("WiFi connected to {}", network.ssid);
        Ok(ssid)
    }

    /// Make sure the device is online.
    ///
    /// Returns `true` straight away when already associated. Otherwise a new
    /// join is attempted only if a full check interval has passed since the
    /// previous attempt; inside the interval this returns `false` without
    /// touching the radio.
    pub async fn reconnect(&mut self, now: Instant) -> bool {
        if self.radio.is_connected() {
            return true;
        }

        if let Some(last) = self.last_attempt
            && now.saturating_duration_since(last) < self.check_interval
        {
            debug!("WiFi down, reconnect not due yet");
            return false;
        }

        info!("Reconnecting to WiFi");
        if let Err(e) = self.join(now).await {
            warn!("WiFi reconnect failed: {}", e);
        }
        self.radio.is_connected()
    }

    /// Time of the most recent join attempt
    pub fn last_attempt(&self) -> Option<Instant> {
        self.last_attempt
    }

    /// Join attempts made so far
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn radio(&self) -> &R {
        &self.radio
    }

    pub fn radio_mut(&mut self) -> &mut R {
        &mut self.radio
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeRadio;
    use embassy_futures::block_on;

    const KNOWN: [KnownNetwork<'static>; 2] = [
        KnownNetwork {
            ssid: "kiln-shed",
            passphrase: "firebrick",
        },
        KnownNetwork {
            ssid: "workshop",
            passphrase: "hunter22",
        },
    ];

    fn manager(radio: FakeRadio) -> ConnectivityManager<'static, FakeRadio> {
        ConnectivityManager::new(radio, &KNOWN, Duration::from_secs(30))
    }

    #[test]
    fn first_scanned_known_network_wins() {
        let mut wifi = manager(FakeRadio::in_range(&["neighbour", "workshop", "kiln-shed"]));

        let joined = block_on(wifi.join(Instant::from_secs(1))).unwrap();
        assert_eq!(joined.as_str(), "workshop");
        assert_eq!(wifi.radio().associated_with(), Some("workshop"));
        assert!(wifi.is_connected());
    }

    #[test]
    fn no_match_stays_disconnected() {
        let mut wifi = manager(FakeRadio::in_range(&["neighbour", "cafe"]));

        assert_eq!(
            block_on(wifi.join(Instant::from_secs(1))),
            Err(NetworkError::NoKnownNetwork)
        );
        assert_eq!(wifi.state(), ConnectivityState::Disconnected);
        assert_eq!(wifi.radio().associations(), 0);
    }

    #[test]
    fn reconnect_is_immediate_when_connected() {
        let mut wifi = manager(FakeRadio::in_range(&["workshop"]));
        block_on(wifi.join(Instant::from_secs(1))).unwrap();

        assert!(block_on(wifi.reconnect(Instant::from_secs(2))));
        assert_eq!(wifi.radio().scans(), 1);
    }

    #[test]
    fn reconnect_attempts_once_per_interval() {
        let mut wifi = manager(FakeRadio::in_range(&["cafe"]));
        let boot = Instant::from_secs(10);
        assert!(block_on(wifi.join(boot)).is_err());

        for offset_secs in [0, 1, 15, 29] {
            let now = boot + Duration::from_secs(offset_secs);
            assert!(!block_on(wifi.reconnect(now)));
        }
        assert_eq!(wifi.radio().scans(), 1);

        assert!(!block_on(wifi.reconnect(boot + Duration::from_secs(30))));
        assert_eq!(wifi.radio().scans(), 2);
        assert_eq!(wifi.attempts(), 2);

        assert!(!block_on(wifi.reconnect(boot + Duration::from_secs(31))));
        assert_eq!(wifi.radio().scans(), 2);
    }

    #[test]
    fn reconnect_recovers_after_network_returns() {
        let mut wifi = manager(FakeRadio::in_range(&["workshop"]));
        let boot = Instant::from_secs(0);
        block_on(wifi.join(boot)).unwrap();

        wifi.radio_mut().drop_link();
        wifi.radio_mut().set_in_range(&[]);
        assert!(!block_on(wifi.reconnect(boot + Duration::from_secs(40))));

        wifi.radio_mut().set_in_range(&["kiln-shed"]);
        assert!(!block_on(wifi.reconnect(boot + Duration::from_secs(50))));
        assert!(block_on(wifi.reconnect(boot + Duration::from_secs(70))));
        assert_eq!(wifi.radio().associated_with(), Some("kiln-shed"));
    }

    #[test]
    fn association_failure_is_reported() {
        let mut wifi = manager(FakeRadio::in_range(&["kiln-shed"]).refusing());

        let err = block_on(wifi.join(Instant::from_secs(1))).unwrap_err();
        assert!(matches!(err, NetworkError::Association { ref ssid } if ssid == "kiln-shed"));
        assert!(!wifi.is_connected());
    }

    #[test]
    fn scan_failure_is_reported() {
        let mut wifi = manager(FakeRadio::in_range(&["kiln-shed"]).with_broken_scan());
        assert_eq!(
            block_on(wifi.join(Instant::from_secs(1))),
            Err(NetworkError::Scan)
        );
        assert_eq!(wifi.last_attempt(), Some(Instant::from_secs(1)));
    }
}
