//! Telemetry uplink
//!
//! Readings go to a ThingsBoard-style telemetry service as named integer
//! values. Two transports are available: an MQTT session
//! ([`mqtt::MqttClient`], on `rust-mqtt`) and one-request-per-value HTTP
//! ([`http::HttpClient`], on `reqwless`). [`AnyTransport`] picks one from the
//! configuration at startup. Either can run over TLS ([`tls`]).
//!
//! Both transports sit on a [`Link`], a plain byte stream that can be opened
//! to a host and port. The firmware backs it with an embassy-net TCP
//! socket; tests back it with an in-memory script.

pub mod http;
pub mod mqtt;
pub mod tls;

use embassy_time::Instant;
use embedded_io::ErrorKind;
use embedded_io_async::{Read, Write};
use heapless::String;
use log::{debug, info, warn};
use serde::ser::{Serialize, SerializeMap, Serializer};
use thiserror_no_std::Error;

use crate::config::{ConfigError, TelemetryConfig, Transport};
use http::HttpClient;
use mqtt::MqttClient;
use tls::TlsBuffers;

/// Key under which the thermocouple temperature is published
pub const TEMPERATURE_KEY: &str = "temperature";
/// Key under which the cold junction temperature is published
pub const COLD_JUNCTION_KEY: &str = "cold junction temperature";

/// Values published per control loop cycle
pub const VALUES_PER_SEND: u8 = 2;

/// Longest JSON body produced by [`telemetry_payload`]
pub const MAX_PAYLOAD_LEN: usize = 64;

pub type Payload = String<MAX_PAYLOAD_LEN>;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelemetryError {
    #[error("DNS lookup failed")]
    Dns,
    #[error("TCP connect failed")]
    Connect,
    #[error("TLS handshake failed")]
    Tls,
    #[error("I/O error: {0:?}")]
    Io(ErrorKind),
    #[error("connection closed by server")]
    Closed,
    #[error("server refused the session")]
    Rejected,
    #[error("server answered HTTP {0}")]
    HttpStatus(u16),
    #[error("malformed response from server")]
    Protocol,
    #[error("message does not fit the maximum message size")]
    BufferTooSmall,
    #[error("no telemetry session")]
    NotConnected,
    #[error("server did not answer in time")]
    Timeout,
}

/// A byte stream to the telemetry server.
pub trait Link: Read + Write {
    /// Resolve `host` and open a connection to it.
    fn open(&mut self, host: &str, port: u16) -> impl Future<Output = Result<(), TelemetryError>>;

    /// Close the connection. Closing a closed link is a no-op.
    fn close(&mut self) -> impl Future<Output = ()>;

    fn is_open(&self) -> bool;
}

/// A way of getting named integer values to the telemetry service.
pub trait TelemetryTransport {
    /// Whether values travel over a long-lived session that must be
    /// established first.
    fn is_session_based(&self) -> bool;

    /// Whether a session is up. Sessionless transports always report `true`.
    fn is_connected(&self) -> bool;

    /// Establish the session.
    fn connect(&mut self, now: Instant) -> impl Future<Output = Result<(), TelemetryError>>;

    /// Publish one value, fire and forget.
    fn send_int(
        &mut self,
        key: &str,
        value: i32,
        now: Instant,
    ) -> impl Future<Output = Result<(), TelemetryError>>;

    /// Session housekeeping such as keep-alive pings.
    fn service(&mut self, now: Instant) -> impl Future<Output = Result<(), TelemetryError>>;
}

/// One named value, serialized as a single-entry JSON object
struct TelemetryValue<'k> {
    key: &'k str,
    value: i32,
}

impl Serialize for TelemetryValue<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(self.key, &self.value)?;
        map.end()
    }
}

/// JSON body carrying a single value: `{"<key>":<value>}`.
pub fn telemetry_payload(key: &str, value: i32) -> Result<Payload, TelemetryError> {
    let mut buf = [0u8; MAX_PAYLOAD_LEN];
    let len = serde_json_core::to_slice(&TelemetryValue { key, value }, &mut buf)
        .map_err(|_| TelemetryError::BufferTooSmall)?;
    let json = core::str::from_utf8(&buf[..len]).map_err(|_| TelemetryError::Protocol)?;

    let mut payload = Payload::new();
    payload
        .push_str(json)
        .map_err(|_| TelemetryError::BufferTooSmall)?;
    Ok(payload)
}

/// Length of [`telemetry_payload`] for the longest value `key` can carry,
/// for keys that need no escaping
pub fn largest_payload_len(key: &str) -> usize {
    // {"  key  ":  -2147483648  }
    2 + key.len() + 2 + 11 + 1
}

/// Result of one [`TelemetryUplink::send_readings`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// No session could be established, nothing was sent
    NoSession(TelemetryError),
    /// Both values were handed to the transport, `delivered` of them went out
    Sent { delivered: u8 },
}

impl SendOutcome {
    pub fn delivered(&self) -> u8 {
        match self {
            Self::NoSession(_) => 0,
            Self::Sent { delivered } => *delivered,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.delivered() == VALUES_PER_SEND
    }
}

/// Forwards thermocouple readings through a transport.
pub struct TelemetryUplink<T> {
    transport: T,
}

impl<T: TelemetryTransport> TelemetryUplink<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    /// Send the temperature and cold junction values.
    ///
    /// A session-based transport is connected first if needed; when that
    /// fails the cycle's values are dropped. Each value is sent on its own
    /// and a failed first send does not stop the second.
    pub async fn send_readings(
        &mut self,
        temperature: i32,
        cold_junction: i32,
        now: Instant,
    ) -> SendOutcome {
        if self.transport.is_session_based() && !self.transport.is_connected() {
            info!("Connecting to telemetry server");
            if let Err(e) = self.transport.connect(now).await {
                warn!("Telemetry connect failed: {}", e);
                return SendOutcome::NoSession(e);
            }
            info!("Telemetry session established");
        }

        let mut delivered = 0;
        for (key, value) in [
            (TEMPERATURE_KEY, temperature),
            (COLD_JUNCTION_KEY, cold_junction),
        ] {
            info!("Sending {} = {}", key, value);
            match self.transport.send_int(key, value, now).await {
                Ok(()) => delivered += 1,
                Err(e) => warn!("Sending {} failed: {}", key, e),
            }
        }

        debug!("Delivered {}/{} telemetry values", delivered, VALUES_PER_SEND);
        SendOutcome::Sent { delivered }
    }

    /// Keep a live session healthy. Runs every control loop cycle, whether
    /// or not anything is due to be sent.
    pub async fn service(&mut self, now: Instant) {
        if !self.transport.is_session_based() || !self.transport.is_connected() {
            return;
        }
        if let Err(e) = self.transport.service(now).await {
            warn!("Telemetry session housekeeping failed: {}", e);
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }
}

/// Transport chosen at startup from [`TelemetryConfig::transport`].
pub enum AnyTransport<'c, L> {
    Mqtt(MqttClient<'c, L>),
    Http(HttpClient<'c, L>),
}

impl<'c, L: Link> AnyTransport<'c, L> {
    /// Build the configured transport. An encrypted configuration needs
    /// `tls` buffers; without them this fails with
    /// [`ConfigError::EncryptionUnavailable`].
    pub fn from_config(
        link: L,
        config: &'c TelemetryConfig<'c>,
        tls: Option<TlsBuffers<'c>>,
    ) -> Result<Self, ConfigError> {
        let tls = match (config.encrypted, tls) {
            (false, _) => None,
            (true, Some(tls)) => Some(tls),
            (true, None) => return Err(ConfigError::EncryptionUnavailable),
        };

        info!(
            "Telemetry via {}{} to {}:{}",
            config.transport.label(),
            if tls.is_some() { " over TLS" } else { "" },
            config.host,
            config.port()
        );
        Ok(match config.transport {
            Transport::Mqtt => Self::Mqtt(MqttClient::new(link, config, tls)),
            Transport::Http => Self::Http(HttpClient::new(link, config, tls)),
        })
    }

    pub fn link(&self) -> &L {
        match self {
            Self::Mqtt(client) => client.link(),
            Self::Http(client) => client.link(),
        }
    }
}

impl<L: Link> TelemetryTransport for AnyTransport<'_, L> {
    fn is_session_based(&self) -> bool {
        match self {
            Self::Mqtt(client) => client.is_session_based(),
            Self::Http(client) => client.is_session_based(),
        }
    }

    fn is_connected(&self) -> bool {
        match self {
            Self::Mqtt(client) => client.is_connected(),
            Self::Http(client) => client.is_connected(),
        }
    }

    async fn connect(&mut self, now: Instant) -> Result<(), TelemetryError> {
        match self {
            Self::Mqtt(client) => client.connect(now).await,
            Self::Http(client) => client.connect(now).await,
        }
    }

    async fn send_int(&mut self, key: &str, value: i32, now: Instant) -> Result<(), TelemetryError> {
        match self {
            Self::Mqtt(client) => client.send_int(key, value, now).await,
            Self::Http(client) => client.send_int(key, value, now).await,
        }
    }

    async fn service(&mut self, now: Instant) -> Result<(), TelemetryError> {
        match self {
            Self::Mqtt(client) => client.service(now).await,
            Self::Http(client) => client.service(now).await,
        }
    }
}
