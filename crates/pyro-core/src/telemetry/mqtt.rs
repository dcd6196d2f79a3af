//! MQTT telemetry session
//!
//! The wire protocol is `rust-mqtt` (MQTT v5). A ThingsBoard device only
//! publishes: it logs in with its access token as username and sends QoS 0
//! messages to the device telemetry topic.
//!
//! A plain session persists across control loop cycles and is kept alive
//! with pings. TLS sessions cannot outlive a single call (see
//! [`super::tls`]), so an encrypted client is sessionless: every value gets
//! its own connect, publish and disconnect.

use embassy_time::{Duration, Instant, with_timeout};
use embedded_io_async::{Read, Write};
use log::{debug, info, warn};
use rust_mqtt::client::client::MqttClient as BrokerClient;
use rust_mqtt::client::client_config::{ClientConfig, MqttVersion};
use rust_mqtt::packet::v5::publish_packet::QualityOfService;
use rust_mqtt::packet::v5::reason_codes::ReasonCode;
use rust_mqtt::utils::rng_generator::CountingRng;

use super::tls::TlsBuffers;
use super::{COLD_JUNCTION_KEY, TEMPERATURE_KEY};
use super::{Link, TelemetryError, TelemetryTransport, largest_payload_len, telemetry_payload};
use crate::config::{DEFAULT_MAX_MESSAGE_SIZE, TelemetryConfig};

/// Topic ThingsBoard reads device telemetry from
pub const TELEMETRY_TOPIC: &str = "v1/devices/me/telemetry";

/// How long the server gets to answer CONNECT
pub const CONNACK_TIMEOUT: Duration = Duration::from_secs(10);

/// How long the server gets to answer a ping
pub const PING_TIMEOUT: Duration = Duration::from_secs(10);

/// The client never sends CONNECT or PUBLISH properties
const MAX_PROPERTIES: usize = 2;

/// Headroom for fixed headers, length prefixes and the empty v5 property
/// blocks around the variable parts of CONNECT and PUBLISH
const PACKET_OVERHEAD: usize = 24;

/// Buffer size a session with this client id and token needs
pub fn required_buffer_len(client_id: &str, access_token: &str) -> usize {
    let connect = client_id.len() + access_token.len();
    let publish = TELEMETRY_TOPIC.len()
        + largest_payload_len(TEMPERATURE_KEY).max(largest_payload_len(COLD_JUNCTION_KEY));
    connect.max(publish) + PACKET_OVERHEAD
}

#[derive(Debug, Clone, Copy)]
struct Login<'c> {
    client_id: &'c str,
    access_token: &'c str,
    keep_alive_secs: u16,
}

type Broker<'b, C> = BrokerClient<'b, C, MAX_PROPERTIES, CountingRng>;

fn broker<'b, C: Read + Write>(
    conn: C,
    login: Login<'b>,
    write_buf: &'b mut [u8],
    recv_buf: &'b mut [u8],
) -> Broker<'b, C> {
    let mut config = ClientConfig::new(MqttVersion::MQTTv5, CountingRng(20_000));
    config.add_client_id(login.client_id);
    config.add_username(login.access_token);
    config.keep_alive = login.keep_alive_secs;
    config.max_packet_size = write_buf.len() as u32;

    let (write_len, recv_len) = (write_buf.len(), recv_buf.len());
    BrokerClient::new(conn, write_buf, write_len, recv_buf, recv_len, config)
}

fn session_error(code: ReasonCode) -> TelemetryError {
    match code {
        ReasonCode::NetworkError => TelemetryError::Closed,
        other => {
            warn!("MQTT server answered {:?}", other);
            TelemetryError::Rejected
        }
    }
}

async fn log_in<C: Read + Write>(client: &mut Broker<'_, C>) -> Result<(), TelemetryError> {
    with_timeout(CONNACK_TIMEOUT, client.connect_to_broker())
        .await
        .map_err(|_| TelemetryError::Timeout)?
        .map_err(session_error)
}

async fn publish<C: Read + Write>(
    client: &mut Broker<'_, C>,
    payload: &[u8],
) -> Result<(), TelemetryError> {
    client
        .send_message(TELEMETRY_TOPIC, payload, QualityOfService::QoS0, false)
        .await
        .map_err(session_error)
}

pub struct MqttClient<'c, L, const N: usize = { DEFAULT_MAX_MESSAGE_SIZE as usize }> {
    link: L,
    tls: Option<TlsBuffers<'c>>,
    host: &'c str,
    port: u16,
    login: Login<'c>,
    max_message_size: usize,
    write_buf: [u8; N],
    recv_buf: [u8; N],
    connected: bool,
    last_outbound: Instant,
}

impl<'c, L: Link, const N: usize> MqttClient<'c, L, N> {
    /// The effective maximum message size is the smaller of the configured
    /// one and the buffer size `N`.
    pub fn new(link: L, config: &'c TelemetryConfig<'c>, tls: Option<TlsBuffers<'c>>) -> Self {
        Self {
            link,
            tls,
            host: config.host,
            port: config.port(),
            login: Login {
                client_id: config.client_id,
                access_token: config.access_token,
                keep_alive_secs: config.keep_alive_secs,
            },
            max_message_size: (config.max_message_size as usize).min(N),
            write_buf: [0; N],
            recv_buf: [0; N],
            connected: false,
            last_outbound: Instant::from_ticks(0),
        }
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    pub fn is_encrypted(&self) -> bool {
        self.tls.is_some()
    }

    fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.login.keep_alive_secs as u64)
    }

    /// Protocol client over the plain link. It holds no state of its own;
    /// the session lives on the wire.
    fn client(&mut self) -> Broker<'_, &mut L> {
        let limit = self.max_message_size;
        broker(
            &mut self.link,
            self.login,
            &mut self.write_buf[..limit],
            &mut self.recv_buf[..limit],
        )
    }

    /// Tear down the session after a failure. The link is closed.
    async fn drop_session(&mut self) {
        self.connected = false;
        self.link.close().await;
    }

    async fn handshake(&mut self, now: Instant) -> Result<(), TelemetryError> {
        self.link.open(self.host, self.port).await?;
        log_in(&mut self.client()).await?;
        self.last_outbound = now;
        Ok(())
    }

    /// End the session, saying goodbye first if it is still up.
    pub async fn disconnect(&mut self) {
        if self.connected && self.link.is_open() {
            let _ = self.client().disconnect().await;
        }
        self.drop_session().await;
    }

    /// Connect, publish and disconnect inside one TLS session.
    async fn publish_encrypted(&mut self, payload: &[u8]) -> Result<(), TelemetryError> {
        let Some(tls) = self.tls.as_mut() else {
            return Err(TelemetryError::NotConnected);
        };
        self.link.open(self.host, self.port).await?;

        let mut session = tls.open(&mut self.link, self.host).await?;
        let limit = self.max_message_size;
        let mut client = broker(
            &mut session,
            self.login,
            &mut self.write_buf[..limit],
            &mut self.recv_buf[..limit],
        );

        let result = match log_in(&mut client).await {
            Ok(()) => publish(&mut client, payload).await,
            Err(e) => Err(e),
        };
        if result.is_ok() {
            let _ = client.disconnect().await;
        }
        drop(client);

        let _ = session.close().await;
        result
    }

    async fn keep_session_alive(&mut self, now: Instant) -> Result<(), TelemetryError> {
        let keep_alive = self.keep_alive();
        if keep_alive == Duration::from_ticks(0) {
            return Ok(());
        }

        let idle = now.saturating_duration_since(self.last_outbound);
        if idle < keep_alive / 2 {
            return Ok(());
        }

        debug!("MQTT ping after {} s idle", idle.as_secs());
        with_timeout(PING_TIMEOUT, self.client().send_ping())
            .await
            .map_err(|_| TelemetryError::Timeout)?
            .map_err(session_error)?;
        self.last_outbound = now;
        Ok(())
    }
}

impl<L: Link, const N: usize> TelemetryTransport for MqttClient<'_, L, N> {
    fn is_session_based(&self) -> bool {
        !self.is_encrypted()
    }

    fn is_connected(&self) -> bool {
        self.is_encrypted() || (self.connected && self.link.is_open())
    }

    async fn connect(&mut self, now: Instant) -> Result<(), TelemetryError> {
        if self.is_encrypted() {
            return Ok(());
        }
        self.disconnect().await;

        info!(
            "MQTT connect to {}:{} as {}",
            self.host, self.port, self.login.client_id
        );
        match self.handshake(now).await {
            Ok(()) => {
                self.connected = true;
                Ok(())
            }
            Err(e) => {
                self.drop_session().await;
                Err(e)
            }
        }
    }

    async fn send_int(&mut self, key: &str, value: i32, now: Instant) -> Result<(), TelemetryError> {
        let payload = telemetry_payload(key, value)?;

        if self.is_encrypted() {
            let result = self.publish_encrypted(payload.as_bytes()).await;
            self.link.close().await;
            if result.is_ok() {
                debug!("Published {} over TLS", payload.as_str());
            }
            return result;
        }

        if !self.is_connected() {
            return Err(TelemetryError::NotConnected);
        }
        let result = publish(&mut self.client(), payload.as_bytes()).await;
        if let Err(e) = result {
            warn!("MQTT publish failed, dropping session: {}", e);
            self.drop_session().await;
            return Err(e);
        }
        self.last_outbound = now;
        debug!("Published {}", payload.as_str());
        Ok(())
    }

    async fn service(&mut self, now: Instant) -> Result<(), TelemetryError> {
        if self.is_encrypted() || !self.is_connected() {
            return Ok(());
        }

        if let Err(e) = self.keep_session_alive(now).await {
            warn!("MQTT session lost: {}", e);
            self.drop_session().await;
            return Err(e);
        }
        Ok(())
    }
}
