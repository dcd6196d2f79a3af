//! HTTP telemetry transport
//!
//! Each value is its own `POST /api/v1/<token>/telemetry` request on a fresh
//! connection, framed by `reqwless`. There is no session to keep: the
//! connection is closed once the response head has been read.

use core::fmt::Write as _;

use embassy_time::{Duration, Instant, with_timeout};
use embedded_io_async::{Read, Write};
use heapless::String;
use log::{debug, warn};
use reqwless::client::HttpConnection;
use reqwless::headers::ContentType;
use reqwless::request::{Request, RequestBuilder};

use super::tls::TlsBuffers;
use super::{Link, TelemetryError, TelemetryTransport, telemetry_payload};
use crate::config::TelemetryConfig;

/// How long the server gets to answer a request
pub const RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);

/// Room for the status line and headers of a response
const RESPONSE_BUFFER_LEN: usize = 1024;

type RequestPath = String<128>;

fn request_error(e: reqwless::Error) -> TelemetryError {
    match e {
        reqwless::Error::Network(kind) => TelemetryError::Io(kind),
        reqwless::Error::BufferTooSmall => TelemetryError::BufferTooSmall,
        other => {
            warn!("HTTP exchange failed: {:?}", other);
            TelemetryError::Protocol
        }
    }
}

/// Send one JSON POST over `conn` and return the response status.
async fn post<C: Read + Write>(
    conn: C,
    host: &str,
    path: &str,
    body: &[u8],
    rx_buf: &mut [u8],
) -> Result<u16, TelemetryError> {
    let request = Request::post(path)
        .host(host)
        .content_type(ContentType::ApplicationJson)
        .body(body)
        .build();

    let mut conn = HttpConnection::Plain(conn);
    let response = conn.send(request, rx_buf).await.map_err(request_error)?;
    Ok(response.status.0)
}

pub struct HttpClient<'c, L> {
    link: L,
    tls: Option<TlsBuffers<'c>>,
    host: &'c str,
    port: u16,
    access_token: &'c str,
    rx_buf: [u8; RESPONSE_BUFFER_LEN],
}

impl<'c, L: Link> HttpClient<'c, L> {
    pub fn new(link: L, config: &'c TelemetryConfig<'c>, tls: Option<TlsBuffers<'c>>) -> Self {
        Self {
            link,
            tls,
            host: config.host,
            port: config.port(),
            access_token: config.access_token,
            rx_buf: [0; RESPONSE_BUFFER_LEN],
        }
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    fn path(&self) -> Result<RequestPath, TelemetryError> {
        let mut path = RequestPath::new();
        write!(path, "/api/v1/{}/telemetry", self.access_token)
            .map_err(|_| TelemetryError::BufferTooSmall)?;
        Ok(path)
    }

    async fn exchange(&mut self, body: &[u8]) -> Result<u16, TelemetryError> {
        let path = self.path()?;
        self.link.open(self.host, self.port).await?;

        let Some(tls) = self.tls.as_mut() else {
            let sent = post(&mut self.link, self.host, &path, body, &mut self.rx_buf);
            return with_timeout(RESPONSE_TIMEOUT, sent)
                .await
                .map_err(|_| TelemetryError::Timeout)?;
        };

        let mut session = tls.open(&mut self.link, self.host).await?;
        let sent = post(&mut session, self.host, &path, body, &mut self.rx_buf);
        let result = with_timeout(RESPONSE_TIMEOUT, sent)
            .await
            .map_err(|_| TelemetryError::Timeout)
            .and_then(|status| status);
        let _ = session.close().await;
        result
    }
}

impl<L: Link> TelemetryTransport for HttpClient<'_, L> {
    fn is_session_based(&self) -> bool {
        false
    }

    fn is_connected(&self) -> bool {
        true
    }

    async fn connect(&mut self, _now: Instant) -> Result<(), TelemetryError> {
        Ok(())
    }

    async fn send_int(&mut self, key: &str, value: i32, _now: Instant) -> Result<(), TelemetryError> {
        let payload = telemetry_payload(key, value)?;

        let result = self.exchange(payload.as_bytes()).await;
        self.link.close().await;

        let status = result?;
        debug!("POST {} answered {}", payload.as_str(), status);
        if (200..300).contains(&status) {
            Ok(())
        } else {
            Err(TelemetryError::HttpStatus(status))
        }
    }

    async fn service(&mut self, _now: Instant) -> Result<(), TelemetryError> {
        Ok(())
    }
}
