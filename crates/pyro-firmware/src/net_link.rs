//! embassy-net TCP socket as a telemetry [`Link`]
//!
//! Reads and writes go straight to the socket while it is open. TLS, when
//! configured, is layered on top of this link by the transports.

use core::net::Ipv4Addr;

use embassy_net::dns::DnsQueryType;
use embassy_net::tcp::TcpSocket;
use embassy_net::{IpAddress, Stack};
use embassy_time::{Duration, with_timeout};
use embedded_io::{Error as _, ErrorKind};
use log::{debug, warn};
use pyro_core::telemetry::{Link, TelemetryError};

/// Idle time after which the stack gives up on the peer
pub const SOCKET_TIMEOUT: Duration = Duration::from_secs(20);

/// How long a graceful close may take before the socket is aborted
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

pub struct TcpLink<'a> {
    stack: Stack<'a>,
    socket: TcpSocket<'a>,
    open: bool,
}

impl<'a> TcpLink<'a> {
    pub fn new(stack: Stack<'a>, rx_buffer: &'a mut [u8], tx_buffer: &'a mut [u8]) -> Self {
        let mut socket = TcpSocket::new(stack, rx_buffer, tx_buffer);
        socket.set_timeout(Some(SOCKET_TIMEOUT));
        Self {
            stack,
            socket,
            open: false,
        }
    }

    async fn resolve(&self, host: &str) -> Result<IpAddress, TelemetryError> {
        if let Ok(addr) = host.parse::<Ipv4Addr>() {
            return Ok(IpAddress::Ipv4(addr));
        }

        let addrs = self
            .stack
            .dns_query(host, DnsQueryType::A)
            .await
            .map_err(|e| {
                warn!("DNS lookup for {} failed: {:?}", host, e);
                TelemetryError::Dns
            })?;
        addrs.first().copied().ok_or(TelemetryError::Dns)
    }
}

impl embedded_io::ErrorType for TcpLink<'_> {
    type Error = ErrorKind;
}

impl embedded_io_async::Read for TcpLink<'_> {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, ErrorKind> {
        if !self.open {
            return Err(ErrorKind::NotConnected);
        }
        self.socket.read(buf).await.map_err(|e| e.kind())
    }
}

impl embedded_io_async::Write for TcpLink<'_> {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, ErrorKind> {
        if !self.open {
            return Err(ErrorKind::NotConnected);
        }
        self.socket.write(buf).await.map_err(|e| e.kind())
    }

    async fn flush(&mut self) -> Result<(), ErrorKind> {
        self.socket.flush().await.map_err(|e| e.kind())
    }
}

impl Link for TcpLink<'_> {
    async fn open(&mut self, host: &str, port: u16) -> Result<(), TelemetryError> {
        self.close().await;

        let addr = self.resolve(host).await?;
        debug!("Connecting to {}:{} ({})", host, port, addr);
        self.socket.connect((addr, port)).await.map_err(|e| {
            warn!("TCP connect to {}:{} failed: {:?}", host, port, e);
            TelemetryError::Connect
        })?;

        self.open = true;
        Ok(())
    }

    async fn close(&mut self) {
        if self.open {
            self.open = false;
            self.socket.close();
            if with_timeout(CLOSE_TIMEOUT, self.socket.flush()).await.is_err() {
                debug!("Peer slow to acknowledge close, aborting");
            }
        }
        // Leaves the socket Closed so the next connect is accepted
        self.socket.abort();
    }

    fn is_open(&self) -> bool {
        self.open
    }
}
