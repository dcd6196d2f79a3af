//! TLS for encrypted telemetry links
//!
//! A session is opened with `embedded-tls` on top of a [`Link`] that is
//! already connected. Sessions borrow the record buffers held in
//! [`TlsBuffers`], so one lives at most as long as a single call into a
//! transport; the transports open a fresh one per exchange.
//!
//! The server name is sent for SNI. The server certificate is not checked
//! against a trust anchor.

use embedded_tls::{Aes128GcmSha256, NoVerify, TlsConfig, TlsConnection, TlsContext};
use log::{debug, warn};
use rand_chacha::ChaCha8Rng;
use rand_chacha::rand_core::SeedableRng;

use super::{Link, TelemetryError};

/// A TLS 1.3 record is at most 16 KiB plus 256 bytes of overhead
pub const TLS_READ_BUFFER_LEN: usize = 16_640;

/// Outbound records can be smaller; telemetry messages are tiny
pub const TLS_WRITE_BUFFER_LEN: usize = 4_096;

/// An open TLS session over a borrowed link
pub type TlsSession<'s, L> = TlsConnection<'s, &'s mut L, Aes128GcmSha256>;

/// Record buffers and key material source for TLS sessions.
pub struct TlsBuffers<'b> {
    read: &'b mut [u8],
    write: &'b mut [u8],
    rng: ChaCha8Rng,
}

impl<'b> TlsBuffers<'b> {
    /// `seed` should come from a hardware entropy source.
    pub fn new(read: &'b mut [u8], write: &'b mut [u8], seed: u64) -> Self {
        Self {
            read,
            write,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Run the TLS handshake over an open `link`.
    pub async fn open<'s, L: Link>(
        &'s mut self,
        link: &'s mut L,
        server_name: &'s str,
    ) -> Result<TlsSession<'s, L>, TelemetryError> {
        let config = TlsConfig::new().with_server_name(server_name);
        let mut session = TlsConnection::new(link, &mut *self.read, &mut *self.write);

        session
            .open::<_, NoVerify>(TlsContext::new(&config, &mut self.rng))
            .await
            .map_err(|e| {
                warn!("TLS handshake with {} failed: {:?}", server_name, e);
                TelemetryError::Tls
            })?;

        debug!("TLS session with {} established", server_name);
        Ok(session)
    }
}
