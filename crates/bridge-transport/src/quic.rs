//! QUIC transport: a reliable byte stream over UDP.
//!
//! Every relayed connection gets its own QUIC connection carrying exactly one
//! bidirectional stream. QUIC only announces a stream to the peer once data
//! flows on it, so the dialer writes a single [`STREAM_OPEN_MARKER`] byte
//! right after opening the stream and the listener consumes it before handing
//! the stream out.
//!
//! The listener completes handshakes in background tasks and queues ready
//! streams, so a slow or silent client never blocks `accept`.

use std::fmt;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use bridge_core::defaults::{
    DEFAULT_HANDSHAKE_TIMEOUT_SECS, DEFAULT_QUIC_CLIENT_BIND, DEFAULT_QUIC_CLOSE_LINGER_MS,
    DEFAULT_QUIC_IDLE_TIMEOUT_SECS, DEFAULT_QUIC_KEEP_ALIVE_SECS, DEFAULT_QUIC_SERVER_NAME,
};
use quinn::crypto::rustls::{QuicClientConfig, QuicServerConfig};
use quinn::{Endpoint, VarInt};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::TransportError;
use crate::tls;
use crate::tls_config::TlsConfig;
use crate::{TransportDialer, TransportListener, TransportStream};

/// First byte the dialer sends on a new stream.
pub const STREAM_OPEN_MARKER: u8 = 0x01;

/// Streams that finished their handshake but were not accepted yet.
const ACCEPT_QUEUE: usize = 128;

const CLOSE_CODE: VarInt = VarInt::from_u32(0);

/// QUIC endpoint settings shared by listener and dialer.
#[derive(Debug, Clone)]
pub struct QuicOptions {
    /// SNI sent when dialing.
    pub server_name: String,
    /// Connection idle timeout; `None` disables it.
    pub max_idle_timeout: Option<Duration>,
    /// Keep-alive interval; `None` disables keep-alives.
    pub keep_alive_interval: Option<Duration>,
    /// Bound on the listener-side handshake (QUIC handshake + stream marker).
    pub handshake_timeout: Duration,
    /// How long `close` waits for the peer to acknowledge outstanding data.
    pub close_linger: Duration,
    /// Local address of the dialer's client endpoint.
    pub client_bind: SocketAddr,
}

impl Default for QuicOptions {
    fn default() -> Self {
        Self {
            server_name: DEFAULT_QUIC_SERVER_NAME.to_string(),
            max_idle_timeout: Some(Duration::from_secs(DEFAULT_QUIC_IDLE_TIMEOUT_SECS)),
            keep_alive_interval: Some(Duration::from_secs(DEFAULT_QUIC_KEEP_ALIVE_SECS)),
            handshake_timeout: Duration::from_secs(DEFAULT_HANDSHAKE_TIMEOUT_SECS),
            close_linger: Duration::from_millis(DEFAULT_QUIC_CLOSE_LINGER_MS),
            client_bind: DEFAULT_QUIC_CLIENT_BIND
                .parse()
                .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], 0))),
        }
    }
}

fn transport_config(options: &QuicOptions) -> Result<Arc<quinn::TransportConfig>, TransportError> {
    let mut transport = quinn::TransportConfig::default();
    let idle = options
        .max_idle_timeout
        .map(quinn::IdleTimeout::try_from)
        .transpose()
        .map_err(|e| TransportError::Config(format!("invalid QUIC idle timeout: {e}")))?;
    transport.max_idle_timeout(idle);
    transport.keep_alive_interval(options.keep_alive_interval);
    Ok(Arc::new(transport))
}

// ── Stream ──

/// One bidirectional QUIC stream together with the connection carrying it.
pub struct QuicStream {
    connection: quinn::Connection,
    send: quinn::SendStream,
    recv: quinn::RecvStream,
    close_linger: Duration,
    closed: bool,
}

impl QuicStream {
    fn new(
        connection: quinn::Connection,
        send: quinn::SendStream,
        recv: quinn::RecvStream,
        close_linger: Duration,
    ) -> Self {
        Self {
            connection,
            send,
            recv,
            close_linger,
            closed: false,
        }
    }

}

impl fmt::Debug for QuicStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuicStream")
            .field("remote", &self.connection.remote_address())
            .field("closed", &self.closed)
            .finish()
    }
}

impl AsyncRead for QuicStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        AsyncRead::poll_read(Pin::new(&mut self.recv), cx, buf)
    }
}

impl AsyncWrite for QuicStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        AsyncWrite::poll_write(Pin::new(&mut self.send), cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        AsyncWrite::poll_flush(Pin::new(&mut self.send), cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        AsyncWrite::poll_shutdown(Pin::new(&mut self.send), cx)
    }
}

impl TransportStream for QuicStream {
    fn peer(&self) -> String {
        self.connection.remote_address().to_string()
    }

    fn close(&mut self) -> Pin<Box<dyn Future<Output = Result<(), TransportError>> + Send + '_>> {
        Box::pin(async move {
            if self.closed {
                return Ok(());
            }
            self.closed = true;

            // Fails if a forwarded half-close already finished the stream.
            let _ = self.send.finish();
            if tokio::time::timeout(self.close_linger, self.send.stopped())
                .await
                .is_err()
            {
                debug!(
                    peer = %self.connection.remote_address(),
                    "peer did not acknowledge stream data before close"
                );
            }
            self.connection.close(CLOSE_CODE, b"closed");
            Ok(())
        })
    }
}

impl Drop for QuicStream {
    fn drop(&mut self) {
        if !self.closed {
            self.connection.close(CLOSE_CODE, b"dropped");
        }
    }
}

// ── Listener ──

/// QUIC listener. Closing it refuses new connections but leaves established
/// ones running.
pub struct QuicTransportListener {
    endpoint: Endpoint,
    local_addr: SocketAddr,
    ready: mpsc::Receiver<QuicStream>,
    driver: JoinHandle<()>,
    closed: bool,
}

impl QuicTransportListener {
    /// Bind a QUIC server endpoint on `addr`.
    ///
    /// Uses the certificate from `tls` or generates a self-signed one. Must be
    /// called from within a Tokio runtime.
    pub fn bind(
        addr: SocketAddr,
        tls: Option<&TlsConfig>,
        options: &QuicOptions,
    ) -> Result<Self, TransportError> {
        let crypto = QuicServerConfig::try_from(tls::build_server_crypto(tls)?)
            .map_err(|e| TransportError::Config(format!("QUIC server crypto: {e}")))?;
        let mut server_config = quinn::ServerConfig::with_crypto(Arc::new(crypto));
        server_config.transport_config(transport_config(options)?);

        let endpoint = Endpoint::server(server_config, addr)?;
        let local_addr = endpoint.local_addr()?;

        let (tx, ready) = mpsc::channel(ACCEPT_QUEUE);
        let driver = tokio::spawn(drive_incoming(
            endpoint.clone(),
            tx,
            options.handshake_timeout,
            options.close_linger,
        ));

        Ok(Self {
            endpoint,
            local_addr,
            ready,
            driver,
            closed: false,
        })
    }

    /// The bound UDP address (resolves port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

/// Accepts QUIC connections and completes each handshake in its own task.
async fn drive_incoming(
    endpoint: Endpoint,
    ready: mpsc::Sender<QuicStream>,
    handshake_timeout: Duration,
    close_linger: Duration,
) {
    while let Some(incoming) = endpoint.accept().await {
        let ready = ready.clone();
        tokio::spawn(async move {
            let remote = incoming.remote_address();
            let established = tokio::time::timeout(handshake_timeout, establish(incoming, close_linger))
                .await
                .unwrap_or(Err(TransportError::HandshakeTimeout));
            match established {
                Ok(stream) => {
                    if ready.send(stream).await.is_err() {
                        debug!(peer = %remote, "listener closed, dropping QUIC connection");
                    }
                }
                Err(e) => {
                    warn!(peer = %remote, error = %e, error_kind = e.error_kind(), "QUIC handshake failed");
                }
            }
        });
    }
    debug!("QUIC endpoint stopped accepting");
}

async fn establish(
    incoming: quinn::Incoming,
    close_linger: Duration,
) -> Result<QuicStream, TransportError> {
    let connection = incoming.await?;
    let (send, mut recv) = connection.accept_bi().await?;

    let mut marker = [0u8; 1];
    recv.read_exact(&mut marker).await?;
    if marker[0] != STREAM_OPEN_MARKER {
        connection.close(CLOSE_CODE, b"bad marker");
        return Err(TransportError::BadMarker(marker[0]));
    }

    Ok(QuicStream::new(connection, send, recv, close_linger))
}

impl TransportListener for QuicTransportListener {
    type Stream = QuicStream;

    fn accept(
        &mut self,
    ) -> Pin<Box<dyn Future<Output = Result<Self::Stream, TransportError>> + Send + '_>> {
        Box::pin(async move {
            if self.closed {
                return Err(TransportError::Closed);
            }
            self.ready.recv().await.ok_or(TransportError::Closed)
        })
    }

    fn listen_addr(&self) -> String {
        self.local_addr.to_string()
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        // Refuse new connections without touching established ones.
        self.endpoint.set_server_config(None);
        self.driver.abort();
        self.ready.close();
        debug!(addr = %self.local_addr, "quic listener closed");
    }
}

impl Drop for QuicTransportListener {
    fn drop(&mut self) {
        self.close();
    }
}

// ── Dialer ──

/// QUIC dialer sharing one client endpoint across all outbound connections.
#[derive(Clone)]
pub struct QuicTransportDialer {
    endpoint: Endpoint,
    server_name: String,
    close_linger: Duration,
}

impl QuicTransportDialer {
    /// Bind the client endpoint. Must be called from within a Tokio runtime.
    pub fn new(options: &QuicOptions) -> Result<Self, TransportError> {
        let crypto = QuicClientConfig::try_from(tls::build_insecure_client_crypto()?)
            .map_err(|e| TransportError::Config(format!("QUIC client crypto: {e}")))?;
        let mut client_config = quinn::ClientConfig::new(Arc::new(crypto));
        client_config.transport_config(transport_config(options)?);

        let mut endpoint = Endpoint::client(options.client_bind)?;
        endpoint.set_default_client_config(client_config);

        Ok(Self {
            endpoint,
            server_name: options.server_name.clone(),
            close_linger: options.close_linger,
        })
    }

    /// Resolve `addr`, preferring the address family of the client endpoint.
    async fn resolve(&self, addr: &str) -> Result<SocketAddr, TransportError> {
        let want_v4 = self.endpoint.local_addr()?.is_ipv4();
        let candidates: Vec<SocketAddr> = tokio::net::lookup_host(addr).await?.collect();
        candidates
            .iter()
            .find(|a| a.is_ipv4() == want_v4)
            .or_else(|| candidates.first())
            .copied()
            .ok_or_else(|| TransportError::Unresolved(addr.to_string()))
    }
}

impl TransportDialer for QuicTransportDialer {
    type Stream = QuicStream;

    fn dial(
        &self,
        addr: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Self::Stream, TransportError>> + Send + '_>> {
        let addr = addr.to_string();
        Box::pin(async move {
            let remote = self.resolve(&addr).await?;
            let connection = self.endpoint.connect(remote, &self.server_name)?.await?;
            let (mut send, recv) = connection.open_bi().await?;
            send.write_all(&[STREAM_OPEN_MARKER]).await?;
            Ok(QuicStream::new(connection, send, recv, self.close_linger))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn loopback() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[tokio::test]
    async fn test_dial_accept_echo() {
        let options = QuicOptions::default();
        let mut listener = QuicTransportListener::bind(loopback(), None, &options).unwrap();
        let addr = listener.local_addr().to_string();
        let dialer = QuicTransportDialer::new(&options).unwrap();

        let (accepted, dialed) = tokio::join!(listener.accept(), dialer.dial(&addr));
        let mut accepted = accepted.unwrap();
        let mut dialed = dialed.unwrap();
        assert_eq!(dialed.peer(), addr);
        assert!(format!("{dialed:?}").contains(&addr));

        dialed.write_all(b"hello").await.unwrap();
        dialed.flush().await.unwrap();
        let mut buf = [0u8; 5];
        accepted.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");

        accepted.write_all(b"world").await.unwrap();
        accepted.close().await.unwrap();
        let mut reply = Vec::new();
        dialed.read_to_end(&mut reply).await.unwrap();
        assert_eq!(reply, b"world");

        dialed.close().await.unwrap();
        // Second close is a no-op.
        dialed.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_closed_listener_refuses() {
        let options = QuicOptions {
            handshake_timeout: Duration::from_millis(500),
            ..QuicOptions::default()
        };
        let mut listener = QuicTransportListener::bind(loopback(), None, &options).unwrap();
        let addr = listener.local_addr().to_string();
        listener.close();
        listener.close();
        assert!(matches!(listener.accept().await, Err(e) if e.is_closed()));

        let dialer = QuicTransportDialer::new(&options).unwrap();
        let result = tokio::time::timeout(Duration::from_secs(5), dialer.dial(&addr)).await;
        assert!(!matches!(result, Ok(Ok(_))), "dial to a closed listener succeeded");
    }

    #[test]
    fn test_idle_timeout_out_of_range() {
        let options = QuicOptions {
            max_idle_timeout: Some(Duration::from_secs(u64::MAX)),
            ..QuicOptions::default()
        };
        assert!(matches!(
            transport_config(&options),
            Err(TransportError::Config(_))
        ));
    }
}
