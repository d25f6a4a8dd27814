//! Pluggable transport abstraction for bridge-rs.
//!
//! Defines traits for accepting inbound connections and dialing outbound
//! ones, so the relay engine works over any pair of transports without
//! knowing which is which.
//!
//! # Transports
//!
//! - [`tcp`]: Plain TCP streams.
//! - [`quic`]: One bidirectional QUIC stream per connection (reliable UDP).
//! - [`memory`]: In-process streams, used to exercise the engine in tests.

pub mod error;
pub mod memory;
pub mod quic;
pub mod tcp;
pub mod tls;
pub mod tls_config;

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

pub use error::TransportError;
pub use memory::{MemoryDialer, MemoryListener, MemoryNetwork, MemoryStream};
pub use quic::{QuicOptions, QuicStream, QuicTransportDialer, QuicTransportListener};
pub use tcp::{TcpTransportDialer, TcpTransportListener};
pub use tls_config::TlsConfig;

/// Transport kinds a relay endpoint can use.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Plain TCP.
    Tcp,
    /// QUIC over UDP.
    Quic,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Tcp => f.write_str("tcp"),
            TransportKind::Quic => f.write_str("quic"),
        }
    }
}

/// A connected byte stream usable by the relay system.
pub trait TransportStream: AsyncRead + AsyncWrite + Unpin + Send + 'static {
    /// Address of the other end, used for logging only.
    fn peer(&self) -> String;

    /// Gracefully close the stream. Closing an already closed stream must not
    /// fail loudly; callers ignore the result anyway.
    fn close(&mut self) -> Pin<Box<dyn Future<Output = Result<(), TransportError>> + Send + '_>> {
        Box::pin(async move { self.shutdown().await.map_err(TransportError::from) })
    }
}

/// Accepts inbound connections on a bound local address.
pub trait TransportListener: Send + 'static {
    /// The stream type produced by this listener.
    type Stream: TransportStream;

    /// Wait for the next inbound connection.
    ///
    /// Returns [`TransportError::Closed`] once the listener has been closed.
    fn accept(
        &mut self,
    ) -> Pin<Box<dyn Future<Output = Result<Self::Stream, TransportError>> + Send + '_>>;

    /// Local address, for startup banners.
    fn listen_addr(&self) -> String;

    /// Stop accepting new connections. Idempotent; connections that were
    /// already accepted stay open.
    fn close(&mut self);
}

/// Dials outbound connections to a target address.
pub trait TransportDialer: Clone + Send + Sync + 'static {
    /// The stream type produced by this dialer.
    type Stream: TransportStream;

    /// Connect to the given `host:port` address.
    fn dial(
        &self,
        addr: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Self::Stream, TransportError>> + Send + '_>>;
}
