//! Plain TCP transport.
//!
//! The listener is created through `socket2` so the backlog is configurable
//! and `SO_REUSEADDR` is set; every stream gets `TCP_NODELAY` unless turned
//! off.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tracing::debug;

use crate::error::TransportError;
use crate::{TransportDialer, TransportListener, TransportStream};

impl TransportStream for TcpStream {
    fn peer(&self) -> String {
        self.peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| "unknown".to_string())
    }

    fn close(&mut self) -> Pin<Box<dyn Future<Output = Result<(), TransportError>> + Send + '_>> {
        Box::pin(async move {
            match self.shutdown().await {
                Ok(()) => Ok(()),
                // Peer reset or a second close.
                Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
                Err(e) => Err(e.into()),
            }
        })
    }
}

/// TCP listener that yields raw TCP streams.
#[derive(Debug)]
pub struct TcpTransportListener {
    listener: Option<TcpListener>,
    local_addr: SocketAddr,
    nodelay: bool,
}

impl TcpTransportListener {
    /// Bind a TCP listener with a custom backlog.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn bind(addr: SocketAddr, backlog: u32) -> Result<Self, TransportError> {
        let domain = if addr.is_ipv4() {
            Domain::IPV4
        } else {
            Domain::IPV6
        };
        let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        socket.set_nonblocking(true)?;
        socket.bind(&addr.into())?;
        socket.listen(backlog.min(i32::MAX as u32) as i32)?;
        let listener = TcpListener::from_std(std::net::TcpListener::from(socket))?;
        let local_addr = listener.local_addr()?;

        Ok(Self {
            listener: Some(listener),
            local_addr,
            nodelay: true,
        })
    }

    /// Set `TCP_NODELAY` on accepted streams (default on).
    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    /// The bound address (resolves port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl TransportListener for TcpTransportListener {
    type Stream = TcpStream;

    fn accept(
        &mut self,
    ) -> Pin<Box<dyn Future<Output = Result<Self::Stream, TransportError>> + Send + '_>> {
        Box::pin(async move {
            let Some(listener) = self.listener.as_ref() else {
                return Err(TransportError::Closed);
            };
            let (tcp, peer) = listener.accept().await?;
            if let Err(e) = tcp.set_nodelay(self.nodelay) {
                debug!(peer = %peer, error = %e, "failed to set TCP_NODELAY");
            }
            Ok(tcp)
        })
    }

    fn listen_addr(&self) -> String {
        self.local_addr.to_string()
    }

    fn close(&mut self) {
        if self.listener.take().is_some() {
            debug!(addr = %self.local_addr, "tcp listener closed");
        }
    }
}

/// Plain TCP dialer.
#[derive(Debug, Clone)]
pub struct TcpTransportDialer {
    nodelay: bool,
}

impl TcpTransportDialer {
    pub fn new() -> Self {
        Self { nodelay: true }
    }

    /// Set `TCP_NODELAY` on dialed streams (default on).
    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }
}

impl Default for TcpTransportDialer {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportDialer for TcpTransportDialer {
    type Stream = TcpStream;

    fn dial(
        &self,
        addr: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Self::Stream, TransportError>> + Send + '_>> {
        let addr = addr.to_string();
        let nodelay = self.nodelay;
        Box::pin(async move {
            let tcp = TcpStream::connect(&addr).await?;
            tcp.set_nodelay(nodelay)?;
            Ok(tcp)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_accept_and_dial() {
        let mut listener = TcpTransportListener::bind("127.0.0.1:0".parse().unwrap(), 16).unwrap();
        let addr = listener.local_addr();
        assert_ne!(addr.port(), 0);

        let dialer = TcpTransportDialer::new();
        let (accepted, dialed) = tokio::join!(listener.accept(), dialer.dial(&addr.to_string()));
        let mut accepted = accepted.unwrap();
        let mut dialed = dialed.unwrap();

        assert!(accepted.nodelay().unwrap());
        assert_eq!(dialed.peer(), addr.to_string());

        dialed.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        accepted.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let mut listener = TcpTransportListener::bind("127.0.0.1:0".parse().unwrap(), 16).unwrap();
        let addr = listener.local_addr();
        listener.close();
        listener.close();

        assert!(listener.accept().await.unwrap_err().is_closed());
        assert!(TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn test_stream_double_close() {
        let mut listener = TcpTransportListener::bind("127.0.0.1:0".parse().unwrap(), 16).unwrap();
        let addr = listener.local_addr().to_string();
        let dialer = TcpTransportDialer::new();
        let (accepted, dialed) = tokio::join!(listener.accept(), dialer.dial(&addr));
        let _accepted = accepted.unwrap();
        let mut dialed = dialed.unwrap();

        dialed.close().await.unwrap();
        // A second close is tolerated; the result is not an error worth surfacing.
        let _ = dialed.close().await;
    }

    #[tokio::test]
    async fn test_dial_refused() {
        let listener = TcpTransportListener::bind("127.0.0.1:0".parse().unwrap(), 16).unwrap();
        let addr = listener.local_addr().to_string();
        drop(listener);

        let err = TcpTransportDialer::new().dial(&addr).await.unwrap_err();
        assert!(matches!(err, TransportError::Io(_)));
    }
}
