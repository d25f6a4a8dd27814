//! In-process transport.
//!
//! A [`MemoryNetwork`] is a registry of named listeners. Dialing a name
//! creates a `tokio::io::duplex` pair and hands one half to the listener.
//! Dialing a name nobody listens on fails with `ConnectionRefused`, which
//! makes dial failures easy to provoke in tests.

use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::{TransportDialer, TransportListener, TransportStream};

/// Per-direction buffer of a memory stream.
const DEFAULT_PIPE_CAPACITY: usize = 64 * 1024;
/// Pending connections a memory listener queues before dialers wait.
const LISTEN_BACKLOG: usize = 64;

struct Registry {
    listeners: Mutex<HashMap<String, mpsc::Sender<MemoryStream>>>,
    next_id: AtomicU64,
    capacity: usize,
}

/// A set of named in-process listeners.
#[derive(Clone)]
pub struct MemoryNetwork {
    inner: Arc<Registry>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_PIPE_CAPACITY)
    }

    /// Create a network whose streams buffer `capacity` bytes per direction.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Registry {
                listeners: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                capacity: capacity.max(1),
            }),
        }
    }

    /// Start listening on `name`.
    pub fn listen(&self, name: &str) -> Result<MemoryListener, TransportError> {
        let mut listeners = self.inner.listeners.lock();
        if listeners.get(name).is_some_and(|tx| !tx.is_closed()) {
            return Err(TransportError::Io(io::Error::new(
                io::ErrorKind::AddrInUse,
                format!("memory address {name} already in use"),
            )));
        }

        let (tx, incoming) = mpsc::channel(LISTEN_BACKLOG);
        listeners.insert(name.to_string(), tx);

        Ok(MemoryListener {
            name: name.to_string(),
            network: self.clone(),
            incoming,
            closed: false,
        })
    }

    /// A dialer connecting to listeners of this network.
    pub fn dialer(&self) -> MemoryDialer {
        MemoryDialer {
            network: self.clone(),
        }
    }

    fn unregister(&self, name: &str) {
        let mut listeners = self.inner.listeners.lock();
        // Only drop the entry if it still belongs to a closed listener.
        if listeners.get(name).is_some_and(|tx| tx.is_closed()) {
            listeners.remove(name);
        }
    }
}

impl Default for MemoryNetwork {
    fn default() -> Self {
        Self::new()
    }
}

/// One end of an in-process connection.
#[derive(Debug)]
pub struct MemoryStream {
    inner: DuplexStream,
    peer: String,
}

impl AsyncRead for MemoryStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for MemoryStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

impl TransportStream for MemoryStream {
    fn peer(&self) -> String {
        self.peer.clone()
    }
}

/// Listener registered under a name in a [`MemoryNetwork`].
pub struct MemoryListener {
    name: String,
    network: MemoryNetwork,
    incoming: mpsc::Receiver<MemoryStream>,
    closed: bool,
}

impl TransportListener for MemoryListener {
    type Stream = MemoryStream;

    fn accept(
        &mut self,
    ) -> Pin<Box<dyn Future<Output = Result<Self::Stream, TransportError>> + Send + '_>> {
        Box::pin(async move {
            if self.closed {
                return Err(TransportError::Closed);
            }
            self.incoming.recv().await.ok_or(TransportError::Closed)
        })
    }

    fn listen_addr(&self) -> String {
        format!("memory:{}", self.name)
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.incoming.close();
        self.network.unregister(&self.name);
    }
}

impl Drop for MemoryListener {
    fn drop(&mut self) {
        self.close();
    }
}

/// Dialer for a [`MemoryNetwork`].
#[derive(Clone)]
pub struct MemoryDialer {
    network: MemoryNetwork,
}

impl TransportDialer for MemoryDialer {
    type Stream = MemoryStream;

    fn dial(
        &self,
        addr: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Self::Stream, TransportError>> + Send + '_>> {
        let addr = addr.to_string();
        Box::pin(async move {
            let refused = || {
                TransportError::Io(io::Error::new(
                    io::ErrorKind::ConnectionRefused,
                    format!("nothing listens on memory address {addr}"),
                ))
            };

            let listener = self.network.inner.listeners.lock().get(&addr).cloned();
            let listener = listener.ok_or_else(refused)?;

            let id = self.network.inner.next_id.fetch_add(1, Ordering::Relaxed);
            let (near, far) = tokio::io::duplex(self.network.inner.capacity);
            let accepted = MemoryStream {
                inner: far,
                peer: format!("memory-client#{id}"),
            };
            listener.send(accepted).await.map_err(|_| refused())?;

            Ok(MemoryStream {
                inner: near,
                peer: format!("memory:{addr}"),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_dial_and_accept() {
        let network = MemoryNetwork::new();
        let mut listener = network.listen("target").unwrap();
        let dialer = network.dialer();

        let mut client = dialer.dial("target").await.unwrap();
        let mut server = listener.accept().await.unwrap();
        assert_eq!(client.peer(), "memory:target");
        assert!(server.peer().starts_with("memory-client#"));

        client.write_all(b"hi").await.unwrap();
        let mut buf = [0u8; 2];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hi");
    }

    #[tokio::test]
    async fn test_dial_unknown_is_refused() {
        let network = MemoryNetwork::new();
        let err = network.dialer().dial("nowhere").await.unwrap_err();
        match err {
            TransportError::Io(e) => assert_eq!(e.kind(), io::ErrorKind::ConnectionRefused),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_close_releases_name() {
        let network = MemoryNetwork::new();
        let mut listener = network.listen("svc").unwrap();
        assert!(network.listen("svc").is_err());

        listener.close();
        listener.close();
        assert!(listener.accept().await.unwrap_err().is_closed());
        assert!(network.dialer().dial("svc").await.is_err());

        let _again = network.listen("svc").unwrap();
    }

    #[tokio::test]
    async fn test_double_close_stream() {
        let network = MemoryNetwork::new();
        let mut listener = network.listen("svc").unwrap();
        let mut client = network.dialer().dial("svc").await.unwrap();
        let mut server = listener.accept().await.unwrap();

        client.close().await.unwrap();
        client.close().await.unwrap();

        let mut rest = Vec::new();
        server.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }
}
