//! Wiring a config to concrete transports.
//!
//! The relay always bridges TCP and QUIC: it listens on one and dials the
//! other. Binding happens up front so that startup failures surface before
//! the accept loop runs.

use std::net::SocketAddr;

use bridge_transport::{
    QuicTransportDialer, QuicTransportListener, TcpTransportDialer, TcpTransportListener,
    TransportError, TransportKind, TransportListener,
};
use tracing::info;

use crate::config::RelayConfig;
use crate::engine::{self, EngineOptions};
use crate::error::RelayError;
use crate::shutdown::ShutdownSignal;

enum Bound {
    TcpToQuic(TcpTransportListener, QuicTransportDialer),
    QuicToTcp(QuicTransportListener, TcpTransportDialer),
}

/// A relay whose listener is bound and whose dialer is ready.
pub struct Relay {
    bound: Bound,
    local_addr: SocketAddr,
    remote: String,
    options: EngineOptions,
}

impl Relay {
    /// Validate `config`, bind the listener and prepare the dialer.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn bind(config: &RelayConfig) -> Result<Self, RelayError> {
        config.validate()?;

        let listen = &config.listen;
        let bind_err = |source: TransportError| RelayError::Bind {
            kind: listen.transport,
            addr: listen.addr,
            source,
        };

        let bound = match (listen.transport, config.remote.transport) {
            (TransportKind::Tcp, TransportKind::Quic) => {
                let listener = TcpTransportListener::bind(listen.addr, config.tcp.backlog)
                    .map_err(bind_err)?
                    .with_nodelay(config.tcp.nodelay);
                let dialer = QuicTransportDialer::new(&config.quic_options())?;
                Bound::TcpToQuic(listener, dialer)
            }
            (TransportKind::Quic, TransportKind::Tcp) => {
                let listener = QuicTransportListener::bind(
                    listen.addr,
                    config.quic.tls.as_ref(),
                    &config.quic_options(),
                )
                .map_err(bind_err)?;
                let dialer = TcpTransportDialer::new().with_nodelay(config.tcp.nodelay);
                Bound::QuicToTcp(listener, dialer)
            }
            (listen_kind, remote_kind) => {
                return Err(RelayError::Config(format!(
                    "cannot relay {listen_kind} to {remote_kind}"
                )));
            }
        };

        let local_addr = match &bound {
            Bound::TcpToQuic(listener, _) => listener.local_addr(),
            Bound::QuicToTcp(listener, _) => listener.local_addr(),
        };

        Ok(Self {
            bound,
            local_addr,
            remote: config.remote.addr.clone(),
            options: config.engine_options(),
        })
    }

    /// The bound listen address (resolves port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Run the accept loop until `shutdown` fires.
    pub async fn serve(self, shutdown: ShutdownSignal) -> Result<(), RelayError> {
        match self.bound {
            Bound::TcpToQuic(listener, dialer) => {
                announce(&listener, TransportKind::Tcp, &self.remote, TransportKind::Quic);
                engine::serve(listener, dialer, self.remote, self.options, shutdown).await
            }
            Bound::QuicToTcp(listener, dialer) => {
                announce(&listener, TransportKind::Quic, &self.remote, TransportKind::Tcp);
                engine::serve(listener, dialer, self.remote, self.options, shutdown).await
            }
        }
    }
}

fn announce<L: TransportListener>(
    listener: &L,
    listen: TransportKind,
    remote: &str,
    dial: TransportKind,
) {
    info!(
        version = bridge_core::VERSION,
        listen = %listener.listen_addr(),
        transport = %listen,
        remote = %remote,
        remote_transport = %dial,
        "relay started"
    );
}

/// Bind and serve `config` until `shutdown` fires.
pub async fn run(config: RelayConfig, shutdown: ShutdownSignal) -> Result<(), RelayError> {
    Relay::bind(&config)?.serve(shutdown).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ListenConfig, RemoteConfig};

    fn config(listen: TransportKind, remote: TransportKind) -> RelayConfig {
        RelayConfig::new(
            ListenConfig {
                transport: listen,
                addr: "127.0.0.1:0".parse().unwrap(),
            },
            RemoteConfig {
                transport: remote,
                addr: "127.0.0.1:9".into(),
            },
        )
    }

    #[tokio::test]
    async fn test_bind_both_directions() {
        let relay = Relay::bind(&config(TransportKind::Tcp, TransportKind::Quic)).unwrap();
        assert_ne!(relay.local_addr().port(), 0);

        let relay = Relay::bind(&config(TransportKind::Quic, TransportKind::Tcp)).unwrap();
        assert_ne!(relay.local_addr().port(), 0);
    }

    #[tokio::test]
    async fn test_bind_rejects_same_transport() {
        let err = Relay::bind(&config(TransportKind::Tcp, TransportKind::Tcp))
            .err()
            .unwrap();
        assert!(matches!(err, RelayError::Config(_)));
    }

    #[tokio::test]
    async fn test_bind_address_in_use() {
        let first = Relay::bind(&config(TransportKind::Tcp, TransportKind::Quic)).unwrap();
        let mut taken = config(TransportKind::Tcp, TransportKind::Quic);
        taken.listen.addr = first.local_addr();

        // SO_REUSEADDR does not allow two listening sockets on one port.
        let err = Relay::bind(&taken).err().unwrap();
        assert!(matches!(err, RelayError::Bind { .. }));
    }

    #[tokio::test]
    async fn test_serve_stops_on_shutdown() {
        let relay = Relay::bind(&config(TransportKind::Quic, TransportKind::Tcp)).unwrap();
        let shutdown = ShutdownSignal::new();
        shutdown.fire();
        tokio::time::timeout(std::time::Duration::from_secs(2), relay.serve(shutdown))
            .await
            .unwrap()
            .unwrap();
    }
}
