//! Command line interface.
//!
//! Exactly one remote address selects the direction: `--quic-addr` relays
//! local TCP connections to a QUIC peer, `--tcp-addr` relays local QUIC
//! connections to a TCP server. The matching `--tcp-port` / `--quic-port`
//! picks the local listening port.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use bridge_core::defaults::DEFAULT_LISTEN_HOST;
use bridge_transport::TransportKind;
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{ListenConfig, RelayConfig, RemoteConfig};
use crate::error::RelayError;
use crate::shutdown::{ShutdownSignal, watch_os_signals};

/// CLI arguments for the relay.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "bridge",
    version,
    about = "Relay TCP connections over QUIC and back"
)]
pub struct RelayArgs {
    /// Remote QUIC address to relay to (host:port). Listens on --tcp-port.
    #[arg(long, value_name = "HOST:PORT")]
    pub quic_addr: Option<String>,

    /// Local QUIC port to listen on (with --tcp-addr).
    #[arg(long, value_name = "PORT")]
    pub quic_port: Option<u16>,

    /// Remote TCP address to relay to (host:port). Listens on --quic-port.
    #[arg(long, value_name = "HOST:PORT")]
    pub tcp_addr: Option<String>,

    /// Local TCP port to listen on (with --quic-addr).
    #[arg(long, value_name = "PORT")]
    pub tcp_port: Option<u16>,

    /// Local address the listener binds to.
    #[arg(long, value_name = "IP", default_value = DEFAULT_LISTEN_HOST)]
    pub listen_host: IpAddr,

    /// Copy buffer size per direction (bytes).
    #[arg(long, value_name = "BYTES")]
    pub bufsize: Option<usize>,

    /// Forward end-of-stream per direction instead of closing the session
    /// when either side stops.
    #[arg(long)]
    pub half_close: bool,

    /// Remote connect timeout (seconds).
    #[arg(long, value_name = "SECS")]
    pub connect_timeout: Option<u64>,

    /// Time in-flight sessions may keep running after shutdown (seconds).
    #[arg(long, value_name = "SECS")]
    pub drain_timeout: Option<u64>,

    /// Config file path (toml). Command line flags override it.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log level override (e.g. "info", "debug", "trace").
    #[arg(long)]
    pub log_level: Option<String>,
}

impl RelayArgs {
    /// Build and validate the relay config described by these arguments.
    pub fn into_config(self) -> Result<RelayConfig, RelayError> {
        let endpoints = self.endpoints()?;
        let base = match &self.config {
            Some(path) => Some(RelayConfig::load(path)?),
            None => None,
        };

        let mut config = match (base, endpoints) {
            (Some(mut config), Some((listen, remote))) => {
                config.listen = listen;
                config.remote = remote;
                config
            }
            (Some(config), None) => config,
            (None, Some((listen, remote))) => RelayConfig::new(listen, remote),
            (None, None) => {
                return Err(RelayError::Usage(
                    "either quic or tcp address should be specified.".into(),
                ));
            }
        };

        if let Some(size) = self.bufsize {
            config.buffer_size = size;
        }
        if self.half_close {
            config.half_close = true;
        }
        if let Some(secs) = self.connect_timeout {
            config.timeouts.connect_timeout_secs = secs;
        }
        if let Some(secs) = self.drain_timeout {
            config.timeouts.drain_timeout_secs = secs;
        }
        if self.log_level.is_some() {
            config.logging.level = self.log_level;
        }

        config.validate()?;
        Ok(config)
    }

    /// Listen and remote endpoints from the address and port flags.
    /// `None` when no address flag was given at all.
    fn endpoints(&self) -> Result<Option<(ListenConfig, RemoteConfig)>, RelayError> {
        let given = |addr: &Option<String>| addr.clone().filter(|a| !a.trim().is_empty());
        let quic_addr = given(&self.quic_addr);
        let tcp_addr = given(&self.tcp_addr);
        // Port 0 counts as not given.
        let quic_port = self.quic_port.filter(|p| *p != 0);
        let tcp_port = self.tcp_port.filter(|p| *p != 0);

        let (listen_kind, port, remote_kind, addr) = match (quic_addr, tcp_addr) {
            (Some(_), Some(_)) => {
                return Err(RelayError::Usage(
                    "both quic and tcp address shouldn't be specified.".into(),
                ));
            }
            (Some(addr), None) => {
                let port = tcp_port.ok_or_else(|| {
                    RelayError::Usage("tcp port should be specified for listening.".into())
                })?;
                (TransportKind::Tcp, port, TransportKind::Quic, addr)
            }
            (None, Some(addr)) => {
                let port = quic_port.ok_or_else(|| {
                    RelayError::Usage("quic port should be specified for listening.".into())
                })?;
                (TransportKind::Quic, port, TransportKind::Tcp, addr)
            }
            (None, None) => {
                if quic_port.is_some() || tcp_port.is_some() || self.config.is_none() {
                    return Err(RelayError::Usage(
                        "either quic or tcp address should be specified.".into(),
                    ));
                }
                return Ok(None);
            }
        };

        Ok(Some((
            ListenConfig {
                transport: listen_kind,
                addr: SocketAddr::new(self.listen_host, port),
            },
            RemoteConfig {
                transport: remote_kind,
                addr,
            },
        )))
    }
}

/// Run the relay with the given CLI arguments until a shutdown signal.
pub async fn run(args: RelayArgs) -> Result<(), RelayError> {
    let config = args.into_config()?;

    init_tracing(config.logging.level.as_deref());

    let shutdown = ShutdownSignal::new();
    tokio::spawn(watch_os_signals(shutdown.clone()));

    crate::relay::run(config, shutdown).await
}

fn init_tracing(level: Option<&str>) {
    let level = level.unwrap_or("info");
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(io::stderr))
        .init();
}
