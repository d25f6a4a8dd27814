//! Relay configuration.
//!
//! A relay listens on one transport and dials the other. The command line
//! covers the common case; a TOML file exposes the tuning knobs. Every
//! section is optional and falls back to the defaults in `bridge_core`.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use bridge_core::defaults::*;
use bridge_core::io::CopyOptions;
use bridge_transport::{QuicOptions, TlsConfig, TransportKind};
use serde::{Deserialize, Serialize};

use crate::engine::{AcceptBackoff, EngineOptions};
use crate::error::RelayError;

/// Top-level relay configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Where inbound connections are accepted.
    pub listen: ListenConfig,

    /// Where every accepted connection is relayed to.
    pub remote: RemoteConfig,

    /// Buffer size per copy direction (bytes).
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Forward end-of-stream per direction instead of ending the session as
    /// soon as either side stops.
    #[serde(default)]
    pub half_close: bool,

    #[serde(default)]
    pub timeouts: TimeoutConfig,

    #[serde(default)]
    pub accept: AcceptConfig,

    #[serde(default)]
    pub tcp: TcpConfig,

    #[serde(default)]
    pub quic: QuicConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Listening side of the relay.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ListenConfig {
    pub transport: TransportKind,
    /// Local address (ip:port).
    pub addr: SocketAddr,
}

/// Dialing side of the relay.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoteConfig {
    pub transport: TransportKind,
    /// Remote address (host:port), resolved on every dial.
    pub addr: String,
}

/// Timeout settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Bound on dialing the remote endpoint (seconds).
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Bound on the inbound QUIC handshake (seconds).
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_secs: u64,

    /// How long in-flight sessions may keep running after shutdown (seconds).
    /// Zero cancels them right away.
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout(),
            handshake_timeout_secs: default_handshake_timeout(),
            drain_timeout_secs: default_drain_timeout(),
        }
    }
}

/// Accept error handling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcceptConfig {
    /// First delay after a failed accept (milliseconds).
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Upper bound of the doubling delay (milliseconds).
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,

    /// Consecutive failures after which the relay gives up.
    #[serde(default = "default_max_failures")]
    pub max_consecutive_failures: u32,
}

impl Default for AcceptConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
            max_consecutive_failures: default_max_failures(),
        }
    }
}

/// TCP socket options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TcpConfig {
    /// Listen backlog.
    #[serde(default = "default_backlog")]
    pub backlog: u32,

    /// Set `TCP_NODELAY` on accepted and dialed streams.
    #[serde(default = "default_nodelay")]
    pub nodelay: bool,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            backlog: default_backlog(),
            nodelay: default_nodelay(),
        }
    }
}

/// QUIC endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuicConfig {
    /// SNI sent when dialing.
    #[serde(default = "default_server_name")]
    pub server_name: String,

    /// Certificate for the QUIC listener. Self-signed when absent.
    #[serde(default)]
    pub tls: Option<TlsConfig>,

    /// Connection idle timeout (seconds). Zero disables it.
    #[serde(default = "default_quic_idle_timeout")]
    pub max_idle_timeout_secs: u64,

    /// Keep-alive interval (seconds). Zero disables keep-alives.
    #[serde(default = "default_quic_keep_alive")]
    pub keep_alive_secs: u64,

    /// How long closing a stream waits for the peer to take the data (milliseconds).
    #[serde(default = "default_close_linger")]
    pub close_linger_ms: u64,

    /// Local address of the dialing endpoint.
    #[serde(default = "default_client_bind")]
    pub client_bind: SocketAddr,
}

impl Default for QuicConfig {
    fn default() -> Self {
        Self {
            server_name: default_server_name(),
            tls: None,
            max_idle_timeout_secs: default_quic_idle_timeout(),
            keep_alive_secs: default_quic_keep_alive(),
            close_linger_ms: default_close_linger(),
            client_bind: default_client_bind(),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive (e.g. "info", "bridge_relay=debug").
    #[serde(default)]
    pub level: Option<String>,
}

impl RelayConfig {
    /// A config relaying `listen` to `remote` with every default applied.
    pub fn new(listen: ListenConfig, remote: RemoteConfig) -> Self {
        Self {
            listen,
            remote,
            buffer_size: default_buffer_size(),
            half_close: DEFAULT_HALF_CLOSE,
            timeouts: TimeoutConfig::default(),
            accept: AcceptConfig::default(),
            tcp: TcpConfig::default(),
            quic: QuicConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Load a config from a TOML file.
    pub fn load(path: &Path) -> Result<Self, RelayError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            RelayError::Config(format!("failed to read config file {}: {e}", path.display()))
        })?;
        Self::from_toml(&content)
    }

    /// Parse a config from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, RelayError> {
        toml::from_str(content).map_err(|e| RelayError::Config(format!("failed to parse config: {e}")))
    }

    /// Check the invariants the engine relies on.
    pub fn validate(&self) -> Result<(), RelayError> {
        if self.listen.transport == self.remote.transport {
            return Err(RelayError::Config(format!(
                "listen and remote must use different transports, both are {}",
                self.listen.transport
            )));
        }
        if self.remote.addr.trim().is_empty() {
            return Err(RelayError::Config("remote address is empty".into()));
        }
        if self.buffer_size == 0 {
            return Err(RelayError::Config("buffer_size must be greater than zero".into()));
        }
        if self.accept.max_consecutive_failures == 0 {
            return Err(RelayError::Config(
                "accept.max_consecutive_failures must be at least 1".into(),
            ));
        }
        if self.accept.initial_backoff_ms > self.accept.max_backoff_ms {
            return Err(RelayError::Config(
                "accept.initial_backoff_ms exceeds accept.max_backoff_ms".into(),
            ));
        }
        if self.quic.server_name.is_empty() {
            return Err(RelayError::Config("quic.server_name is empty".into()));
        }
        Ok(())
    }

    /// Options for the per-session copy loop.
    pub fn copy_options(&self) -> CopyOptions {
        CopyOptions {
            buffer_size: self.buffer_size,
            half_close: self.half_close,
        }
    }

    /// Options for the QUIC listener or dialer.
    pub fn quic_options(&self) -> QuicOptions {
        let non_zero = |secs: u64| (secs > 0).then(|| Duration::from_secs(secs));
        QuicOptions {
            server_name: self.quic.server_name.clone(),
            max_idle_timeout: non_zero(self.quic.max_idle_timeout_secs),
            keep_alive_interval: non_zero(self.quic.keep_alive_secs),
            handshake_timeout: Duration::from_secs(self.timeouts.handshake_timeout_secs),
            close_linger: Duration::from_millis(self.quic.close_linger_ms),
            client_bind: self.quic.client_bind,
        }
    }

    /// Options for the accept loop and its sessions.
    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            copy: self.copy_options(),
            connect_timeout: Duration::from_secs(self.timeouts.connect_timeout_secs),
            drain_timeout: Duration::from_secs(self.timeouts.drain_timeout_secs),
            cancel_grace: Duration::from_millis(DEFAULT_CANCEL_GRACE_MS),
            backoff: AcceptBackoff {
                initial: Duration::from_millis(self.accept.initial_backoff_ms),
                max: Duration::from_millis(self.accept.max_backoff_ms),
                max_consecutive_failures: self.accept.max_consecutive_failures,
            },
        }
    }
}

fn default_buffer_size() -> usize {
    DEFAULT_RELAY_BUFFER_SIZE
}
fn default_connect_timeout() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_SECS
}
fn default_handshake_timeout() -> u64 {
    DEFAULT_HANDSHAKE_TIMEOUT_SECS
}
fn default_drain_timeout() -> u64 {
    DEFAULT_DRAIN_TIMEOUT_SECS
}
fn default_initial_backoff() -> u64 {
    DEFAULT_ACCEPT_INITIAL_BACKOFF_MS
}
fn default_max_backoff() -> u64 {
    DEFAULT_ACCEPT_MAX_BACKOFF_MS
}
fn default_max_failures() -> u32 {
    DEFAULT_ACCEPT_MAX_CONSECUTIVE_FAILURES
}
fn default_backlog() -> u32 {
    DEFAULT_CONNECTION_BACKLOG
}
fn default_nodelay() -> bool {
    DEFAULT_TCP_NO_DELAY
}
fn default_server_name() -> String {
    DEFAULT_QUIC_SERVER_NAME.to_string()
}
fn default_quic_idle_timeout() -> u64 {
    DEFAULT_QUIC_IDLE_TIMEOUT_SECS
}
fn default_quic_keep_alive() -> u64 {
    DEFAULT_QUIC_KEEP_ALIVE_SECS
}
fn default_close_linger() -> u64 {
    DEFAULT_QUIC_CLOSE_LINGER_MS
}
fn default_client_bind() -> SocketAddr {
    DEFAULT_QUIC_CLIENT_BIND
        .parse()
        .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], 0)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tcp_to_quic() -> RelayConfig {
        RelayConfig::new(
            ListenConfig {
                transport: TransportKind::Tcp,
                addr: "127.0.0.1:9000".parse().unwrap(),
            },
            RemoteConfig {
                transport: TransportKind::Quic,
                addr: "relay.example:9001".into(),
            },
        )
    }

    #[test]
    fn parse_minimal_config() {
        let toml_str = r#"
[listen]
transport = "quic"
addr = "0.0.0.0:9001"

[remote]
transport = "tcp"
addr = "127.0.0.1:22"
"#;
        let config = RelayConfig::from_toml(toml_str).unwrap();
        assert_eq!(config.listen.transport, TransportKind::Quic);
        assert_eq!(config.remote.addr, "127.0.0.1:22");
        assert_eq!(config.buffer_size, DEFAULT_RELAY_BUFFER_SIZE);
        assert!(!config.half_close);
        assert_eq!(config.timeouts.drain_timeout_secs, DEFAULT_DRAIN_TIMEOUT_SECS);
        assert_eq!(config.accept.max_consecutive_failures, DEFAULT_ACCEPT_MAX_CONSECUTIVE_FAILURES);
        assert!(config.quic.tls.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parse_full_config() {
        let toml_str = r#"
buffer_size = 65536
half_close = true

[listen]
transport = "tcp"
addr = "127.0.0.1:8000"

[remote]
transport = "quic"
addr = "peer.example:9001"

[timeouts]
connect_timeout_secs = 3
drain_timeout_secs = 0

[accept]
max_consecutive_failures = 8

[tcp]
nodelay = false

[quic]
server_name = "peer.example"
keep_alive_secs = 0
tls = { cert = "/etc/bridge/cert.pem", key = "/etc/bridge/key.pem" }

[logging]
level = "debug"
"#;
        let config = RelayConfig::from_toml(toml_str).unwrap();
        assert_eq!(config.buffer_size, 65536);
        assert!(config.half_close);
        assert_eq!(config.timeouts.connect_timeout_secs, 3);
        assert_eq!(config.timeouts.handshake_timeout_secs, DEFAULT_HANDSHAKE_TIMEOUT_SECS);
        assert!(!config.tcp.nodelay);
        assert_eq!(config.quic.tls.as_ref().unwrap().cert, "/etc/bridge/cert.pem");
        assert_eq!(config.logging.level.as_deref(), Some("debug"));

        let quic = config.quic_options();
        assert_eq!(quic.server_name, "peer.example");
        assert!(quic.keep_alive_interval.is_none());
        assert_eq!(quic.max_idle_timeout, Some(Duration::from_secs(DEFAULT_QUIC_IDLE_TIMEOUT_SECS)));

        let engine = config.engine_options();
        assert_eq!(engine.drain_timeout, Duration::ZERO);
        assert_eq!(engine.backoff.max_consecutive_failures, 8);
        assert!(engine.copy.half_close);
    }

    #[test]
    fn parse_rejects_unknown_transport() {
        let toml_str = r#"
[listen]
transport = "udt"
addr = "0.0.0.0:9001"

[remote]
transport = "tcp"
addr = "127.0.0.1:22"
"#;
        assert!(matches!(RelayConfig::from_toml(toml_str), Err(RelayError::Config(_))));
    }

    #[test]
    fn validate_rejects_same_transport() {
        let mut config = tcp_to_quic();
        config.remote.transport = TransportKind::Tcp;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("different transports"));
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut config = tcp_to_quic();
        config.buffer_size = 0;
        assert!(config.validate().is_err());

        let mut config = tcp_to_quic();
        config.remote.addr = "  ".into();
        assert!(config.validate().is_err());

        let mut config = tcp_to_quic();
        config.accept.max_consecutive_failures = 0;
        assert!(config.validate().is_err());

        let mut config = tcp_to_quic();
        config.accept.initial_backoff_ms = 10_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_missing_file() {
        let err = RelayConfig::load(Path::new("/nonexistent/bridge.toml")).unwrap_err();
        assert!(matches!(err, RelayError::Config(_)));
    }
}
