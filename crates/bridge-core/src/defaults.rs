//! Default configuration values.
//!
//! Centralized default constants for use across all crates.

// ============================================================================
// Relay Defaults
// ============================================================================

/// Default copy buffer size per direction (1 MiB).
pub const DEFAULT_RELAY_BUFFER_SIZE: usize = 1024 * 1024;
/// Half-close forwarding is off by default: a session ends when either
/// direction stops.
pub const DEFAULT_HALF_CLOSE: bool = false;

// ============================================================================
// Timeout Defaults
// ============================================================================

/// Default timeout for dialing the remote endpoint, in seconds.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
/// Default timeout for completing an inbound transport handshake, in seconds.
pub const DEFAULT_HANDSHAKE_TIMEOUT_SECS: u64 = 5;
/// Default time in-flight sessions get to finish after shutdown, in seconds.
pub const DEFAULT_DRAIN_TIMEOUT_SECS: u64 = 30;
/// Grace period for cancelled sessions to release their connections.
pub const DEFAULT_CANCEL_GRACE_MS: u64 = 5000;

// ============================================================================
// Accept Loop Defaults
// ============================================================================

/// First backoff delay after an unexpected accept error.
pub const DEFAULT_ACCEPT_INITIAL_BACKOFF_MS: u64 = 5;
/// Upper bound for the accept backoff delay.
pub const DEFAULT_ACCEPT_MAX_BACKOFF_MS: u64 = 1000;
/// Consecutive accept failures after which the accept loop gives up.
pub const DEFAULT_ACCEPT_MAX_CONSECUTIVE_FAILURES: u32 = 64;

// ============================================================================
// TCP Socket Defaults
// ============================================================================

/// Default TCP listener backlog.
pub const DEFAULT_CONNECTION_BACKLOG: u32 = 1024;
/// Default TCP_NODELAY (disable Nagle's algorithm for lower latency).
pub const DEFAULT_TCP_NO_DELAY: bool = true;
/// Default host the listener binds to when only a port is given.
pub const DEFAULT_LISTEN_HOST: &str = "0.0.0.0";

// ============================================================================
// QUIC Defaults
// ============================================================================

/// Default QUIC idle timeout in seconds.
pub const DEFAULT_QUIC_IDLE_TIMEOUT_SECS: u64 = 30;
/// Default QUIC keep-alive interval in seconds (0 = disabled).
pub const DEFAULT_QUIC_KEEP_ALIVE_SECS: u64 = 10;
/// How long closing a QUIC stream waits for the peer to acknowledge data.
pub const DEFAULT_QUIC_CLOSE_LINGER_MS: u64 = 3000;
/// Default server name (SNI) presented when dialing QUIC.
pub const DEFAULT_QUIC_SERVER_NAME: &str = "localhost";
/// Default local bind address of the QUIC client endpoint.
pub const DEFAULT_QUIC_CLIENT_BIND: &str = "0.0.0.0:0";
/// ALPN protocol identifier negotiated on QUIC connections.
pub const QUIC_ALPN: &[u8] = b"bridge";
