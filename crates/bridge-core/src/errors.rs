//! Error kind constants for logging.
//!
//! These constants provide consistent error classification across all crates.

/// I/O error.
pub const ERROR_IO: &str = "io";
/// Configuration error.
pub const ERROR_CONFIG: &str = "config";
/// Command line usage error.
pub const ERROR_USAGE: &str = "usage";
/// Listener could not be bound.
pub const ERROR_BIND: &str = "bind";
/// Accepting an inbound connection failed.
pub const ERROR_ACCEPT: &str = "accept";
/// Dialing the remote endpoint failed.
pub const ERROR_DIAL: &str = "dial";
/// Timeout error.
pub const ERROR_TIMEOUT: &str = "timeout";
/// TLS / certificate error.
pub const ERROR_TLS: &str = "tls";
/// QUIC connection or stream error.
pub const ERROR_QUIC: &str = "quic";
