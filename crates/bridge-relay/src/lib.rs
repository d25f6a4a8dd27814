//! Relay engine for bridge-rs.
//!
//! A relay listens on one transport and, for every accepted connection,
//! dials the configured remote over the other transport and copies bytes
//! both ways until either side stops.
//!
//! ```text
//! TCP client → bridge (tcp → quic) ⇒ QUIC ⇒ bridge (quic → tcp) → TCP server
//! ```
//!
//! # Architecture
//!
//! - [`engine`]: accept loop with retry backoff and a shutdown drain.
//! - [`session`]: one relay session (dial, copy, close).
//! - [`shutdown`]: one-shot shutdown signal and the OS signal watcher.
//! - [`relay`]: binds the concrete TCP / QUIC transports for a config.

pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod relay;
pub mod session;
pub mod shutdown;
pub mod tracker;

pub use config::RelayConfig;
pub use error::RelayError;
pub use relay::Relay;
pub use shutdown::ShutdownSignal;
