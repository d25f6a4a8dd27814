//! # bridge-rs
//!
//! Relays TCP connections over QUIC: one bridge accepts TCP and dials a QUIC
//! peer, the other accepts QUIC and dials the TCP server.
//!
//! ## Crates
//!
//! - [`bridge_core`] - Defaults, error kinds and the bidirectional copy loop
//! - [`bridge_transport`] - TCP, QUIC and in-memory transports
//! - [`bridge_relay`] - Accept loop, relay sessions, shutdown and CLI

pub use bridge_core as core;
pub use bridge_relay as relay;
pub use bridge_transport as transport;
