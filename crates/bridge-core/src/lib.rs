//! Core types and constants shared across bridge crates.
//!
//! This crate provides:
//! - Default configuration values
//! - Error kind constants for logging
//! - The bidirectional copy loop used by every relay session

pub mod defaults;
pub mod errors;
pub mod io;

// Re-export commonly used items at crate root
pub use defaults::*;
pub use errors::*;

/// Version shared by every bridge crate (from the workspace Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
