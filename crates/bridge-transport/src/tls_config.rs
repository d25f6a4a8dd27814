//! TLS certificate configuration.

use serde::{Deserialize, Serialize};

/// TLS certificate and key paths (PEM).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TlsConfig {
    pub cert: String,
    pub key: String,
}
