//! Error types for the relay crate.

use std::net::SocketAddr;

use bridge_core::{
    ERROR_ACCEPT, ERROR_BIND, ERROR_CONFIG, ERROR_DIAL, ERROR_TIMEOUT, ERROR_USAGE,
};
use bridge_transport::{TransportError, TransportKind};
use thiserror::Error;

/// Errors that can occur in the relay system.
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("config error: {0}")]
    Config(String),

    /// Bad command line. Reported together with the usage text.
    #[error("{0}")]
    Usage(String),

    #[error("failed to listen on {kind} {addr}: {source}")]
    Bind {
        kind: TransportKind,
        addr: SocketAddr,
        #[source]
        source: TransportError,
    },

    #[error("failed to connect to {addr}: {source}")]
    Dial {
        addr: String,
        #[source]
        source: TransportError,
    },

    #[error("connect timeout to {0}")]
    DialTimeout(String),

    #[error("session cancelled before the remote connection was established")]
    Cancelled,

    #[error("accept failed {failures} times in a row: {source}")]
    AcceptExhausted {
        failures: u32,
        #[source]
        source: TransportError,
    },

    #[error("listener closed unexpectedly")]
    ListenerClosed,
}

impl RelayError {
    /// Short error category, used as a structured log field.
    pub fn error_kind(&self) -> &'static str {
        match self {
            RelayError::Transport(e) => e.error_kind(),
            RelayError::Config(_) => ERROR_CONFIG,
            RelayError::Usage(_) => ERROR_USAGE,
            RelayError::Bind { .. } => ERROR_BIND,
            RelayError::Dial { .. } => ERROR_DIAL,
            RelayError::DialTimeout(_) => ERROR_TIMEOUT,
            RelayError::Cancelled => ERROR_DIAL,
            RelayError::AcceptExhausted { .. } | RelayError::ListenerClosed => ERROR_ACCEPT,
        }
    }

    /// Whether the error comes from bad command line input.
    pub fn is_usage(&self) -> bool {
        matches!(self, RelayError::Usage(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(RelayError::Usage("x".into()).error_kind(), ERROR_USAGE);
        assert_eq!(RelayError::DialTimeout("h:1".into()).error_kind(), ERROR_TIMEOUT);
        assert_eq!(RelayError::ListenerClosed.error_kind(), ERROR_ACCEPT);
        let err = RelayError::AcceptExhausted {
            failures: 3,
            source: TransportError::Closed,
        };
        assert_eq!(err.error_kind(), ERROR_ACCEPT);
        assert!(err.to_string().contains("3 times"));
    }

    #[test]
    fn test_usage_display_is_bare_message() {
        let err = RelayError::Usage("tcp port should be specified for listening.".into());
        assert!(err.is_usage());
        assert_eq!(err.to_string(), "tcp port should be specified for listening.");
    }
}
