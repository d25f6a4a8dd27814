//! Error types for the transport crate.

use bridge_core::errors::{ERROR_CONFIG, ERROR_IO, ERROR_QUIC, ERROR_TIMEOUT, ERROR_TLS};
use thiserror::Error;

/// Errors that can occur in transport operations.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("certificate generation failed: {0}")]
    CertGeneration(String),

    #[error("QUIC connect error: {0}")]
    QuicConnect(#[from] quinn::ConnectError),

    #[error("QUIC connection error: {0}")]
    QuicConnection(#[from] quinn::ConnectionError),

    #[error("QUIC stream write error: {0}")]
    QuicWrite(#[from] quinn::WriteError),

    #[error("QUIC stream read error: {0}")]
    QuicRead(#[from] quinn::ReadExactError),

    #[error("unexpected stream-open marker {0:#04x}")]
    BadMarker(u8),

    #[error("handshake timed out")]
    HandshakeTimeout,

    #[error("address did not resolve: {0}")]
    Unresolved(String),

    #[error("listener closed")]
    Closed,
}

impl TransportError {
    /// The listener is gone for good; accepting again cannot succeed.
    pub fn is_closed(&self) -> bool {
        matches!(self, TransportError::Closed)
    }

    /// Get the error kind string for log fields.
    pub fn error_kind(&self) -> &'static str {
        match self {
            TransportError::Io(_) | TransportError::Unresolved(_) | TransportError::Closed => {
                ERROR_IO
            }
            TransportError::Tls(_) | TransportError::CertGeneration(_) => ERROR_TLS,
            TransportError::Config(_) => ERROR_CONFIG,
            TransportError::QuicConnect(_)
            | TransportError::QuicConnection(_)
            | TransportError::QuicWrite(_)
            | TransportError::QuicRead(_)
            | TransportError::BadMarker(_) => ERROR_QUIC,
            TransportError::HandshakeTimeout => ERROR_TIMEOUT,
        }
    }
}
