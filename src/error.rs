//! Error types for tunmux.

use thiserror::Error;

/// Result type alias for tunmux operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while forwarding flows or multiplexing endpoints.
#[derive(Error, Debug)]
pub enum Error {
    /// Network I/O error
    #[error("network error: {0}")]
    Io(#[from] std::io::Error),

    /// Frame could not be decoded
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    /// Dial target could not be parsed
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// Network type not supported by the dialer
    #[error("unsupported network: {0}")]
    Unsupported(String),

    /// Upstream refused or could not reach the destination
    #[error("dial {target} failed")]
    DialFailed { target: String },

    /// SOCKS5 proxy rejected the request
    #[error("socks5 error: {0}")]
    Socks5(String),

    /// Operation timed out
    #[error("timeout after {0}ms")]
    Timeout(u64),

    /// The physical transport underneath a multiplexer is gone
    #[error("transport closed")]
    TransportClosed,

    /// WebSocket handshake or protocol failure
    #[error("websocket error: {0}")]
    WebSocket(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Create a new frame decoding error
    pub fn frame(msg: impl Into<String>) -> Self {
        Error::InvalidFrame(msg.into())
    }

    /// Create a new address parsing error
    pub fn address(msg: impl Into<String>) -> Self {
        Error::InvalidAddress(msg.into())
    }

    /// Create a new dial failure for `target`
    pub fn dial_failed(target: impl Into<String>) -> Self {
        Error::DialFailed {
            target: target.into(),
        }
    }

    /// Create a new SOCKS5 protocol error
    pub fn socks5(msg: impl Into<String>) -> Self {
        Error::Socks5(msg.into())
    }

    /// Create a new WebSocket error
    pub fn websocket(msg: impl Into<String>) -> Self {
        Error::WebSocket(msg.into())
    }

    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Check if this error is fatal to a whole multiplexer instance
    pub fn is_transport_failure(&self) -> bool {
        matches!(
            self,
            Error::TransportClosed | Error::Io(_) | Error::WebSocket(_)
        )
    }
}

impl From<Error> for std::io::Error {
    fn from(err: Error) -> Self {
        use std::io::ErrorKind;

        match err {
            Error::Io(e) => e,
            Error::TransportClosed => std::io::Error::new(ErrorKind::BrokenPipe, err),
            Error::Timeout(_) => std::io::Error::new(ErrorKind::TimedOut, err),
            Error::DialFailed { .. } => std::io::Error::new(ErrorKind::ConnectionRefused, err),
            Error::InvalidAddress(_) | Error::Config(_) => {
                std::io::Error::new(ErrorKind::InvalidInput, err)
            }
            Error::Unsupported(_) => std::io::Error::new(ErrorKind::Unsupported, err),
            Error::WebSocket(_) => std::io::Error::new(ErrorKind::ConnectionAborted, err),
            Error::InvalidFrame(_) | Error::Socks5(_) => {
                std::io::Error::new(ErrorKind::InvalidData, err)
            }
        }
    }
}
