//! Error types for the transport layer.

use thiserror::Error;

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Errors that can occur while connecting or moving messages.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Establishing the connection failed.
    #[error("connect failed: {0}")]
    Connect(String),

    /// The connection is closed; no further messages can move.
    #[error("connection closed")]
    Closed,

    /// An I/O fault on an established connection.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// An inbound message exceeded the framing bound.
    #[error("message of {size} bytes exceeds limit of {limit}")]
    MessageTooLarge {
        /// Declared size of the offending message.
        size: usize,
        /// Configured maximum.
        limit: usize,
    },

    /// The peer sent bytes that do not form a valid frame.
    #[error("invalid wire frame: {0}")]
    InvalidFrame(String),
}

impl TransportError {
    /// Returns true if the connection is unusable after this error.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, TransportError::MessageTooLarge { .. })
    }
}
