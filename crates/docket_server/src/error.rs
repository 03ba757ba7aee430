//! Error types for the server.

use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can stop the server or one of its connections.
///
/// Faults scoped to a single request never surface here; they are encoded
/// as error result frames for the caller that issued the request.
#[derive(Error, Debug)]
pub enum ServerError {
    /// The listener or a connection failed at the transport layer.
    #[error("transport error: {0}")]
    Transport(#[from] docket_transport::TransportError),

    /// Internal invariant violation.
    #[error("internal error: {0}")]
    Internal(String),
}
