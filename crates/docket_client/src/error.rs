//! Error types for the client.

use docket_protocol::{ErrorPayload, ProtocolError};
use docket_transport::TransportError;
use thiserror::Error;

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors surfaced to callers of a [`crate::Session`].
#[derive(Error, Debug)]
pub enum ClientError {
    /// The database address is missing a url or a name.
    #[error("you must provide a socket url and database name")]
    InvalidAddress,

    /// The session handle was closed; nothing was sent.
    #[error("this session was closed")]
    Closed,

    /// The session handle was destroyed; nothing was sent.
    #[error("this session was destroyed")]
    Destroyed,

    /// The underlying connection dropped while the call was pending.
    #[error("connection closed")]
    ConnectionClosed,

    /// The live subscription was cancelled locally.
    #[error("live subscription cancelled")]
    Cancelled,

    /// Establishing or using the transport failed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Encoding an outbound frame failed.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The server answered with an error result frame.
    #[error("server error: {0}")]
    Remote(ErrorPayload),

    /// The server answered with a reply shape the operation cannot use.
    #[error("unexpected reply: {0}")]
    UnexpectedReply(String),

    /// An inline attachment body was not valid base64.
    #[error("attachment body is not valid base64")]
    BadAttachment,

    /// A document argument that must be a JSON object was not one.
    #[error("document is not a JSON object")]
    NotAnObject,
}

impl ClientError {
    /// Returns the structured server error, if that is what this is.
    pub fn as_remote(&self) -> Option<&ErrorPayload> {
        match self {
            ClientError::Remote(payload) => Some(payload),
            _ => None,
        }
    }

    /// Returns true if the failure happened before anything was sent.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            ClientError::InvalidAddress | ClientError::Closed | ClientError::Destroyed
        )
    }
}
