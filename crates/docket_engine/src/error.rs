//! Engine error type.

use docket_protocol::ErrorPayload;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// A structured failure from a document-store operation.
///
/// Carries a short machine-readable name plus an optional reason and
/// status, the same shape the wire error payload uses, so a failed engine
/// call converts losslessly into an error result frame.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{error}{}", .reason.as_ref().map(|r| format!(": {r}")).unwrap_or_default())]
pub struct EngineError {
    /// Short error name, e.g. `not_found`.
    pub error: String,
    /// Human-readable explanation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Optional status code.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl EngineError {
    /// Creates an error with just a name.
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            reason: None,
            status: None,
        }
    }

    /// Creates an error with a name and a reason.
    pub fn with_reason(error: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            reason: Some(reason.into()),
            status: None,
        }
    }

    /// Sets the status code.
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// A document or revision that does not exist.
    pub fn not_found(reason: impl Into<String>) -> Self {
        Self::with_reason("not_found", reason).with_status(404)
    }

    /// A write that conflicts with the stored revision.
    pub fn conflict() -> Self {
        Self::with_reason("conflict", "Document update conflict").with_status(409)
    }

    /// A request the engine cannot interpret.
    pub fn bad_request(reason: impl Into<String>) -> Self {
        Self::with_reason("bad_request", reason).with_status(400)
    }

    /// Returns true if this is a missing-document or missing-attachment
    /// failure.
    pub fn is_not_found(&self) -> bool {
        self.error == "not_found"
    }
}

impl From<EngineError> for ErrorPayload {
    fn from(err: EngineError) -> Self {
        ErrorPayload {
            error: err.error,
            reason: err.reason,
            status: err.status,
        }
    }
}
