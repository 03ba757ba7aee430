//! Structured JSON payloads shared by both sides of the wire.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::binary::BlobTag;

/// A structured error body carried by error result frames.
///
/// The `error` field is a short machine-readable name; `reason` is an
/// optional human-readable explanation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Short error name, e.g. `not_found`.
    pub error: String,
    /// Human-readable explanation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Optional status code.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl ErrorPayload {
    /// Creates an error payload with just a name.
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            reason: None,
            status: None,
        }
    }

    /// Creates an error payload with a name and a reason.
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

    /// The error sent for a command name outside the wire command set.
    pub fn unknown_api_method(name: &str) -> Self {
        Self::new(format!("unknown API method: {name}"))
    }

    /// The error sent for any operation issued before `createDatabase`.
    pub fn database_not_found() -> Self {
        Self::new("database not found")
    }

    /// The error sent for a second `createDatabase` on one connection.
    pub fn file_exists() -> Self {
        Self::with_reason(
            "file_exists",
            "The database could not be created, the file already exists.",
        )
    }

    /// The error sent for an attachment the document does not carry.
    pub fn missing_attachment() -> Self {
        Self::with_reason("not_found", "missing attachment").with_status(404)
    }

    /// The error delivered to every pending call when a connection drops.
    pub fn connection_closed() -> Self {
        Self::with_reason("connection_closed", "the connection was closed")
    }

    /// The terminal delivered locally after a live subscription is cancelled.
    pub fn cancelled() -> Self {
        Self::new("cancelled")
    }
}

impl fmt::Display for ErrorPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.reason {
            Some(reason) => write!(f, "{}: {}", self.error, reason),
            None => f.write_str(&self.error),
        }
    }
}

impl std::error::Error for ErrorPayload {}

/// The metadata payload of a binary-handoff result frame.
///
/// Announces that a raw payload tagged with `blob_uuid` is (or will be)
/// in flight for the same request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BinaryHandoff {
    /// MIME type of the payload.
    pub content_type: String,
    /// Tag pairing this frame with its raw payload message.
    pub blob_uuid: BlobTag,
}

impl BinaryHandoff {
    /// Creates a handoff for the given content type under a fresh tag.
    pub fn new(content_type: impl Into<String>) -> Self {
        Self {
            content_type: content_type.into(),
            blob_uuid: BlobTag::fresh(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_payload_serialization() {
        let payload = ErrorPayload::with_reason("not_found", "missing");
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["error"], "not_found");
        assert_eq!(json["reason"], "missing");
        assert!(json.get("status").is_none());
    }

    #[test]
    fn well_known_errors() {
        assert_eq!(
            ErrorPayload::unknown_api_method("nope").error,
            "unknown API method: nope"
        );
        assert_eq!(ErrorPayload::file_exists().error, "file_exists");
        assert_eq!(ErrorPayload::missing_attachment().status, Some(404));
    }

    #[test]
    fn handoff_uses_camel_case_keys() {
        let handoff = BinaryHandoff::new("image/png");
        let json = serde_json::to_value(&handoff).unwrap();
        assert_eq!(json["contentType"], "image/png");
        assert!(json["blobUuid"].is_string());
    }
}
