//! Typed attachment access.
//!
//! Attachment bodies inside JSON results always travel base64-encoded;
//! the raw-bytes form only exists on the wire for the dedicated
//! attachment operations. These helpers are the boundary between the two:
//! they turn inline bodies back into opaque byte blobs on request.

use crate::error::{ClientError, ClientResult};
use base64::Engine as _;
use bytes::Bytes;
use serde_json::Value;
use std::collections::HashMap;

/// An attachment as a typed payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// MIME type.
    pub content_type: String,
    /// Raw body.
    pub data: Bytes,
}

impl Attachment {
    /// Creates an attachment from its parts.
    pub fn new(content_type: impl Into<String>, data: Bytes) -> Self {
        Self {
            content_type: content_type.into(),
            data,
        }
    }
}

/// Decodes one inline attachment body from a document.
///
/// Returns `None` if the document has no such attachment or the body is a
/// stub without data.
pub fn decode_inline(doc: &Value, name: &str) -> Option<ClientResult<Attachment>> {
    let att = doc.get("_attachments")?.get(name)?;
    let body = att.get("data")?.as_str()?;
    let content_type = att
        .get("content_type")
        .and_then(Value::as_str)
        .unwrap_or("application/octet-stream");

    Some(
        base64::engine::general_purpose::STANDARD
            .decode(body)
            .map(|data| Attachment::new(content_type, Bytes::from(data)))
            .map_err(|_| ClientError::BadAttachment),
    )
}

/// Decodes every inline attachment body a document carries.
///
/// Stub entries without data are skipped; a body that fails to decode
/// fails the whole call.
pub fn decode_all_inline(doc: &Value) -> ClientResult<HashMap<String, Attachment>> {
    let mut decoded = HashMap::new();
    let Some(atts) = doc.get("_attachments").and_then(Value::as_object) else {
        return Ok(decoded);
    };
    for name in atts.keys() {
        if let Some(attachment) = decode_inline(doc, name) {
            decoded.insert(name.clone(), attachment?);
        }
    }
    Ok(decoded)
}

/// Encodes raw bytes the way inline attachment bodies travel.
pub fn encode_inline(data: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(data)
}
