//! Document fixtures for tests.

use base64::Engine as _;
use serde_json::{json, Value};

/// Builds a minimal document with the given identifier.
pub fn doc(id: &str) -> Value {
    json!({"_id": id, "value": format!("payload for {id}")})
}

/// Builds a batch of documents `<prefix>0..<prefix>n`.
pub fn docs(prefix: &str, count: usize) -> Vec<Value> {
    (0..count).map(|i| doc(&format!("{prefix}{i}"))).collect()
}

/// Encodes raw bytes the way inline attachment bodies travel.
pub fn inline_attachment_body(data: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(data)
}

/// Builds a document carrying one inline attachment.
pub fn doc_with_attachment(id: &str, name: &str, content_type: &str, data: &[u8]) -> Value {
    json!({
        "_id": id,
        "_attachments": {
            name: {
                "content_type": content_type,
                "data": inline_attachment_body(data),
            }
        }
    })
}
