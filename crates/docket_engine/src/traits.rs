//! The engine and factory trait seams.

use crate::error::EngineResult;
use crate::feed::ChangesFeed;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Options carried by the `createDatabase` command.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreateOptions {
    /// Logical database name.
    pub name: String,
    /// Whether the engine should compact automatically.
    #[serde(default)]
    pub auto_compaction: bool,
    /// Revision history bound, if the caller set one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revs_limit: Option<u32>,
}

impl CreateOptions {
    /// Creates options for a named database.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            auto_compaction: false,
            revs_limit: None,
        }
    }
}

/// A document storage engine, invoked operation by operation.
///
/// Implementations return plain JSON values shaped like the document
/// store's native responses; the dispatcher forwards them verbatim. Every
/// method may fail with a structured [`crate::EngineError`], which becomes
/// an error result frame for exactly the matching caller.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Returns the engine's stable identifier.
    async fn id(&self) -> EngineResult<Value>;

    /// Returns database information (document count, update seq, ...).
    async fn info(&self) -> EngineResult<Value>;

    /// Reads a single document.
    async fn get(&self, doc_id: &str, opts: Value) -> EngineResult<Value>;

    /// Writes a single document.
    async fn put(&self, doc: Value, opts: Value) -> EngineResult<Value>;

    /// Writes a document under a generated identifier.
    async fn post(&self, doc: Value, opts: Value) -> EngineResult<Value>;

    /// Deletes a document revision.
    async fn remove(&self, doc_id: &str, rev: Option<&str>) -> EngineResult<Value>;

    /// Writes a batch of documents.
    async fn bulk_docs(&self, request: Value, opts: Value) -> EngineResult<Value>;

    /// Enumerates documents.
    async fn all_docs(&self, opts: Value) -> EngineResult<Value>;

    /// Runs a view query.
    async fn query(&self, request: Value, opts: Value) -> EngineResult<Value>;

    /// Computes which of the given revisions are missing.
    async fn revs_diff(&self, request: Value) -> EngineResult<Value>;

    /// Compacts the database.
    async fn compact(&self, opts: Value) -> EngineResult<Value>;

    /// Cleans up stale view indexes.
    async fn view_cleanup(&self) -> EngineResult<Value>;

    /// Returns a buffered change listing.
    async fn changes(&self, opts: Value) -> EngineResult<Value>;

    /// Opens a streaming change feed.
    fn live_changes(&self, opts: Value) -> EngineResult<ChangesFeed>;

    /// Reads an attachment's raw bytes and content type.
    async fn get_attachment(
        &self,
        doc_id: &str,
        attachment_id: &str,
        opts: Value,
    ) -> EngineResult<(String, Bytes)>;

    /// Writes an attachment.
    async fn put_attachment(
        &self,
        doc_id: &str,
        attachment_id: &str,
        rev: Option<&str>,
        data: Bytes,
        content_type: &str,
    ) -> EngineResult<Value>;

    /// Deletes an attachment.
    async fn remove_attachment(
        &self,
        doc_id: &str,
        attachment_id: &str,
        rev: &str,
    ) -> EngineResult<Value>;

    /// Destroys the database.
    async fn destroy(&self) -> EngineResult<Value>;

    /// Takes the receiver for faults unrelated to any call (background
    /// compaction failures, view build crashes).
    ///
    /// Returns `None` if the channel was already taken or the engine
    /// never emits such faults.
    fn take_fault_events(&self) -> Option<mpsc::UnboundedReceiver<crate::EngineError>> {
        None
    }
}

/// Builds one engine instance per server-side connection.
#[async_trait]
pub trait EngineFactory: Send + Sync {
    /// Creates the engine for a newly bound connection.
    async fn create(&self, options: CreateOptions) -> EngineResult<Arc<dyn Engine>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn create_options_deserialization() {
        let opts: CreateOptions =
            serde_json::from_value(json!({"name": "mydb", "auto_compaction": true}))
                .unwrap();
        assert_eq!(opts.name, "mydb");
        assert!(opts.auto_compaction);
        assert_eq!(opts.revs_limit, None);

        let opts: CreateOptions =
            serde_json::from_value(json!({"name": "mydb", "revs_limit": 50})).unwrap();
        assert_eq!(opts.revs_limit, Some(50));
    }
}
