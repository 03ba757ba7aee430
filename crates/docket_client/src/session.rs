//! The public session API.

use crate::attachments::Attachment;
use crate::changes::LiveChanges;
use crate::connection::SharedConnection;
use crate::error::{ClientError, ClientResult};
use crate::options::{to_args, AllDocsOptions, ChangesOptions, GetOptions, QueryOptions};
use docket_protocol::{CommandFrame, ErrorPayload, Operation, RequestId};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

pub(crate) type ConnectionCache = Arc<Mutex<HashMap<String, Arc<SharedConnection>>>>;

/// One handle to a logical database.
///
/// Handles opened for the same database name share one connection and all
/// its in-flight state; each handle carries its own closed/destroyed
/// flags, so sending on a closed handle fails locally while other handles
/// keep working until one of them tears the shared connection down.
pub struct Session {
    shared: Arc<SharedConnection>,
    cache: ConnectionCache,
    cache_key: String,
    closed: AtomicBool,
    destroyed: AtomicBool,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("name", &self.shared.name())
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .field("destroyed", &self.destroyed.load(Ordering::SeqCst))
            .finish()
    }
}

impl Session {
    pub(crate) fn attach(
        shared: Arc<SharedConnection>,
        cache: ConnectionCache,
        cache_key: String,
    ) -> Self {
        Self {
            shared,
            cache,
            cache_key,
            closed: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
        }
    }

    /// Returns the logical database name.
    pub fn name(&self) -> &str {
        self.shared.name()
    }

    /// Subscribes to faults the server reports outside any call.
    pub fn unhandled_errors(&self) -> broadcast::Receiver<ErrorPayload> {
        self.shared.unhandled_errors()
    }

    fn guard(&self) -> ClientResult<()> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(ClientError::Destroyed);
        }
        if self.closed.load(Ordering::SeqCst) {
            return Err(ClientError::Closed);
        }
        Ok(())
    }

    async fn call(&self, operation: Operation, args: Vec<Value>) -> ClientResult<Value> {
        self.guard()?;
        self.shared.call(operation, args).await?.into_value()
    }

    /// Returns the connection identity assigned by the server transport.
    pub async fn id(&self) -> ClientResult<String> {
        let value = self.call(Operation::Id, vec![]).await?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ClientError::UnexpectedReply("id is not a string".into()))
    }

    /// Returns database information.
    pub async fn info(&self) -> ClientResult<Value> {
        self.call(Operation::Info, vec![]).await
    }

    /// Reads a document.
    pub async fn get(&self, doc_id: &str, options: &GetOptions) -> ClientResult<Value> {
        self.call(Operation::Get, vec![json!(doc_id), to_args(options)?])
            .await
    }

    /// Writes a document. The document must be a JSON object with an
    /// `_id`.
    pub async fn put(&self, doc: Value) -> ClientResult<Value> {
        if !doc.is_object() {
            return Err(ClientError::NotAnObject);
        }
        self.call(Operation::Put, vec![doc, json!({})]).await
    }

    /// Writes a document under a server-generated identifier.
    pub async fn post(&self, doc: Value) -> ClientResult<Value> {
        if !doc.is_object() {
            return Err(ClientError::NotAnObject);
        }
        self.call(Operation::Post, vec![doc, json!({})]).await
    }

    /// Deletes a document revision.
    pub async fn remove(&self, doc_id: &str, rev: &str) -> ClientResult<Value> {
        self.call(Operation::Remove, vec![json!(doc_id), json!(rev)])
            .await
    }

    /// Writes a batch of documents.
    pub async fn bulk_docs(&self, docs: Vec<Value>) -> ClientResult<Value> {
        self.call(
            Operation::BulkDocs,
            vec![json!({ "docs": docs }), json!({})],
        )
        .await
    }

    /// Enumerates documents.
    pub async fn all_docs(&self, options: &AllDocsOptions) -> ClientResult<Value> {
        self.call(Operation::AllDocs, vec![to_args(options)?]).await
    }

    /// Runs a view query. `view` names or describes the view the engine
    /// should execute.
    pub async fn query(&self, view: Value, options: &QueryOptions) -> ClientResult<Value> {
        self.call(Operation::Query, vec![view, to_args(options)?])
            .await
    }

    /// Computes which of the given revisions the database is missing.
    pub async fn revs_diff(&self, revisions: Value) -> ClientResult<Value> {
        self.call(Operation::RevsDiff, vec![revisions, json!({})])
            .await
    }

    /// Compacts the database.
    pub async fn compact(&self) -> ClientResult<Value> {
        self.call(Operation::Compact, vec![json!({})]).await
    }

    /// Cleans up stale view indexes.
    pub async fn view_cleanup(&self) -> ClientResult<Value> {
        self.call(Operation::ViewCleanup, vec![]).await
    }

    /// Fetches a buffered change listing.
    ///
    /// The server always buffers the full listing; when the options ask
    /// for a summary only, the per-change rows are discarded here and the
    /// summary fields kept.
    pub async fn changes(&self, options: &ChangesOptions) -> ClientResult<Value> {
        let mut result = self
            .call(Operation::Changes, vec![to_args(options)?])
            .await?;
        if !options.return_docs {
            if let Some(results) = result.get_mut("results") {
                *results = Value::Array(Vec::new());
            }
        }
        Ok(result)
    }

    /// Opens a live change subscription.
    pub async fn live_changes(&self, options: &ChangesOptions) -> ClientResult<LiveChanges> {
        self.guard()?;

        let request_id = RequestId::fresh();
        let (updates, completion) = self.shared.register_live(request_id.clone())?;

        let frame = CommandFrame::with_request_id(
            Operation::LiveChanges,
            request_id.clone(),
            vec![to_args(options)?],
        );
        if let Err(err) = self.shared.send_plain(frame).await {
            self.shared.remove_live(&request_id);
            return Err(err);
        }

        Ok(LiveChanges::new(
            Arc::clone(&self.shared),
            request_id,
            updates,
            completion,
        ))
    }

    /// Downloads an attachment as a typed payload.
    pub async fn get_attachment(
        &self,
        doc_id: &str,
        attachment_id: &str,
    ) -> ClientResult<Attachment> {
        self.guard()?;
        self.shared
            .call(
                Operation::GetAttachment,
                vec![json!(doc_id), json!(attachment_id), json!({})],
            )
            .await?
            .into_attachment()
    }

    /// Uploads an attachment.
    ///
    /// The raw payload travels out of band of the JSON arguments and is
    /// substituted into the engine call server-side.
    pub async fn put_attachment(
        &self,
        doc_id: &str,
        attachment_id: &str,
        rev: Option<&str>,
        data: &[u8],
        content_type: &str,
    ) -> ClientResult<Value> {
        self.guard()?;
        let args = vec![
            json!(doc_id),
            json!(attachment_id),
            rev.map(Value::from).unwrap_or(Value::Null),
            Value::Null,
            json!(content_type),
        ];
        self.shared
            .call_binary(Operation::PutAttachment, args, 3, data)
            .await?
            .into_value()
    }

    /// Deletes an attachment.
    pub async fn remove_attachment(
        &self,
        doc_id: &str,
        attachment_id: &str,
        rev: &str,
    ) -> ClientResult<Value> {
        self.call(
            Operation::RemoveAttachment,
            vec![json!(doc_id), json!(attachment_id), json!(rev)],
        )
        .await
    }

    /// Closes this handle.
    ///
    /// The first close (or destroy) across all handles to the same name
    /// removes the cache entry and tears the shared connection down;
    /// every later close is a no-op success.
    pub async fn close(&self) -> ClientResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) || self.destroyed.load(Ordering::SeqCst) {
            return Ok(());
        }
        if self.evict_cache_entry() {
            self.shared.shutdown().await;
        }
        Ok(())
    }

    /// Destroys the database, then closes the connection.
    ///
    /// If another handle already closed or destroyed it, succeeds without
    /// a round trip.
    pub async fn destroy(&self) -> ClientResult<Value> {
        if !self.evict_cache_entry() {
            return Ok(json!({"ok": true}));
        }

        let outcome = self.shared.call(Operation::Destroy, vec![]).await;
        match outcome.and_then(|reply| reply.into_value()) {
            Ok(value) => {
                self.destroyed.store(true, Ordering::SeqCst);
                self.shared.shutdown().await;
                Ok(value)
            }
            Err(err) => Err(err),
        }
    }

    /// Removes the cache entry if it still points at this connection.
    ///
    /// Returns true for exactly one caller across all handles, so the
    /// underlying teardown runs at most once.
    fn evict_cache_entry(&self) -> bool {
        let mut cache = self.cache.lock();
        match cache.get(&self.cache_key) {
            Some(entry) if Arc::ptr_eq(entry, &self.shared) => {
                cache.remove(&self.cache_key);
                true
            }
            _ => false,
        }
    }
}
