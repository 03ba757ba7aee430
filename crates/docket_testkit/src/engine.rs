//! In-memory document engine.

use async_trait::async_trait;
use base64::Engine as _;
use bytes::Bytes;
use docket_engine::{
    ChangesFeed, CreateOptions, Engine, EngineError, EngineFactory, EngineResult, FeedEmitter,
};
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

const CHANGE_BUFFER: usize = 256;

#[derive(Default)]
struct Store {
    docs: BTreeMap<String, Value>,
    update_seq: u64,
    changes: Vec<Value>,
    destroyed: bool,
}

impl Store {
    fn guard(&self) -> EngineResult<()> {
        if self.destroyed {
            Err(EngineError::with_reason(
                "destroyed",
                "this database has been destroyed",
            ))
        } else {
            Ok(())
        }
    }

    fn next_rev(&mut self, previous: Option<&str>) -> String {
        self.update_seq += 1;
        let generation = previous
            .and_then(|rev| rev.split('-').next())
            .and_then(|g| g.parse::<u64>().ok())
            .unwrap_or(0);
        format!("{}-{:08x}", generation + 1, self.update_seq)
    }

    fn record_change(&mut self, id: &str, rev: &str, deleted: bool) -> Value {
        let mut row = json!({
            "seq": self.update_seq,
            "id": id,
            "changes": [{"rev": rev}],
        });
        if deleted {
            row["deleted"] = Value::Bool(true);
        }
        self.changes.push(row.clone());
        row
    }
}

/// A naive in-memory document engine.
///
/// Implements just enough revision and attachment semantics for the
/// protocol layers to be driven end to end: linear revisions
/// (`generation-sequence`), conflict detection on mismatched revisions,
/// inline base64 attachments, a change log and a live feed.
pub struct MemoryEngine {
    name: String,
    engine_id: String,
    state: Mutex<Store>,
    change_tx: broadcast::Sender<Value>,
    fault_tx: mpsc::UnboundedSender<EngineError>,
    fault_rx: Mutex<Option<mpsc::UnboundedReceiver<EngineError>>>,
}

impl MemoryEngine {
    /// Creates an engine for the given logical database name.
    pub fn new(name: impl Into<String>) -> Self {
        let (change_tx, _) = broadcast::channel(CHANGE_BUFFER);
        let (fault_tx, fault_rx) = mpsc::unbounded_channel();
        Self {
            name: name.into(),
            engine_id: format!("memory-{}", Uuid::new_v4()),
            state: Mutex::new(Store::default()),
            change_tx,
            fault_tx,
            fault_rx: Mutex::new(Some(fault_rx)),
        }
    }

    /// Returns the logical database name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Emits a fault unrelated to any call, as a background task would.
    pub fn inject_fault(&self, error: EngineError) {
        let _ = self.fault_tx.send(error);
    }

    /// Returns the number of stored documents.
    pub fn doc_count(&self) -> usize {
        self.state.lock().docs.len()
    }

    fn write_doc(&self, mut doc: Value, deleted: bool) -> EngineResult<Value> {
        let id = doc["_id"]
            .as_str()
            .ok_or_else(|| EngineError::bad_request("document has no _id"))?
            .to_string();

        let mut state = self.state.lock();
        state.guard()?;

        let stored_rev = state
            .docs
            .get(&id)
            .and_then(|d| d["_rev"].as_str())
            .map(str::to_string);
        if stored_rev.as_deref() != doc["_rev"].as_str() {
            return Err(EngineError::conflict());
        }

        let new_rev = state.next_rev(stored_rev.as_deref());
        let row = state.record_change(&id, &new_rev, deleted);

        if deleted {
            state.docs.remove(&id);
        } else {
            doc["_rev"] = Value::String(new_rev.clone());
            state.docs.insert(id.clone(), doc);
        }
        drop(state);

        let _ = self.change_tx.send(row);
        Ok(json!({"ok": true, "id": id, "rev": new_rev}))
    }

    fn doc_for_read(doc: &Value, with_attachment_bodies: bool) -> Value {
        let mut doc = doc.clone();
        if with_attachment_bodies {
            return doc;
        }
        // Replace bodies with stubs, the document store's default shape.
        if let Some(atts) = doc.get_mut("_attachments").and_then(Value::as_object_mut) {
            for att in atts.values_mut() {
                if let Some(att) = att.as_object_mut() {
                    att.remove("data");
                    att.insert("stub".into(), Value::Bool(true));
                }
            }
        }
        doc
    }

    fn change_rows(state: &Store, since: u64, include_docs: bool) -> Vec<Value> {
        state
            .changes
            .iter()
            .filter(|row| row["seq"].as_u64().unwrap_or(0) > since)
            .map(|row| {
                let mut row = row.clone();
                if include_docs {
                    if let Some(doc) = row["id"].as_str().and_then(|id| state.docs.get(id)) {
                        row["doc"] = Self::doc_for_read(doc, false);
                    }
                }
                row
            })
            .collect()
    }
}

fn opt_bool(opts: &Value, key: &str) -> bool {
    opts.get(key).and_then(Value::as_bool).unwrap_or(false)
}

fn opt_u64(opts: &Value, key: &str) -> u64 {
    opts.get(key).and_then(Value::as_u64).unwrap_or(0)
}

#[async_trait]
impl Engine for MemoryEngine {
    async fn id(&self) -> EngineResult<Value> {
        Ok(Value::String(self.engine_id.clone()))
    }

    async fn info(&self) -> EngineResult<Value> {
        let state = self.state.lock();
        state.guard()?;
        Ok(json!({
            "db_name": self.name,
            "doc_count": state.docs.len(),
            "update_seq": state.update_seq,
        }))
    }

    async fn get(&self, doc_id: &str, opts: Value) -> EngineResult<Value> {
        let state = self.state.lock();
        state.guard()?;
        let doc = state
            .docs
            .get(doc_id)
            .ok_or_else(|| EngineError::not_found("missing"))?;
        Ok(Self::doc_for_read(doc, opt_bool(&opts, "attachments")))
    }

    async fn put(&self, doc: Value, _opts: Value) -> EngineResult<Value> {
        self.write_doc(doc, false)
    }

    async fn post(&self, mut doc: Value, _opts: Value) -> EngineResult<Value> {
        if !doc.is_object() {
            return Err(EngineError::bad_request("document must be an object"));
        }
        if doc.get("_id").is_none() {
            doc["_id"] = Value::String(Uuid::new_v4().to_string());
        }
        self.write_doc(doc, false)
    }

    async fn remove(&self, doc_id: &str, rev: Option<&str>) -> EngineResult<Value> {
        let mut tombstone = json!({"_id": doc_id});
        if let Some(rev) = rev {
            tombstone["_rev"] = Value::String(rev.to_string());
        }
        self.write_doc(tombstone, true)
    }

    async fn bulk_docs(&self, request: Value, _opts: Value) -> EngineResult<Value> {
        let docs = request
            .get("docs")
            .and_then(Value::as_array)
            .cloned()
            .or_else(|| request.as_array().cloned())
            .ok_or_else(|| EngineError::bad_request("bulkDocs needs a docs array"))?;

        let mut results = Vec::with_capacity(docs.len());
        for mut doc in docs {
            if !doc.is_object() {
                results.push(json!({"error": "bad_request", "reason": "document must be an object"}));
                continue;
            }
            if doc.get("_id").is_none() {
                doc["_id"] = Value::String(Uuid::new_v4().to_string());
            }
            match self.write_doc(doc.clone(), false) {
                Ok(row) => results.push(row),
                Err(err) => results.push(json!({
                    "id": doc["_id"],
                    "error": err.error,
                    "reason": err.reason,
                })),
            }
        }
        Ok(Value::Array(results))
    }

    async fn all_docs(&self, opts: Value) -> EngineResult<Value> {
        let state = self.state.lock();
        state.guard()?;
        let include_docs = opt_bool(&opts, "include_docs");
        let attachments = opt_bool(&opts, "attachments");

        let rows: Vec<Value> = state
            .docs
            .iter()
            .map(|(id, doc)| {
                let mut row = json!({
                    "id": id,
                    "key": id,
                    "value": {"rev": doc["_rev"]},
                });
                if include_docs {
                    row["doc"] = Self::doc_for_read(doc, attachments);
                }
                row
            })
            .collect();

        Ok(json!({
            "total_rows": rows.len(),
            "offset": 0,
            "rows": rows,
        }))
    }

    async fn query(&self, _request: Value, opts: Value) -> EngineResult<Value> {
        // No view engine here: a query enumerates documents keyed by id,
        // which is all the protocol tests need.
        let state = self.state.lock();
        state.guard()?;
        let include_docs = opt_bool(&opts, "include_docs");

        let rows: Vec<Value> = state
            .docs
            .iter()
            .map(|(id, doc)| {
                let mut row = json!({"id": id, "key": id, "value": doc.get("value")});
                if include_docs {
                    row["doc"] = Self::doc_for_read(doc, false);
                }
                row
            })
            .collect();

        Ok(json!({"total_rows": rows.len(), "offset": 0, "rows": rows}))
    }

    async fn revs_diff(&self, request: Value) -> EngineResult<Value> {
        let state = self.state.lock();
        state.guard()?;
        let request = request
            .as_object()
            .ok_or_else(|| EngineError::bad_request("revsDiff needs an object"))?;

        let mut diff = Map::new();
        for (id, revs) in request {
            let revs = revs.as_array().cloned().unwrap_or_default();
            let stored = state.docs.get(id).and_then(|d| d["_rev"].as_str());
            let missing: Vec<Value> = revs
                .into_iter()
                .filter(|rev| rev.as_str() != stored)
                .collect();
            if !missing.is_empty() {
                diff.insert(id.clone(), json!({"missing": missing}));
            }
        }
        Ok(Value::Object(diff))
    }

    async fn compact(&self, _opts: Value) -> EngineResult<Value> {
        self.state.lock().guard()?;
        Ok(json!({"ok": true}))
    }

    async fn view_cleanup(&self) -> EngineResult<Value> {
        self.state.lock().guard()?;
        Ok(json!({"ok": true}))
    }

    async fn changes(&self, opts: Value) -> EngineResult<Value> {
        let state = self.state.lock();
        state.guard()?;
        let results = Self::change_rows(&state, opt_u64(&opts, "since"), opt_bool(&opts, "include_docs"));
        Ok(json!({"results": results, "last_seq": state.update_seq}))
    }

    fn live_changes(&self, opts: Value) -> EngineResult<ChangesFeed> {
        let since = opt_u64(&opts, "since");
        let limit = opts.get("limit").and_then(Value::as_u64);

        let (emitter, feed) = FeedEmitter::channel();

        // Subscribe before snapshotting so nothing falls between backlog
        // and live tail; duplicates are filtered by sequence below.
        let mut live_rx = self.change_tx.subscribe();
        let (backlog, mut last_seq) = {
            let state = self.state.lock();
            state.guard()?;
            (Self::change_rows(&state, since, false), since)
        };

        tokio::spawn(async move {
            let mut emitted: u64 = 0;

            for row in backlog {
                if emitter.is_cancelled() {
                    return;
                }
                let seq = row["seq"].as_u64().unwrap_or(0);
                if seq <= last_seq {
                    continue;
                }
                last_seq = seq;
                emitter.change(row);
                emitted += 1;
                if matches!(limit, Some(limit) if emitted >= limit) {
                    emitter.complete(json!({"last_seq": last_seq}));
                    return;
                }
            }

            loop {
                if emitter.is_cancelled() {
                    return;
                }
                match live_rx.recv().await {
                    Ok(row) => {
                        let seq = row["seq"].as_u64().unwrap_or(0);
                        if seq <= last_seq {
                            continue;
                        }
                        last_seq = seq;
                        emitter.change(row);
                        emitted += 1;
                        if matches!(limit, Some(limit) if emitted >= limit) {
                            emitter.complete(json!({"last_seq": last_seq}));
                            return;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => {
                        emitter.complete(json!({"last_seq": last_seq}));
                        return;
                    }
                }
            }
        });

        Ok(feed)
    }

    async fn get_attachment(
        &self,
        doc_id: &str,
        attachment_id: &str,
        _opts: Value,
    ) -> EngineResult<(String, Bytes)> {
        let state = self.state.lock();
        state.guard()?;
        let doc = state
            .docs
            .get(doc_id)
            .ok_or_else(|| EngineError::not_found("missing"))?;
        let att = doc
            .get("_attachments")
            .and_then(|atts| atts.get(attachment_id))
            .ok_or_else(|| EngineError::not_found("missing attachment"))?;

        let content_type = att["content_type"].as_str().unwrap_or("application/octet-stream");
        let body = att["data"]
            .as_str()
            .ok_or_else(|| EngineError::not_found("missing attachment"))?;
        let data = base64::engine::general_purpose::STANDARD
            .decode(body)
            .map_err(|_| EngineError::bad_request("attachment body is not base64"))?;

        Ok((content_type.to_string(), Bytes::from(data)))
    }

    async fn put_attachment(
        &self,
        doc_id: &str,
        attachment_id: &str,
        rev: Option<&str>,
        data: Bytes,
        content_type: &str,
    ) -> EngineResult<Value> {
        let mut state = self.state.lock();
        state.guard()?;

        let stored_rev = state
            .docs
            .get(doc_id)
            .and_then(|d| d["_rev"].as_str())
            .map(str::to_string);
        if stored_rev.as_deref() != rev {
            return Err(EngineError::conflict());
        }

        let new_rev = state.next_rev(stored_rev.as_deref());
        let row = state.record_change(doc_id, &new_rev, false);

        let encoded = base64::engine::general_purpose::STANDARD.encode(&data);
        let doc = state
            .docs
            .entry(doc_id.to_string())
            .or_insert_with(|| json!({"_id": doc_id}));
        doc["_rev"] = Value::String(new_rev.clone());
        doc["_attachments"][attachment_id] = json!({
            "content_type": content_type,
            "data": encoded,
            "length": data.len(),
        });
        drop(state);

        let _ = self.change_tx.send(row);
        Ok(json!({"ok": true, "id": doc_id, "rev": new_rev}))
    }

    async fn remove_attachment(
        &self,
        doc_id: &str,
        attachment_id: &str,
        rev: &str,
    ) -> EngineResult<Value> {
        let mut state = self.state.lock();
        state.guard()?;

        let stored_rev = state
            .docs
            .get(doc_id)
            .and_then(|d| d["_rev"].as_str())
            .map(str::to_string)
            .ok_or_else(|| EngineError::not_found("missing"))?;
        if stored_rev != rev {
            return Err(EngineError::conflict());
        }

        let removed = state
            .docs
            .get_mut(doc_id)
            .and_then(|doc| doc.get_mut("_attachments"))
            .and_then(Value::as_object_mut)
            .and_then(|atts| atts.remove(attachment_id));
        if removed.is_none() {
            return Err(EngineError::not_found("missing attachment"));
        }

        let new_rev = state.next_rev(Some(&stored_rev));
        let row = state.record_change(doc_id, &new_rev, false);
        if let Some(doc) = state.docs.get_mut(doc_id) {
            doc["_rev"] = Value::String(new_rev.clone());
        }
        drop(state);

        let _ = self.change_tx.send(row);
        Ok(json!({"ok": true, "id": doc_id, "rev": new_rev}))
    }

    async fn destroy(&self) -> EngineResult<Value> {
        let mut state = self.state.lock();
        state.docs.clear();
        state.changes.clear();
        state.destroyed = true;
        Ok(json!({"ok": true}))
    }

    fn take_fault_events(&self) -> Option<mpsc::UnboundedReceiver<EngineError>> {
        self.fault_rx.lock().take()
    }
}

/// Builds [`MemoryEngine`] instances and remembers them for assertions.
#[derive(Default)]
pub struct MemoryEngineFactory {
    engines: Mutex<Vec<Arc<MemoryEngine>>>,
    fail_next: AtomicBool,
}

impl MemoryEngineFactory {
    /// Creates a factory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `create` call fail.
    pub fn fail_next_create(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    /// Returns the names of all databases created so far.
    pub fn created_names(&self) -> Vec<String> {
        self.engines
            .lock()
            .iter()
            .map(|e| e.name().to_string())
            .collect()
    }

    /// Returns the most recently created engine.
    pub fn last_engine(&self) -> Option<Arc<MemoryEngine>> {
        self.engines.lock().last().cloned()
    }
}

#[async_trait]
impl EngineFactory for MemoryEngineFactory {
    async fn create(&self, options: CreateOptions) -> EngineResult<Arc<dyn Engine>> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(EngineError::with_reason(
                "unauthorized",
                "database creation refused",
            ));
        }
        let engine = Arc::new(MemoryEngine::new(options.name));
        self.engines.lock().push(Arc::clone(&engine));
        Ok(engine as Arc<dyn Engine>)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docket_engine::FeedEvent;

    #[tokio::test]
    async fn put_get_roundtrip() {
        let engine = MemoryEngine::new("testdb");

        let result = engine
            .put(json!({"_id": "a", "value": 1}), json!({}))
            .await
            .unwrap();
        assert_eq!(result["ok"], true);
        let rev = result["rev"].as_str().unwrap().to_string();
        assert!(rev.starts_with("1-"));

        let doc = engine.get("a", json!({})).await.unwrap();
        assert_eq!(doc["value"], 1);
        assert_eq!(doc["_rev"], rev.as_str());
    }

    #[tokio::test]
    async fn conflicting_put_is_rejected() {
        let engine = MemoryEngine::new("testdb");
        engine.put(json!({"_id": "a"}), json!({})).await.unwrap();

        let err = engine
            .put(json!({"_id": "a", "_rev": "1-bogus"}), json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.error, "conflict");
    }

    #[tokio::test]
    async fn remove_deletes_and_records_a_change() {
        let engine = MemoryEngine::new("testdb");
        let put = engine.put(json!({"_id": "a"}), json!({})).await.unwrap();
        let rev = put["rev"].as_str().unwrap().to_string();

        engine.remove("a", Some(&rev)).await.unwrap();
        assert!(engine.get("a", json!({})).await.is_err());

        let changes = engine.changes(json!({})).await.unwrap();
        let rows = changes["results"].as_array().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1]["deleted"], true);
    }

    #[tokio::test]
    async fn changes_since_filters_rows() {
        let engine = MemoryEngine::new("testdb");
        engine.put(json!({"_id": "a"}), json!({})).await.unwrap();
        engine.put(json!({"_id": "b"}), json!({})).await.unwrap();

        let changes = engine.changes(json!({"since": 1})).await.unwrap();
        assert_eq!(changes["results"].as_array().unwrap().len(), 1);
        assert_eq!(changes["last_seq"], 2);
    }

    #[tokio::test]
    async fn live_feed_sees_backlog_and_tail() {
        let engine = Arc::new(MemoryEngine::new("testdb"));
        engine.put(json!({"_id": "a"}), json!({})).await.unwrap();

        let mut feed = engine.live_changes(json!({"limit": 2})).unwrap();
        engine.put(json!({"_id": "b"}), json!({})).await.unwrap();

        let first = feed.next_event().await.unwrap();
        assert!(matches!(first, FeedEvent::Change(ref row) if row["id"] == "a"));
        let second = feed.next_event().await.unwrap();
        assert!(matches!(second, FeedEvent::Change(ref row) if row["id"] == "b"));
        let terminal = feed.next_event().await.unwrap();
        assert!(terminal.is_terminal());
    }

    #[tokio::test]
    async fn attachments_roundtrip() {
        let engine = MemoryEngine::new("testdb");

        let result = engine
            .put_attachment("doc", "note.txt", None, Bytes::from_static(b"hello"), "text/plain")
            .await
            .unwrap();
        let rev = result["rev"].as_str().unwrap().to_string();

        let (content_type, data) = engine
            .get_attachment("doc", "note.txt", json!({}))
            .await
            .unwrap();
        assert_eq!(content_type, "text/plain");
        assert_eq!(&data[..], b"hello");

        let missing = engine
            .get_attachment("doc", "nope.txt", json!({}))
            .await
            .unwrap_err();
        assert!(missing.is_not_found());

        engine
            .remove_attachment("doc", "note.txt", &rev)
            .await
            .unwrap();
        assert!(engine
            .get_attachment("doc", "note.txt", json!({}))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn destroy_blocks_further_operations() {
        let engine = MemoryEngine::new("testdb");
        engine.put(json!({"_id": "a"}), json!({})).await.unwrap();

        engine.destroy().await.unwrap();
        let err = engine.get("a", json!({})).await.unwrap_err();
        assert_eq!(err.error, "destroyed");
    }

    #[tokio::test]
    async fn factory_records_created_engines() {
        let factory = MemoryEngineFactory::new();
        factory
            .create(CreateOptions::named("one"))
            .await
            .unwrap();
        factory
            .create(CreateOptions::named("two"))
            .await
            .unwrap();
        assert_eq!(factory.created_names(), vec!["one", "two"]);

        factory.fail_next_create();
        assert!(factory.create(CreateOptions::named("three")).await.is_err());
    }

    #[tokio::test]
    async fn fault_channel_delivers_injected_errors() {
        let engine = MemoryEngine::new("testdb");
        let mut faults = engine.take_fault_events().unwrap();
        assert!(engine.take_fault_events().is_none());

        engine.inject_fault(EngineError::new("view function threw"));
        let fault = faults.recv().await.unwrap();
        assert_eq!(fault.error, "view function threw");
    }
}
