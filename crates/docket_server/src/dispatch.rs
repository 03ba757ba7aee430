//! Per-connection frame dispatch.

use crate::config::ServerConfig;
use crate::registry::EngineRegistry;
use bytes::Bytes;
use docket_engine::{CreateOptions, Engine, EngineFactory, FeedCanceller, FeedEvent};
use docket_protocol::{
    decode_upload_frame, encode_tagged_payload, BinaryHandoff, CommandFrame, ErrorPayload,
    Operation, ProtocolError, RequestId, ResultFrame, FRAME_DELIMITER,
};
use docket_transport::{Message, Transport};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Serves one inbound connection.
///
/// Frames are received and decoded sequentially in arrival order; each
/// engine invocation then runs in its own task, so responses go out as
/// operations complete, not in call order.
pub(crate) struct ConnectionHandler {
    transport: Arc<dyn Transport>,
    registry: Arc<EngineRegistry>,
    factory: Arc<dyn EngineFactory>,
    config: ServerConfig,
    feeds: Mutex<HashMap<RequestId, FeedCanceller>>,
}

impl ConnectionHandler {
    pub(crate) fn new(
        transport: Arc<dyn Transport>,
        registry: Arc<EngineRegistry>,
        factory: Arc<dyn EngineFactory>,
        config: ServerConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            transport,
            registry,
            factory,
            config,
            feeds: Mutex::new(HashMap::new()),
        })
    }

    /// Receives frames until the connection ends, then tears down.
    pub(crate) async fn run(self: Arc<Self>) {
        let connection = self.transport.id().clone();
        tracing::debug!(%connection, "connection open");

        loop {
            let prepared = match self.transport.recv().await {
                Ok(Some(Message::Text(text))) => self.parse_text(text).await,
                Ok(Some(Message::Binary(bytes))) => self.parse_binary(&bytes),
                Ok(None) => {
                    tracing::debug!(%connection, "connection closed by peer");
                    break;
                }
                Err(err) if err.is_fatal() => {
                    tracing::warn!(%connection, error = %err, "connection failed");
                    break;
                }
                Err(err) => {
                    tracing::warn!(%connection, error = %err, "dropping oversized message");
                    None
                }
            };

            if let Some((frame, blob)) = prepared {
                let handler = Arc::clone(&self);
                tokio::spawn(async move {
                    handler.invoke(frame, blob).await;
                });
            }
        }

        self.teardown().await;
    }

    async fn parse_text(&self, text: String) -> Option<(CommandFrame, Option<Bytes>)> {
        match CommandFrame::decode(&text) {
            Ok(frame) => Some((frame, None)),
            Err(ProtocolError::UnknownOperation(name)) => {
                // The operation field is garbage but the request id may
                // still be recoverable, so the caller gets an answer.
                let request_id = text
                    .splitn(3, FRAME_DELIMITER)
                    .nth(1)
                    .and_then(|token| RequestId::from_wire(token).ok());
                match request_id {
                    Some(id) => {
                        self.send_error(id, &ErrorPayload::unknown_api_method(&name))
                            .await;
                    }
                    None => {
                        tracing::warn!(operation = %name, "dropping frame with unknown operation and no request id");
                    }
                }
                None
            }
            Err(err) => {
                tracing::warn!(error = %err, "dropping malformed text frame");
                None
            }
        }
    }

    fn parse_binary(&self, bytes: &[u8]) -> Option<(CommandFrame, Option<Bytes>)> {
        match decode_upload_frame(bytes) {
            Ok((header, payload)) => {
                let frame = CommandFrame::with_request_id(
                    header.operation,
                    header.request_id,
                    header.args,
                );
                Some((frame, Some(payload)))
            }
            Err(err) => {
                tracing::warn!(error = %err, "dropping malformed binary frame");
                None
            }
        }
    }

    async fn invoke(self: Arc<Self>, frame: CommandFrame, blob: Option<Bytes>) {
        let CommandFrame {
            operation,
            request_id,
            args,
        } = frame;
        tracing::debug!(connection = %self.transport.id(), %operation, %request_id, "dispatch");

        match operation {
            Operation::CreateDatabase => self.create_database(request_id, args).await,
            Operation::Id => {
                self.send_success(request_id, Value::String(self.transport.id().to_string()))
                    .await;
            }
            Operation::LiveChanges => {
                Arc::clone(&self).live_changes(request_id, args).await;
            }
            Operation::CancelChanges => self.cancel_changes(&request_id),
            Operation::GetAttachment => self.get_attachment(request_id, args).await,
            Operation::PutAttachment => self.put_attachment(request_id, args, blob).await,
            Operation::Destroy => self.destroy(request_id).await,
            _ => self.engine_call(operation, request_id, args).await,
        }
    }

    /// Plain request/response operations routed straight to the engine.
    async fn engine_call(&self, operation: Operation, request_id: RequestId, args: Vec<Value>) {
        let Some(engine) = self.engine() else {
            return self
                .send_error(request_id, &ErrorPayload::database_not_found())
                .await;
        };

        let outcome = match operation {
            Operation::Info => engine.info().await,
            Operation::Get => match arg_str(&args, 0) {
                Ok(doc_id) => {
                    let mut opts = arg_opts(&args, 1);
                    force_flag(&mut opts, "binary", false);
                    engine.get(doc_id, opts).await
                }
                Err(payload) => return self.send_error(request_id, &payload).await,
            },
            Operation::Put => engine.put(arg_value(&args, 0), arg_opts(&args, 1)).await,
            Operation::Post => engine.post(arg_value(&args, 0), arg_opts(&args, 1)).await,
            Operation::Remove => match arg_str(&args, 0) {
                Ok(doc_id) => engine.remove(doc_id, arg_opt_str(&args, 1)).await,
                Err(payload) => return self.send_error(request_id, &payload).await,
            },
            Operation::BulkDocs => {
                engine
                    .bulk_docs(arg_value(&args, 0), arg_opts(&args, 1))
                    .await
            }
            Operation::AllDocs => {
                let mut opts = arg_opts(&args, 0);
                force_flag(&mut opts, "binary", false);
                engine.all_docs(opts).await
            }
            Operation::Query => {
                let mut opts = arg_opts(&args, 1);
                force_flag(&mut opts, "binary", false);
                engine.query(arg_value(&args, 0), opts).await
            }
            Operation::RevsDiff => engine.revs_diff(arg_value(&args, 0)).await,
            Operation::Compact => engine.compact(arg_opts(&args, 0)).await,
            Operation::ViewCleanup => engine.view_cleanup().await,
            Operation::Changes => {
                // Buffer everything server-side; the client trims rows the
                // caller did not ask to keep. Attachment bodies travel as
                // base64 JSON.
                let mut opts = arg_opts(&args, 0);
                force_flag(&mut opts, "return_docs", true);
                force_flag(&mut opts, "returnDocs", true);
                force_flag(&mut opts, "binary", false);
                engine.changes(opts).await
            }
            Operation::RemoveAttachment => {
                match (arg_str(&args, 0), arg_str(&args, 1), arg_str(&args, 2)) {
                    (Ok(doc_id), Ok(att_id), Ok(rev)) => {
                        engine.remove_attachment(doc_id, att_id, rev).await
                    }
                    _ => {
                        return self
                            .send_error(
                                request_id,
                                &ErrorPayload::with_reason(
                                    "bad_request",
                                    "removeAttachment needs docId, attachmentId and rev",
                                ),
                            )
                            .await
                    }
                }
            }
            // Handled by dedicated methods before we get here.
            Operation::CreateDatabase
            | Operation::Id
            | Operation::LiveChanges
            | Operation::CancelChanges
            | Operation::GetAttachment
            | Operation::PutAttachment
            | Operation::Destroy => unreachable!("routed by invoke"),
        };

        match outcome {
            Ok(value) => self.send_success(request_id, value).await,
            Err(err) => self.send_error(request_id, &err.into()).await,
        }
    }

    async fn create_database(&self, request_id: RequestId, args: Vec<Value>) {
        let connection = self.transport.id().clone();
        if self.registry.get(&connection).is_some() {
            return self
                .send_error(request_id, &ErrorPayload::file_exists())
                .await;
        }

        let options = match parse_create_options(args.first()) {
            Ok(options) => options,
            Err(payload) => return self.send_error(request_id, &payload).await,
        };

        match self.factory.create(options).await {
            Ok(engine) => {
                if !self.registry.insert(connection, Arc::clone(&engine)) {
                    return self
                        .send_error(request_id, &ErrorPayload::file_exists())
                        .await;
                }
                self.pump_faults(&engine);
                self.send_success(request_id, json!({"ok": true})).await;
            }
            Err(err) => self.send_error(request_id, &err.into()).await,
        }
    }

    /// Forwards faults unrelated to any call as broadcast frames.
    fn pump_faults(&self, engine: &Arc<dyn Engine>) {
        let Some(mut faults) = engine.take_fault_events() else {
            return;
        };
        let transport = Arc::clone(&self.transport);
        tokio::spawn(async move {
            while let Some(fault) = faults.recv().await {
                let frame = ResultFrame::unhandled_error(&fault.into());
                let Ok(text) = frame.encode() else { continue };
                if transport.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
        });
    }

    async fn live_changes(self: Arc<Self>, request_id: RequestId, args: Vec<Value>) {
        let Some(engine) = self.engine() else {
            return self
                .send_error(request_id, &ErrorPayload::database_not_found())
                .await;
        };

        if self.feeds.lock().len() >= self.config.max_live_feeds {
            return self
                .send_error(
                    request_id,
                    &ErrorPayload::with_reason(
                        "too_many_subscriptions",
                        "live change subscription limit reached",
                    ),
                )
                .await;
        }

        let mut opts = arg_opts(&args, 0);
        force_flag(&mut opts, "binary", false);

        let mut feed = match engine.live_changes(opts) {
            Ok(feed) => feed,
            Err(err) => return self.send_error(request_id, &err.into()).await,
        };

        self.feeds
            .lock()
            .insert(request_id.clone(), feed.canceller());

        let handler = self;
        tokio::spawn(async move {
            while let Some(event) = feed.next_event().await {
                match event {
                    FeedEvent::Change(change) => {
                        handler.send_update(request_id.clone(), change).await;
                    }
                    FeedEvent::Complete(summary) => {
                        handler.feeds.lock().remove(&request_id);
                        handler.send_success(request_id, summary).await;
                        return;
                    }
                    FeedEvent::Error(err) => {
                        handler.feeds.lock().remove(&request_id);
                        handler.send_error(request_id, &err.into()).await;
                        return;
                    }
                }
            }
            // The producer stopped without a terminal event; cancellation
            // already released the caller, so just drop the registration.
            handler.feeds.lock().remove(&request_id);
        });
    }

    fn cancel_changes(&self, request_id: &RequestId) {
        if let Some(canceller) = self.feeds.lock().remove(request_id) {
            canceller.cancel();
        }
        // No reply: cancellation is fire-and-forget on the wire.
    }

    async fn get_attachment(&self, request_id: RequestId, args: Vec<Value>) {
        let Some(engine) = self.engine() else {
            return self
                .send_error(request_id, &ErrorPayload::database_not_found())
                .await;
        };

        let (doc_id, att_id) = match (arg_str(&args, 0), arg_str(&args, 1)) {
            (Ok(doc_id), Ok(att_id)) => (doc_id, att_id),
            _ => {
                return self
                    .send_error(
                        request_id,
                        &ErrorPayload::with_reason(
                            "bad_request",
                            "getAttachment needs docId and attachmentId",
                        ),
                    )
                    .await
            }
        };

        match engine.get_attachment(doc_id, att_id, arg_opts(&args, 2)).await {
            Ok((content_type, data)) => {
                // Metadata first, then the tagged raw payload. The client
                // merges the two halves whichever order they land in.
                let handoff = BinaryHandoff::new(content_type);
                let tagged = encode_tagged_payload(&handoff.blob_uuid, &data);
                self.send_frame(ResultFrame::binary_handoff(request_id, &handoff))
                    .await;
                if let Err(err) = self.transport.send(Message::Binary(tagged)).await {
                    tracing::warn!(error = %err, "failed to send attachment payload");
                }
            }
            Err(err) => self.send_error(request_id, &err.into()).await,
        }
    }

    async fn put_attachment(&self, request_id: RequestId, args: Vec<Value>, blob: Option<Bytes>) {
        let Some(engine) = self.engine() else {
            return self
                .send_error(request_id, &ErrorPayload::database_not_found())
                .await;
        };

        let Some(data) = blob else {
            return self
                .send_error(
                    request_id,
                    &ErrorPayload::with_reason(
                        "bad_request",
                        "putAttachment needs a binary payload",
                    ),
                )
                .await;
        };

        let (doc_id, att_id, content_type) =
            match (arg_str(&args, 0), arg_str(&args, 1), arg_str(&args, 4)) {
                (Ok(doc_id), Ok(att_id), Ok(content_type)) => (doc_id, att_id, content_type),
                _ => {
                    return self
                        .send_error(
                            request_id,
                            &ErrorPayload::with_reason(
                                "bad_request",
                                "putAttachment needs docId, attachmentId and contentType",
                            ),
                        )
                        .await
                }
            };

        let outcome = engine
            .put_attachment(doc_id, att_id, arg_opt_str(&args, 2), data, content_type)
            .await;
        match outcome {
            Ok(value) => self.send_success(request_id, value).await,
            Err(err) => self.send_error(request_id, &err.into()).await,
        }
    }

    async fn destroy(&self, request_id: RequestId) {
        // Unbind first so no further operation can reach the doomed
        // instance through the registry.
        let Some(engine) = self.registry.remove(self.transport.id()) else {
            return self
                .send_error(request_id, &ErrorPayload::database_not_found())
                .await;
        };

        match engine.destroy().await {
            Ok(value) => self.send_success(request_id, value).await,
            Err(err) => self.send_error(request_id, &err.into()).await,
        }
    }

    async fn teardown(&self) {
        let connection = self.transport.id();

        let feeds: Vec<FeedCanceller> = {
            let mut feeds = self.feeds.lock();
            feeds.drain().map(|(_, canceller)| canceller).collect()
        };
        for canceller in feeds {
            canceller.cancel();
        }

        if self.registry.remove(connection).is_some() {
            tracing::debug!(%connection, "released engine instance");
        }
        let _ = self.transport.close().await;
    }

    fn engine(&self) -> Option<Arc<dyn Engine>> {
        self.registry.get(self.transport.id())
    }

    async fn send_success(&self, request_id: RequestId, payload: Value) {
        self.send_frame(ResultFrame::success(request_id, payload)).await;
    }

    async fn send_update(&self, request_id: RequestId, payload: Value) {
        self.send_frame(ResultFrame::update(request_id, payload)).await;
    }

    async fn send_error(&self, request_id: RequestId, payload: &ErrorPayload) {
        self.send_frame(ResultFrame::error(request_id, payload)).await;
    }

    async fn send_frame(&self, frame: ResultFrame) {
        match frame.encode() {
            Ok(text) => {
                if let Err(err) = self.transport.send(Message::Text(text)).await {
                    tracing::warn!(error = %err, "failed to send result frame");
                }
            }
            Err(err) => tracing::warn!(error = %err, "failed to encode result frame"),
        }
    }
}

fn parse_create_options(arg: Option<&Value>) -> Result<CreateOptions, ErrorPayload> {
    match arg {
        Some(Value::String(name)) if !name.is_empty() => Ok(CreateOptions::named(name)),
        Some(value @ Value::Object(_)) => {
            let options: CreateOptions = serde_json::from_value(value.clone())
                .map_err(|_| ErrorPayload::new("you must provide a database name"))?;
            if options.name.is_empty() {
                return Err(ErrorPayload::new("you must provide a database name"));
            }
            Ok(options)
        }
        _ => Err(ErrorPayload::new("you must provide a database name")),
    }
}

fn arg_str(args: &[Value], index: usize) -> Result<&str, ErrorPayload> {
    args.get(index).and_then(Value::as_str).ok_or_else(|| {
        ErrorPayload::with_reason("bad_request", format!("argument {index} must be a string"))
    })
}

fn arg_opt_str(args: &[Value], index: usize) -> Option<&str> {
    args.get(index).and_then(Value::as_str)
}

fn arg_value(args: &[Value], index: usize) -> Value {
    args.get(index).cloned().unwrap_or(Value::Null)
}

/// Returns the argument as an options object, defaulting to `{}`.
fn arg_opts(args: &[Value], index: usize) -> Value {
    match args.get(index) {
        Some(value @ Value::Object(_)) => value.clone(),
        _ => json!({}),
    }
}

fn force_flag(opts: &mut Value, key: &str, value: impl Into<Value>) {
    if let Some(map) = opts.as_object_mut() {
        map.insert(key.to_string(), value.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_options_from_string_or_object() {
        let options = parse_create_options(Some(&json!("mydb"))).unwrap();
        assert_eq!(options.name, "mydb");

        let options =
            parse_create_options(Some(&json!({"name": "mydb", "auto_compaction": true})))
                .unwrap();
        assert!(options.auto_compaction);

        assert!(parse_create_options(Some(&json!({}))).is_err());
        assert!(parse_create_options(Some(&json!(""))).is_err());
        assert!(parse_create_options(None).is_err());
    }

    #[test]
    fn argument_extraction() {
        let args = vec![json!("doc1"), Value::Null, json!({"rev": "1-a"})];

        assert_eq!(arg_str(&args, 0).unwrap(), "doc1");
        assert!(arg_str(&args, 1).is_err());
        assert!(arg_str(&args, 9).is_err());

        assert_eq!(arg_opt_str(&args, 1), None);
        assert_eq!(arg_value(&args, 9), Value::Null);
        assert_eq!(arg_opts(&args, 2), json!({"rev": "1-a"}));
        assert_eq!(arg_opts(&args, 1), json!({}));
    }

    #[test]
    fn force_flag_only_touches_objects() {
        let mut opts = json!({"since": 3, "binary": true});
        force_flag(&mut opts, "binary", false);
        assert_eq!(opts, json!({"since": 3, "binary": false}));

        let mut not_an_object = json!("nope");
        force_flag(&mut not_an_object, "binary", false);
        assert_eq!(not_an_object, json!("nope"));
    }
}
