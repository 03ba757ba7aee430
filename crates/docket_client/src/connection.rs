//! Shared per-connection state and the inbound router.
//!
//! Every session attached to one cached connection shares this state by
//! reference: the correlation table, the live-subscription table, the
//! pending-blob table and the unhandled-error channel. The send path
//! (caller tasks) and the receive path (the router task) each take one
//! short-lived lock per table.

use crate::attachments::Attachment;
use crate::error::{ClientError, ClientResult};
use docket_protocol::{
    encode_upload_frame, split_tagged_payload, AssembledBlob, BinaryHandoff, BinaryHeader,
    BlobAssembler, BlobTag, CommandFrame, ErrorPayload, Operation, RequestId, ResultFrame,
    ResultKind,
};
use docket_transport::{Message, Transport};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};

const UNHANDLED_ERROR_BUFFER: usize = 16;

/// The resolution of one pending call.
pub(crate) enum CallReply {
    /// A success result frame.
    Success(Value),
    /// An error result frame.
    Failure(ErrorPayload),
    /// A merged two-part binary download.
    Blob(Attachment),
}

impl CallReply {
    /// Unwraps a JSON result.
    pub(crate) fn into_value(self) -> ClientResult<Value> {
        match self {
            CallReply::Success(value) => Ok(value),
            CallReply::Failure(payload) => Err(ClientError::Remote(payload)),
            CallReply::Blob(_) => Err(ClientError::UnexpectedReply(
                "binary payload where JSON was expected".into(),
            )),
        }
    }

    /// Unwraps a binary download.
    pub(crate) fn into_attachment(self) -> ClientResult<Attachment> {
        match self {
            CallReply::Blob(attachment) => Ok(attachment),
            CallReply::Failure(payload) => Err(ClientError::Remote(payload)),
            CallReply::Success(_) => Err(ClientError::UnexpectedReply(
                "JSON payload where an attachment was expected".into(),
            )),
        }
    }
}

/// State shared by every session handle attached to one connection.
pub(crate) struct SharedConnection {
    name: String,
    transport: Arc<dyn Transport>,
    pending: Mutex<HashMap<RequestId, oneshot::Sender<CallReply>>>,
    subscriptions: Mutex<HashMap<RequestId, mpsc::UnboundedSender<Value>>>,
    blobs: Mutex<BlobAssembler>,
    handoffs: Mutex<HashMap<BlobTag, RequestId>>,
    unhandled_tx: broadcast::Sender<ErrorPayload>,
    closed: AtomicBool,
}

impl SharedConnection {
    /// Wraps a transport and starts its router task.
    pub(crate) fn spawn(name: impl Into<String>, transport: Arc<dyn Transport>) -> Arc<Self> {
        let (unhandled_tx, _) = broadcast::channel(UNHANDLED_ERROR_BUFFER);
        let shared = Arc::new(Self {
            name: name.into(),
            transport,
            pending: Mutex::new(HashMap::new()),
            subscriptions: Mutex::new(HashMap::new()),
            blobs: Mutex::new(BlobAssembler::new()),
            handoffs: Mutex::new(HashMap::new()),
            unhandled_tx,
            closed: AtomicBool::new(false),
        });

        let router = Arc::clone(&shared);
        tokio::spawn(router.route_inbound());
        shared
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Subscribes to faults the server broadcasts outside any call.
    pub(crate) fn unhandled_errors(&self) -> broadcast::Receiver<ErrorPayload> {
        self.unhandled_tx.subscribe()
    }

    /// Sends one command frame and awaits its terminal result.
    pub(crate) async fn call(
        &self,
        operation: Operation,
        args: Vec<Value>,
    ) -> ClientResult<CallReply> {
        let frame = CommandFrame::new(operation, args);
        let text = frame.encode()?;
        let receiver = self.register_pending(frame.request_id.clone())?;
        tracing::debug!(
            connection = %self.transport.id(),
            %operation,
            request_id = %frame.request_id,
            "send command"
        );

        if let Err(err) = self.transport.send(Message::Text(text)).await {
            self.pending.lock().remove(&frame.request_id);
            return Err(err.into());
        }
        receiver.await.map_err(|_| ClientError::ConnectionClosed)
    }

    /// Sends one binary upload frame and awaits its terminal result.
    pub(crate) async fn call_binary(
        &self,
        operation: Operation,
        args: Vec<Value>,
        blob_index: usize,
        payload: &[u8],
    ) -> ClientResult<CallReply> {
        let header = BinaryHeader::new(operation, args, blob_index);
        let message = encode_upload_frame(&header, payload)?;
        let receiver = self.register_pending(header.request_id.clone())?;
        tracing::debug!(
            connection = %self.transport.id(),
            %operation,
            request_id = %header.request_id,
            payload_len = payload.len(),
            "send binary command"
        );

        if let Err(err) = self.transport.send(Message::Binary(message)).await {
            self.pending.lock().remove(&header.request_id);
            return Err(err.into());
        }
        receiver.await.map_err(|_| ClientError::ConnectionClosed)
    }

    /// Registers a live subscription: an update stream plus the slot its
    /// terminal frame resolves.
    pub(crate) fn register_live(
        &self,
        request_id: RequestId,
    ) -> ClientResult<(mpsc::UnboundedReceiver<Value>, oneshot::Receiver<CallReply>)> {
        if self.is_closed() {
            return Err(ClientError::ConnectionClosed);
        }
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = oneshot::channel();
        self.subscriptions.lock().insert(request_id.clone(), update_tx);
        self.pending.lock().insert(request_id, done_tx);
        Ok((update_rx, done_rx))
    }

    /// Removes a live subscription, returning its unresolved terminal
    /// slot if the stream had not ended yet.
    pub(crate) fn remove_live(&self, request_id: &RequestId) -> Option<oneshot::Sender<CallReply>> {
        self.subscriptions.lock().remove(request_id);
        self.pending.lock().remove(request_id)
    }

    /// Sends a frame without registering any pending slot.
    pub(crate) async fn send_plain(&self, frame: CommandFrame) -> ClientResult<()> {
        let text = frame.encode()?;
        self.transport
            .send(Message::Text(text))
            .await
            .map_err(Into::into)
    }

    /// Tears the connection down: closes the transport once and fails
    /// everything still pending.
    pub(crate) async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.transport.close().await;
        self.fail_all();
    }

    fn register_pending(
        &self,
        request_id: RequestId,
    ) -> ClientResult<oneshot::Receiver<CallReply>> {
        if self.is_closed() {
            return Err(ClientError::ConnectionClosed);
        }
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(request_id, tx);
        Ok(rx)
    }

    /// Resolves every outstanding call and subscription with a
    /// connection-closed failure so nothing hangs on a dead connection.
    fn fail_all(&self) {
        let pending: Vec<(RequestId, oneshot::Sender<CallReply>)> =
            self.pending.lock().drain().collect();
        for (_, sender) in pending {
            let _ = sender.send(CallReply::Failure(ErrorPayload::connection_closed()));
        }
        self.subscriptions.lock().clear();
        self.handoffs.lock().clear();
        self.blobs.lock().clear();
    }

    async fn route_inbound(self: Arc<Self>) {
        let connection = self.transport.id().clone();
        loop {
            match self.transport.recv().await {
                Ok(Some(Message::Text(text))) => self.route_text(&text),
                Ok(Some(Message::Binary(bytes))) => self.route_binary(&bytes),
                Ok(None) => {
                    tracing::debug!(%connection, "connection closed");
                    break;
                }
                Err(err) if err.is_fatal() => {
                    tracing::warn!(%connection, error = %err, "connection failed");
                    break;
                }
                Err(err) => {
                    tracing::warn!(%connection, error = %err, "dropping oversized message");
                }
            }
        }
        self.closed.store(true, Ordering::SeqCst);
        self.fail_all();
    }

    fn route_text(&self, text: &str) {
        let frame = match ResultFrame::decode(text) {
            Ok(frame) => frame,
            Err(err) => {
                tracing::warn!(error = %err, "dropping malformed result frame");
                return;
            }
        };

        if frame.kind == ResultKind::UnhandledError || frame.request_id.is_broadcast() {
            let _ = self.unhandled_tx.send(frame.error_payload());
            return;
        }

        match frame.kind {
            ResultKind::Update => {
                let subscriptions = self.subscriptions.lock();
                match subscriptions.get(&frame.request_id) {
                    Some(sender) => {
                        let _ = sender.send(frame.payload);
                    }
                    None => tracing::debug!(
                        request_id = %frame.request_id,
                        "dropping update for unknown subscription"
                    ),
                }
            }
            ResultKind::Success | ResultKind::Error => {
                // A terminal frame also ends any live stream under the
                // same identifier.
                self.subscriptions.lock().remove(&frame.request_id);
                let slot = self.pending.lock().remove(&frame.request_id);
                match slot {
                    Some(sender) => {
                        let reply = if frame.kind == ResultKind::Success {
                            CallReply::Success(frame.payload)
                        } else {
                            CallReply::Failure(frame.error_payload())
                        };
                        let _ = sender.send(reply);
                    }
                    None => tracing::debug!(
                        request_id = %frame.request_id,
                        "duplicate or unmatched result frame (ignoring)"
                    ),
                }
            }
            ResultKind::BinaryHandoff => {
                let handoff: BinaryHandoff = match serde_json::from_value(frame.payload) {
                    Ok(handoff) => handoff,
                    Err(err) => {
                        tracing::warn!(error = %err, "dropping malformed binary handoff");
                        return;
                    }
                };
                let merged = self
                    .blobs
                    .lock()
                    .offer_metadata(handoff.blob_uuid.clone(), handoff.content_type);
                match merged {
                    Some(blob) => self.resolve_blob(frame.request_id, blob),
                    None => {
                        self.handoffs
                            .lock()
                            .insert(handoff.blob_uuid, frame.request_id);
                    }
                }
            }
            ResultKind::UnhandledError => unreachable!("handled above"),
        }
    }

    fn route_binary(&self, bytes: &[u8]) {
        let (tag, payload) = match split_tagged_payload(bytes) {
            Ok(split) => split,
            Err(err) => {
                tracing::warn!(error = %err, "dropping malformed binary message");
                return;
            }
        };

        let merged = self.blobs.lock().offer_payload(tag.clone(), payload);
        if let Some(blob) = merged {
            match self.handoffs.lock().remove(&tag) {
                Some(request_id) => self.resolve_blob(request_id, blob),
                None => tracing::warn!(%tag, "merged payload has no matching handoff"),
            }
        }
    }

    fn resolve_blob(&self, request_id: RequestId, blob: AssembledBlob) {
        match self.pending.lock().remove(&request_id) {
            Some(sender) => {
                let _ = sender.send(CallReply::Blob(Attachment::new(
                    blob.content_type,
                    blob.data,
                )));
            }
            None => tracing::debug!(
                %request_id,
                "duplicate or unmatched binary result (ignoring)"
            ),
        }
    }
}
