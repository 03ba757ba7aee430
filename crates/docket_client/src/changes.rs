//! Live change subscriptions.

use crate::connection::{CallReply, SharedConnection};
use crate::error::{ClientError, ClientResult};
use docket_protocol::{CommandFrame, ErrorPayload, Operation, RequestId};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// A live change subscription.
///
/// Yields update payloads in the order the server emits them, then ends
/// with exactly one terminal outcome: the completion summary, a server
/// error, or a local cancelled terminal after [`LiveChanges::cancel`].
/// Cancellation is fire-and-forget on the wire; whatever the server still
/// sends for this subscription afterwards is dropped as unmatched.
pub struct LiveChanges {
    shared: Arc<SharedConnection>,
    request_id: RequestId,
    updates: mpsc::UnboundedReceiver<Value>,
    completion: oneshot::Receiver<CallReply>,
    cancelled: bool,
}

impl LiveChanges {
    pub(crate) fn new(
        shared: Arc<SharedConnection>,
        request_id: RequestId,
        updates: mpsc::UnboundedReceiver<Value>,
        completion: oneshot::Receiver<CallReply>,
    ) -> Self {
        Self {
            shared,
            request_id,
            updates,
            completion,
            cancelled: false,
        }
    }

    /// Returns the request identifier the subscription is keyed by.
    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    /// Receives the next update, or `None` once the stream has ended.
    pub async fn next_change(&mut self) -> Option<Value> {
        self.updates.recv().await
    }

    /// Cancels the subscription.
    ///
    /// Unregisters the listener immediately (no update is delivered after
    /// this returns), resolves the terminal slot with a cancelled outcome
    /// exactly once, and asks the server to stop emitting.
    pub async fn cancel(&mut self) {
        if self.cancelled {
            return;
        }
        self.cancelled = true;

        if let Some(slot) = self.shared.remove_live(&self.request_id) {
            let _ = slot.send(CallReply::Failure(ErrorPayload::cancelled()));
        }
        self.updates.close();

        let frame =
            CommandFrame::with_request_id(Operation::CancelChanges, self.request_id.clone(), vec![]);
        if let Err(err) = self.shared.send_plain(frame).await {
            tracing::debug!(error = %err, "cancelChanges was not delivered");
        }
    }

    /// Awaits the terminal outcome of the subscription.
    pub async fn completion(self) -> ClientResult<Value> {
        match self.completion.await {
            Ok(CallReply::Success(summary)) => Ok(summary),
            Ok(CallReply::Failure(payload)) if payload.error == "cancelled" => {
                Err(ClientError::Cancelled)
            }
            Ok(CallReply::Failure(payload)) => Err(ClientError::Remote(payload)),
            Ok(CallReply::Blob(_)) => Err(ClientError::UnexpectedReply(
                "binary payload as a subscription terminal".into(),
            )),
            Err(_) => Err(ClientError::ConnectionClosed),
        }
    }
}
