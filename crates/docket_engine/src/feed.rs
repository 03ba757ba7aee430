//! Streaming change feeds.

use crate::error::EngineError;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// One event emitted by a streaming change feed.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    /// A single change.
    Change(Value),
    /// The feed finished; carries the completion summary.
    Complete(Value),
    /// The feed failed.
    Error(EngineError),
}

impl FeedEvent {
    /// Returns true if this event ends the feed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, FeedEvent::Complete(_) | FeedEvent::Error(_))
    }
}

/// The consumer half of a streaming change feed.
///
/// Yields zero or more [`FeedEvent::Change`] events in emission order,
/// then exactly one terminal event. If cancelled first, the stream simply
/// ends.
pub struct ChangesFeed {
    events: mpsc::UnboundedReceiver<FeedEvent>,
    cancelled: Arc<AtomicBool>,
}

impl ChangesFeed {
    /// Receives the next event, or `None` once the feed has ended.
    pub async fn next_event(&mut self) -> Option<FeedEvent> {
        self.events.recv().await
    }

    /// Asks the producer to stop emitting. Advisory: events already in
    /// flight may still be received.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Returns a handle that can cancel the feed after it has been moved
    /// into a consumer task.
    pub fn canceller(&self) -> FeedCanceller {
        FeedCanceller {
            cancelled: Arc::clone(&self.cancelled),
        }
    }
}

/// A detached cancel handle for a [`ChangesFeed`].
#[derive(Clone)]
pub struct FeedCanceller {
    cancelled: Arc<AtomicBool>,
}

impl FeedCanceller {
    /// Asks the producer to stop emitting.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

/// The producer half of a streaming change feed.
///
/// The engine holds this while it enumerates changes; emission after
/// cancellation or after a terminal event is silently dropped.
#[derive(Clone)]
pub struct FeedEmitter {
    events: mpsc::UnboundedSender<FeedEvent>,
    cancelled: Arc<AtomicBool>,
}

impl FeedEmitter {
    /// Creates a connected emitter/feed pair.
    pub fn channel() -> (FeedEmitter, ChangesFeed) {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancelled = Arc::new(AtomicBool::new(false));
        (
            FeedEmitter {
                events: tx,
                cancelled: Arc::clone(&cancelled),
            },
            ChangesFeed {
                events: rx,
                cancelled,
            },
        )
    }

    /// Emits one change.
    pub fn change(&self, change: Value) {
        self.emit(FeedEvent::Change(change));
    }

    /// Emits the completion summary and ends the feed.
    pub fn complete(&self, summary: Value) {
        self.emit(FeedEvent::Complete(summary));
    }

    /// Emits a failure and ends the feed.
    pub fn error(&self, error: EngineError) {
        self.emit(FeedEvent::Error(error));
    }

    /// Returns true once the consumer has cancelled the feed.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn emit(&self, event: FeedEvent) {
        if self.is_cancelled() {
            return;
        }
        let _ = self.events.send(event);
    }
}
