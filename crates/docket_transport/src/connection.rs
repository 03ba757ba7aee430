//! Transport trait seams.

use crate::error::TransportResult;
use crate::message::Message;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// The stable identity assigned to a connection on establishment.
///
/// The server keys its engine-instance registry by this identity; the
/// `id` operation echoes it back to the client.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Generates a fresh identity.
    pub fn fresh() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the identity as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One ordered, full-duplex message channel between a client session and a
/// server-side handler.
///
/// Implementations guarantee reliable, in-order delivery of whole messages
/// in both directions. `send` may be called from any task; `recv` is
/// driven by a single router task per side.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Returns the connection identity.
    fn id(&self) -> &ConnectionId;

    /// Sends one message.
    async fn send(&self, message: Message) -> TransportResult<()>;

    /// Receives the next message, or `None` once the peer has closed the
    /// connection cleanly.
    async fn recv(&self) -> TransportResult<Option<Message>>;

    /// Closes the connection. Idempotent.
    async fn close(&self) -> TransportResult<()>;
}

/// Establishes outbound connections.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connects to the given address.
    async fn connect(&self, addr: &str) -> TransportResult<Arc<dyn Transport>>;
}

/// Accepts inbound connections.
#[async_trait]
pub trait Listener: Send + Sync {
    /// Waits for the next inbound connection.
    async fn accept(&self) -> TransportResult<Arc<dyn Transport>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_ids_are_unique() {
        assert_ne!(ConnectionId::fresh(), ConnectionId::fresh());
    }
}
