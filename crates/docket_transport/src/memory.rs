//! In-memory loopback transport.
//!
//! Pairs two endpoints over channels so a client and a server can be wired
//! together in one process without network overhead. Used by the
//! cross-crate tests; also handy for embedding a server in-process.

use crate::connection::{ConnectionId, Connector, Listener, Transport};
use crate::error::{TransportError, TransportResult};
use crate::message::Message;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// One end of an in-memory connection.
pub struct MemoryTransport {
    id: ConnectionId,
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    inbound: Mutex<mpsc::UnboundedReceiver<Message>>,
}

/// Creates a connected pair of in-memory endpoints sharing one identity.
///
/// Both ends report the same [`ConnectionId`], mirroring a real transport
/// where the identity names the connection rather than an endpoint.
pub fn pair() -> (Arc<MemoryTransport>, Arc<MemoryTransport>) {
    let id = ConnectionId::fresh();
    let (a_tx, b_rx) = mpsc::unbounded_channel();
    let (b_tx, a_rx) = mpsc::unbounded_channel();

    let a = Arc::new(MemoryTransport {
        id: id.clone(),
        outbound: Mutex::new(Some(a_tx)),
        inbound: Mutex::new(a_rx),
    });
    let b = Arc::new(MemoryTransport {
        id,
        outbound: Mutex::new(Some(b_tx)),
        inbound: Mutex::new(b_rx),
    });
    (a, b)
}

#[async_trait]
impl Transport for MemoryTransport {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    async fn send(&self, message: Message) -> TransportResult<()> {
        let guard = self.outbound.lock().await;
        let sender = guard.as_ref().ok_or(TransportError::Closed)?;
        sender.send(message).map_err(|_| TransportError::Closed)
    }

    async fn recv(&self) -> TransportResult<Option<Message>> {
        Ok(self.inbound.lock().await.recv().await)
    }

    async fn close(&self) -> TransportResult<()> {
        // Dropping the sender ends the peer's inbound stream; closing the
        // receiver ends ours.
        self.outbound.lock().await.take();
        self.inbound.lock().await.close();
        Ok(())
    }
}

/// Connects to an in-process [`MemoryListener`].
#[derive(Clone)]
pub struct MemoryConnector {
    accept_tx: mpsc::UnboundedSender<Arc<MemoryTransport>>,
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, _addr: &str) -> TransportResult<Arc<dyn Transport>> {
        let (client_end, server_end) = pair();
        self.accept_tx
            .send(server_end)
            .map_err(|_| TransportError::Connect("listener is gone".into()))?;
        Ok(client_end)
    }
}

/// Accepts connections made through a paired [`MemoryConnector`].
pub struct MemoryListener {
    accept_rx: Mutex<mpsc::UnboundedReceiver<Arc<MemoryTransport>>>,
}

impl MemoryListener {
    /// Creates a listener and a connector wired to it.
    pub fn new() -> (Self, MemoryConnector) {
        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        (
            Self {
                accept_rx: Mutex::new(accept_rx),
            },
            MemoryConnector { accept_tx },
        )
    }
}

#[async_trait]
impl Listener for MemoryListener {
    async fn accept(&self) -> TransportResult<Arc<dyn Transport>> {
        let transport = self
            .accept_rx
            .lock()
            .await
            .recv()
            .await
            .ok_or(TransportError::Closed)?;
        Ok(transport as Arc<dyn Transport>)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[tokio::test]
    async fn pair_roundtrip() {
        let (a, b) = pair();
        assert_eq!(a.id(), b.id());

        a.send(Message::Text("ping".into())).await.unwrap();
        b.send(Message::Binary(Bytes::from_static(b"pong")))
            .await
            .unwrap();

        assert_eq!(b.recv().await.unwrap(), Some(Message::Text("ping".into())));
        assert_eq!(
            a.recv().await.unwrap(),
            Some(Message::Binary(Bytes::from_static(b"pong")))
        );
    }

    #[tokio::test]
    async fn close_ends_both_directions() {
        let (a, b) = pair();
        a.close().await.unwrap();

        assert_eq!(b.recv().await.unwrap(), None);
        assert!(matches!(
            a.send(Message::Text("late".into())).await,
            Err(TransportError::Closed)
        ));
    }

    #[tokio::test]
    async fn listener_hands_out_peer_ends() {
        let (listener, connector) = MemoryListener::new();

        let client = connector.connect("memory:db").await.unwrap();
        let server = listener.accept().await.unwrap();

        assert_eq!(client.id(), server.id());

        client.send(Message::Text("hello".into())).await.unwrap();
        assert_eq!(
            server.recv().await.unwrap(),
            Some(Message::Text("hello".into()))
        );
    }

    #[tokio::test]
    async fn connect_fails_after_listener_drop() {
        let (listener, connector) = MemoryListener::new();
        drop(listener);

        assert!(connector.connect("memory:db").await.is_err());
    }
}
