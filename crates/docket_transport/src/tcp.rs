//! Reference TCP transport.
//!
//! Each message travels as `[1-byte kind][4-byte big-endian length][payload]`,
//! where kind 0 is text and kind 1 is binary. TCP gives the ordering and
//! reliability guarantees; the length prefix restores message boundaries.

use crate::connection::{ConnectionId, Connector, Listener, Transport};
use crate::error::{TransportError, TransportResult};
use crate::message::Message;
use async_trait::async_trait;
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;

/// Maximum size of a single message (16 MB).
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

const KIND_TEXT: u8 = 0;
const KIND_BINARY: u8 = 1;

/// A TCP-backed [`Transport`].
pub struct TcpTransport {
    id: ConnectionId,
    reader: Mutex<OwnedReadHalf>,
    writer: Mutex<Option<OwnedWriteHalf>>,
    closed: AtomicBool,
}

impl TcpTransport {
    /// Wraps an established stream.
    pub fn new(stream: TcpStream) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            id: ConnectionId::fresh(),
            reader: Mutex::new(reader),
            writer: Mutex::new(Some(writer)),
            closed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    async fn send(&self, message: Message) -> TransportResult<()> {
        if message.len() > MAX_MESSAGE_SIZE {
            return Err(TransportError::MessageTooLarge {
                size: message.len(),
                limit: MAX_MESSAGE_SIZE,
            });
        }

        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(TransportError::Closed)?;

        let (kind, payload): (u8, &[u8]) = match &message {
            Message::Text(text) => (KIND_TEXT, text.as_bytes()),
            Message::Binary(bytes) => (KIND_BINARY, bytes),
        };

        let mut header = [0u8; 5];
        header[0] = kind;
        header[1..].copy_from_slice(&(payload.len() as u32).to_be_bytes());
        writer.write_all(&header).await?;
        writer.write_all(payload).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn recv(&self) -> TransportResult<Option<Message>> {
        if self.closed.load(Ordering::SeqCst) {
            return Ok(None);
        }

        let mut reader = self.reader.lock().await;

        let mut header = [0u8; 5];
        match reader.read_exact(&mut header).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        let size = u32::from_be_bytes([header[1], header[2], header[3], header[4]]) as usize;
        if size > MAX_MESSAGE_SIZE {
            return Err(TransportError::MessageTooLarge {
                size,
                limit: MAX_MESSAGE_SIZE,
            });
        }

        let mut payload = vec![0u8; size];
        reader.read_exact(&mut payload).await?;

        match header[0] {
            KIND_TEXT => {
                let text = String::from_utf8(payload)
                    .map_err(|_| TransportError::InvalidFrame("text frame is not UTF-8".into()))?;
                Ok(Some(Message::Text(text)))
            }
            KIND_BINARY => Ok(Some(Message::Binary(Bytes::from(payload)))),
            other => Err(TransportError::InvalidFrame(format!(
                "unknown message kind {other}"
            ))),
        }
    }

    async fn close(&self) -> TransportResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
        Ok(())
    }
}

/// Establishes [`TcpTransport`] connections.
#[derive(Debug, Clone, Default)]
pub struct TcpConnector;

impl TcpConnector {
    /// Creates a connector.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, addr: &str) -> TransportResult<Arc<dyn Transport>> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| TransportError::Connect(format!("{addr}: {e}")))?;
        stream.set_nodelay(true)?;
        Ok(Arc::new(TcpTransport::new(stream)))
    }
}

/// Accepts [`TcpTransport`] connections on a bound socket.
pub struct TcpTransportListener {
    listener: TcpListener,
}

impl TcpTransportListener {
    /// Binds to the given address.
    pub async fn bind(addr: &str) -> TransportResult<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| TransportError::Connect(format!("bind {addr}: {e}")))?;
        Ok(Self { listener })
    }

    /// Returns the bound local address.
    pub fn local_addr(&self) -> TransportResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }
}

#[async_trait]
impl Listener for TcpTransportListener {
    async fn accept(&self) -> TransportResult<Arc<dyn Transport>> {
        let (stream, _) = self.listener.accept().await?;
        stream.set_nodelay(true)?;
        Ok(Arc::new(TcpTransport::new(stream)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn connected_pair() -> (Arc<dyn Transport>, Arc<dyn Transport>) {
        let listener = TcpTransportListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let accept = tokio::spawn(async move { listener.accept().await.unwrap() });
        let client = TcpConnector::new().connect(&addr).await.unwrap();
        let server = accept.await.unwrap();
        (client, server)
    }

    #[tokio::test]
    async fn text_and_binary_roundtrip_in_order() {
        let (client, server) = connected_pair().await;

        client
            .send(Message::Text("first:frame".into()))
            .await
            .unwrap();
        client
            .send(Message::Binary(Bytes::from_static(b"\x00raw\xff")))
            .await
            .unwrap();
        client.send(Message::Text("third".into())).await.unwrap();

        assert_eq!(
            server.recv().await.unwrap(),
            Some(Message::Text("first:frame".into()))
        );
        assert_eq!(
            server.recv().await.unwrap(),
            Some(Message::Binary(Bytes::from_static(b"\x00raw\xff")))
        );
        assert_eq!(
            server.recv().await.unwrap(),
            Some(Message::Text("third".into()))
        );
    }

    #[tokio::test]
    async fn empty_messages_survive() {
        let (client, server) = connected_pair().await;

        client.send(Message::Text(String::new())).await.unwrap();
        client
            .send(Message::Binary(Bytes::new()))
            .await
            .unwrap();

        assert_eq!(server.recv().await.unwrap(), Some(Message::Text(String::new())));
        assert_eq!(server.recv().await.unwrap(), Some(Message::Binary(Bytes::new())));
    }

    #[tokio::test]
    async fn close_ends_the_peer_stream() {
        let (client, server) = connected_pair().await;

        client.send(Message::Text("last".into())).await.unwrap();
        client.close().await.unwrap();

        assert_eq!(
            server.recv().await.unwrap(),
            Some(Message::Text("last".into()))
        );
        assert_eq!(server.recv().await.unwrap(), None);
    }

    #[tokio::test]
    async fn send_after_close_fails() {
        let (client, _server) = connected_pair().await;

        client.close().await.unwrap();
        let err = client.send(Message::Text("late".into())).await.unwrap_err();
        assert!(matches!(err, TransportError::Closed));
    }

    #[tokio::test]
    async fn each_connection_has_a_distinct_identity() {
        let (a, b) = connected_pair().await;
        assert_ne!(a.id(), b.id());
    }
}
