//! Wire messages.

use bytes::Bytes;

/// One discrete message on a connection.
///
/// The protocol mixes delimited text frames with raw binary frames on the
/// same connection; the transport preserves which of the two each message
/// is, and their relative order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// A delimited text frame.
    Text(String),
    /// An opaque binary frame.
    Binary(Bytes),
}

impl Message {
    /// Returns the payload length in bytes.
    pub fn len(&self) -> usize {
        match self {
            Message::Text(text) => text.len(),
            Message::Binary(bytes) => bytes.len(),
        }
    }

    /// Returns true if the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true for text messages.
    pub fn is_text(&self) -> bool {
        matches!(self, Message::Text(_))
    }
}

impl From<String> for Message {
    fn from(text: String) -> Self {
        Message::Text(text)
    }
}

impl From<Bytes> for Message {
    fn from(bytes: Bytes) -> Self {
        Message::Binary(bytes)
    }
}
