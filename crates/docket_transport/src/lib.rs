//! # Docket Transport
//!
//! The transport collaborator for the docket protocol: ordered, reliable,
//! full-duplex delivery of discrete text and binary messages, with a
//! stable identity per established connection.
//!
//! This crate provides:
//! - The [`Transport`], [`Connector`] and [`Listener`] trait seams
//! - A reference TCP implementation with length-prefixed framing
//! - An in-memory loopback pair for tests and in-process wiring
//!
//! The protocol layers above never touch sockets directly; they hold an
//! `Arc<dyn Transport>` and rely on these guarantees only.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod connection;
mod error;
mod memory;
mod message;
mod tcp;

pub use connection::{ConnectionId, Connector, Listener, Transport};
pub use error::{TransportError, TransportResult};
pub use memory::{pair, MemoryConnector, MemoryListener, MemoryTransport};
pub use message::Message;
pub use tcp::{TcpConnector, TcpTransport, TcpTransportListener, MAX_MESSAGE_SIZE};
