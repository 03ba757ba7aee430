//! # Docket Client
//!
//! A document-database client that speaks to a remote engine over one
//! persistent, full-duplex socket connection per logical database.
//!
//! The first session opened for a name establishes the connection and
//! binds it to a database on the server; further sessions for the same
//! name share that connection, its correlation table, its live
//! subscriptions and its pending attachment transfers. Unrelated database
//! names get unrelated connections.
//!
//! ## Example
//!
//! ```rust,ignore
//! let client = SocketClient::new(Arc::new(TcpConnector::new()));
//! let session = client.open(DatabaseOptions::parse("db.example.com:5984/mydb")?).await?;
//!
//! session.put(json!({"_id": "greeting", "text": "hello"})).await?;
//! let doc = session.get("greeting", &GetOptions::default()).await?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod attachments;
mod changes;
mod client;
mod connection;
mod error;
mod options;
mod session;

pub use attachments::Attachment;
pub use changes::LiveChanges;
pub use client::SocketClient;
pub use error::{ClientError, ClientResult};
pub use options::{AllDocsOptions, ChangesOptions, DatabaseOptions, GetOptions, QueryOptions};
pub use session::Session;
