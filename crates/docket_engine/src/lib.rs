//! # Docket Engine
//!
//! The engine collaborator interface: the by-name-invocable set of
//! document-store operations the server dispatcher drives over one
//! connection.
//!
//! The actual storage engine (revision trees, indexes, compaction) lives
//! elsewhere; the dispatcher only needs each operation to resolve to a
//! JSON value or fail with a structured [`EngineError`], plus a streaming
//! change feed and a channel for faults unrelated to any call.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod feed;
mod traits;

pub use error::{EngineError, EngineResult};
pub use feed::{ChangesFeed, FeedCanceller, FeedEmitter, FeedEvent};
pub use traits::{CreateOptions, Engine, EngineFactory};
