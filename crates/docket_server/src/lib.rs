//! # Docket Server
//!
//! The server side of the docket socket protocol: accepts connections,
//! binds each one to a lazily-created engine instance, decodes inbound
//! frames, invokes the named engine operation and encodes the outcome
//! (success, error, binary handoff or streamed update) back onto the same
//! connection.
//!
//! Frames on one connection are decoded in arrival order, but each engine
//! invocation runs in its own task, so results may be sent out of call
//! order; clients correlate by request identifier.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod dispatch;
mod error;
mod registry;
mod server;

pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use registry::EngineRegistry;
pub use server::Server;
