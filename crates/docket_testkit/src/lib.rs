//! # Docket Testkit
//!
//! Test utilities for docket.
//!
//! This crate provides:
//! - An in-memory [`docket_engine::Engine`] implementation with naive
//!   revision handling, inline attachments and a live change feed
//! - A factory for wiring it into a server under test
//! - Document fixtures shared by the cross-crate tests
//!
//! The engine is deliberately simple: enough document semantics for the
//! protocol layers to be exercised end to end, nothing more.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod engine;
pub mod fixtures;

pub use engine::{MemoryEngine, MemoryEngineFactory};
