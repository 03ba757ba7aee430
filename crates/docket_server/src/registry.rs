//! Engine instance registry.

use docket_engine::Engine;
use docket_transport::ConnectionId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Maps each connection to the engine instance it is bound to.
///
/// An entry is inserted exactly once, by the connection's `createDatabase`
/// command, and removed exactly once, by whichever of explicit destroy,
/// client close, transport error or disconnect happens first. Removal is
/// idempotent; the engine instance is then released to its own shutdown.
#[derive(Default)]
pub struct EngineRegistry {
    entries: Mutex<HashMap<ConnectionId, Arc<dyn Engine>>>,
}

impl EngineRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds a connection to an engine instance.
    ///
    /// Returns false, leaving the existing binding untouched, if the
    /// connection is already bound.
    pub fn insert(&self, connection: ConnectionId, engine: Arc<dyn Engine>) -> bool {
        let mut entries = self.entries.lock();
        if entries.contains_key(&connection) {
            return false;
        }
        entries.insert(connection, engine);
        true
    }

    /// Returns the engine bound to a connection, if any.
    pub fn get(&self, connection: &ConnectionId) -> Option<Arc<dyn Engine>> {
        self.entries.lock().get(connection).cloned()
    }

    /// Unbinds a connection, returning its engine if it was bound.
    pub fn remove(&self, connection: &ConnectionId) -> Option<Arc<dyn Engine>> {
        self.entries.lock().remove(connection)
    }

    /// Returns the number of bound connections.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if no connections are bound.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
