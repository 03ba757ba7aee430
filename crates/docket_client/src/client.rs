//! The client-side connection cache.

use crate::connection::SharedConnection;
use crate::error::ClientResult;
use crate::options::DatabaseOptions;
use crate::session::{ConnectionCache, Session};
use docket_protocol::Operation;
use docket_transport::Connector;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Opens sessions, caching one connection per logical database name.
///
/// The first session for a name dials the connector and binds the
/// connection to a database on the server; later sessions for the same
/// name attach to the cached connection without another round trip.
/// Entries leave the cache exactly once, through the session that closes
/// or destroys them.
pub struct SocketClient {
    connector: Arc<dyn Connector>,
    cache: ConnectionCache,
}

impl SocketClient {
    /// Creates a client around a connector.
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            cache: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Opens a session for the given database.
    ///
    /// Connect failures and the server's answer to `createDatabase` are
    /// surfaced to this caller; reused connections skip both.
    pub async fn open(&self, options: DatabaseOptions) -> ClientResult<Session> {
        options.validate()?;
        let key = options.name.clone();

        if let Some(shared) = self.lookup_live(&key) {
            tracing::debug!(name = %key, "reusing cached connection");
            return Ok(Session::attach(shared, Arc::clone(&self.cache), key));
        }

        let transport = self.connector.connect(&options.url).await?;
        tracing::debug!(name = %key, connection = %transport.id(), "opened connection");
        let shared = SharedConnection::spawn(options.name.clone(), transport);

        let created = shared
            .call(Operation::CreateDatabase, vec![options.create_args()])
            .await
            .and_then(|reply| reply.into_value());
        if let Err(err) = created {
            shared.shutdown().await;
            return Err(err);
        }

        // A concurrent open for the same name may have won while we were
        // connecting; keep the cached winner and fold this connection.
        let (winner, loser) = {
            let mut cache = self.cache.lock();
            match cache.get(&key) {
                Some(existing) if !existing.is_closed() => {
                    (Arc::clone(existing), Some(shared))
                }
                _ => {
                    cache.insert(key.clone(), Arc::clone(&shared));
                    (shared, None)
                }
            }
        };
        if let Some(loser) = loser {
            loser.shutdown().await;
        }

        Ok(Session::attach(winner, Arc::clone(&self.cache), key))
    }

    /// Returns the number of live cached connections.
    pub fn open_connections(&self) -> usize {
        self.cache.lock().len()
    }

    fn lookup_live(&self, key: &str) -> Option<Arc<SharedConnection>> {
        let mut cache = self.cache.lock();
        match cache.get(key) {
            Some(shared) if !shared.is_closed() => Some(Arc::clone(shared)),
            Some(_) => {
                // A connection that died under us; the entry is stale.
                cache.remove(key);
                None
            }
            None => None,
        }
    }
}
