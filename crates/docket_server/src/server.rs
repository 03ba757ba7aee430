//! The accept loop.

use crate::config::ServerConfig;
use crate::dispatch::ConnectionHandler;
use crate::error::ServerResult;
use crate::registry::EngineRegistry;
use docket_engine::EngineFactory;
use docket_transport::{Listener, Transport};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// The docket server.
///
/// Accepts connections from a [`Listener`] and serves each one with its
/// own handler task; connections are fully independent of each other.
///
/// # Example
///
/// ```rust,ignore
/// let factory = Arc::new(MyEngineFactory::new(data_dir));
/// let server = Server::new(factory, ServerConfig::default());
/// let listener = TcpTransportListener::bind("0.0.0.0:5984").await?;
/// server.serve(listener).await?;
/// ```
pub struct Server {
    registry: Arc<EngineRegistry>,
    factory: Arc<dyn EngineFactory>,
    config: ServerConfig,
}

impl Server {
    /// Creates a server around an engine factory.
    pub fn new(factory: Arc<dyn EngineFactory>, config: ServerConfig) -> Self {
        Self {
            registry: Arc::new(EngineRegistry::new()),
            factory,
            config,
        }
    }

    /// Returns the engine-instance registry.
    pub fn registry(&self) -> &Arc<EngineRegistry> {
        &self.registry
    }

    /// Accepts and serves connections until the listener fails.
    pub async fn serve<L: Listener>(&self, listener: L) -> ServerResult<()> {
        loop {
            let transport = listener.accept().await?;
            self.attach(transport);
        }
    }

    /// Serves one already-established connection.
    ///
    /// Useful for in-process wiring where no listener is involved.
    pub fn attach(&self, transport: Arc<dyn Transport>) -> JoinHandle<()> {
        let handler = ConnectionHandler::new(
            transport,
            Arc::clone(&self.registry),
            Arc::clone(&self.factory),
            self.config.clone(),
        );
        tokio::spawn(handler.run())
    }
}
