//! Server configuration.

/// Configuration for the server dispatcher.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Maximum number of live change subscriptions per connection.
    ///
    /// A `liveChanges` command beyond this bound is answered with an
    /// error frame instead of opening another feed.
    pub max_live_feeds: usize,
}

impl ServerConfig {
    /// Creates a configuration with default bounds.
    pub fn new() -> Self {
        Self { max_live_feeds: 64 }
    }

    /// Sets the live subscription bound.
    pub fn with_max_live_feeds(mut self, max: usize) -> Self {
        self.max_live_feeds = max;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new()
    }
}
