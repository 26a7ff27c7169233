use std::sync::Arc;

use shared::config::Config;
use tokio_util::sync::CancellationToken;

use crate::services::{ConnectionRegistry, InMemoryMessageStore, MessageStore, MessagingService};

/// Application state shared across all routes.
#[derive(Clone, Debug)]
pub struct AppState {
    /// Resolved configuration.
    pub config: Arc<Config>,
    /// Messaging core shared by the REST and WebSocket handlers.
    pub messaging: MessagingService,
    /// Cancelled when the server begins shutting down; open sockets close on it.
    pub shutdown: CancellationToken,
}

impl AppState {
    /// State over `store`, with the live registry and store timeout taken from `config`.
    #[must_use]
    pub fn new(config: Arc<Config>, store: Arc<dyn MessageStore>) -> Self {
        let registry = Arc::new(ConnectionRegistry::new(config.realtime.channel_capacity));
        let messaging = MessagingService::new(store, registry, config.db.statement_timeout());
        Self {
            config,
            messaging,
            shutdown: CancellationToken::new(),
        }
    }

    /// State backed by a fresh in-memory store.
    #[must_use]
    pub fn in_memory(config: Arc<Config>) -> Self {
        Self::new(config, Arc::new(InMemoryMessageStore::new()))
    }
}
