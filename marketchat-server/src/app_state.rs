use std::sync::Arc;

use shared::config::server::Config;

use crate::{
    realtime::registry::ConnectionRegistry,
    services::{DeliveryService, PreviewResolvers, QueryService},
    store::{
        ConversationStore, InMemoryConversationStore, InMemoryProfileDirectory, ProfileDirectory,
    },
};

/// Application state shared across all routes and sockets.
#[derive(Debug, Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn ConversationStore>,
    pub registry: Arc<ConnectionRegistry>,
    pub delivery: Arc<DeliveryService>,
    pub queries: Arc<QueryService>,
}

impl AppState {
    /// Wires the services around a store and a profile directory. The
    /// registry is created here and shared by every connection.
    pub fn new(
        config: Arc<Config>,
        store: Arc<dyn ConversationStore>,
        profiles: Arc<dyn ProfileDirectory>,
    ) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let delivery = Arc::new(DeliveryService::new(
            Arc::clone(&store),
            Arc::clone(&registry),
        ));
        let queries = Arc::new(QueryService::new(
            Arc::clone(&store),
            PreviewResolvers::with_profiles(profiles),
            config.pagination,
        ));

        Self {
            config,
            store,
            registry,
            delivery,
            queries,
        }
    }

    /// Process-local state with empty in-memory stores.
    #[must_use]
    pub fn in_memory(config: Arc<Config>) -> Self {
        Self::new(
            config,
            Arc::new(InMemoryConversationStore::new()),
            Arc::new(InMemoryProfileDirectory::new()),
        )
    }
}
