use crate::auth::AuthManager;
use crate::backlog::BacklogReconciler;
use crate::config::Config;
use crate::ingest::MessageIngest;
use crate::registry::ConnectionRegistry;
use crate::store::ChatStore;
use std::sync::Arc;

/// Application context containing shared dependencies.
/// Constructed once at process start and cloned into each task; this keeps
/// the registry and stores injected rather than global.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub store: Arc<dyn ChatStore>,
    pub registry: Arc<ConnectionRegistry>,
    pub auth: Arc<AuthManager>,
    pub ingest: Arc<MessageIngest>,
    pub backlog: Arc<BacklogReconciler>,
}

impl AppContext {
    pub fn new(
        config: Arc<Config>,
        store: Arc<dyn ChatStore>,
        registry: Arc<ConnectionRegistry>,
        auth: Arc<AuthManager>,
        ingest: Arc<MessageIngest>,
        backlog: Arc<BacklogReconciler>,
    ) -> Self {
        Self {
            config,
            store,
            registry,
            auth,
            ingest,
            backlog,
        }
    }
}
