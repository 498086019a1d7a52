//! Shared application state injected into every Axum handler.

use std::sync::Arc;

use webhub_core::{Dispatcher, ForumMonitor, TaskManager, WorkerRegistry};

use crate::config::Config;

/// State shared across all HTTP handlers and the background loops.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration (env-derived).
    pub config: Arc<Config>,
    pub manager: Arc<TaskManager>,
    pub dispatcher: Arc<Dispatcher>,
    pub registry: Arc<WorkerRegistry>,
    /// Pause switch for every forum polling loop.
    pub monitor: Arc<ForumMonitor>,
}

#[cfg(test)]
pub(crate) async fn test_state() -> Arc<AppState> {
    use webhub_core::config::{DispatchConfig, ForumConfig};
    use webhub_core::forum::ClientFactory;
    use webhub_core::{Classifier, ForumHub, RelayError, RetryBackoff, SqliteTaskStore};

    let store = SqliteTaskStore::in_memory().await.expect("in-memory store");
    let manager = TaskManager::open(store, 3, RetryBackoff::Fixed { secs: 0 })
        .await
        .expect("manager");
    let registry = Arc::new(WorkerRegistry::new(&[], std::time::Duration::from_secs(1)));
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&manager),
        Arc::clone(&registry),
        DispatchConfig::default(),
    ));
    let factory: ClientFactory = Arc::new(
        |_cfg: &ForumConfig| -> Result<Arc<dyn webhub_core::ForumClient>, RelayError> {
            Err(RelayError::Config("no forums in tests".into()))
        },
    );
    let hub = Arc::new(ForumHub::new(Vec::<ForumConfig>::new(), factory));
    let monitor = Arc::new(ForumMonitor::new(
        hub,
        Arc::clone(&dispatcher),
        Classifier::default(),
    ));
    Arc::new(AppState {
        config: Arc::new(Config::from_lookup(|_| None)),
        manager,
        dispatcher,
        registry,
        monitor,
    })
}
