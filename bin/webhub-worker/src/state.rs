//! Shared application state injected into every Axum handler.

use std::sync::Arc;

use webhub_core::{MonitorClient, WorkerRouter};

use crate::config::Config;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// Intake and stage pools; reports go to the monitor over HTTP.
    pub router: Arc<WorkerRouter<MonitorClient>>,
}
