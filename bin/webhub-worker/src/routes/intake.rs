//! Dispatcher-facing endpoints: task intake and load reporting.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use webhub_types::{ReceiveTaskResponse, Task, WorkerStatus};

use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/receive-task",  post(receive_task))
        .route("/worker-status", get(worker_status))
}

/// Accept or reject a task. Never blocks on processing.
pub async fn receive_task(
    State(state): State<Arc<AppState>>,
    Json(task): Json<Task>,
) -> Json<ReceiveTaskResponse> {
    Json(state.router.receive(task))
}

pub async fn worker_status(State(state): State<Arc<AppState>>) -> Json<WorkerStatus> {
    Json(state.router.status())
}
