//! Worker registry endpoints.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::Value;
use utoipa::OpenApi;
use webhub_types::WorkerDescriptor;

use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(paths(list_workers, check_workers))]
pub struct WorkersApi;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/workers",       get(list_workers))
        .route("/workers/check", post(check_workers))
}

#[derive(Debug, Serialize)]
pub struct CheckResponse {
    pub online: usize,
    pub workers: Vec<WorkerDescriptor>,
}

#[utoipa::path(
    get,
    path = "/workers",
    tag = "workers",
    responses((status = 200, description = "Configured workers and their last known state", body = Value))
)]
pub async fn list_workers(State(state): State<Arc<AppState>>) -> Json<Vec<WorkerDescriptor>> {
    Json(state.registry.snapshot().await)
}

/// Run a health check now instead of waiting for the next tick.
#[utoipa::path(
    post,
    path = "/workers/check",
    tag = "workers",
    responses((status = 200, description = "Workers after the check", body = Value))
)]
pub async fn check_workers(State(state): State<Arc<AppState>>) -> Json<CheckResponse> {
    let online = state.registry.check_all().await;
    Json(CheckResponse {
        online,
        workers: state.registry.snapshot().await,
    })
}
