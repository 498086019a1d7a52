//! Pause and resume forum polling without restarting the process.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};
use utoipa::OpenApi;

use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(paths(monitoring_status, start_monitoring, stop_monitoring))]
pub struct MonitoringApi;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/monitoring",       get(monitoring_status))
        .route("/monitoring/start", post(start_monitoring))
        .route("/monitoring/stop",  post(stop_monitoring))
}

fn body(state: &AppState) -> Json<Value> {
    Json(json!({ "monitoring": !state.monitor.is_paused() }))
}

#[utoipa::path(
    get,
    path = "/monitoring",
    tag = "monitoring",
    responses((status = 200, description = "Whether forum polling is running", body = Value))
)]
pub async fn monitoring_status(State(state): State<Arc<AppState>>) -> Json<Value> {
    body(&state)
}

#[utoipa::path(
    post,
    path = "/monitoring/start",
    tag = "monitoring",
    responses((status = 200, description = "Polling resumed", body = Value))
)]
pub async fn start_monitoring(State(state): State<Arc<AppState>>) -> Json<Value> {
    state.monitor.resume();
    body(&state)
}

#[utoipa::path(
    post,
    path = "/monitoring/stop",
    tag = "monitoring",
    responses((status = 200, description = "Polling paused", body = Value))
)]
pub async fn stop_monitoring(State(state): State<Arc<AppState>>) -> Json<Value> {
    state.monitor.pause();
    body(&state)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::state::test_state;

    #[tokio::test]
    async fn stop_then_start_toggles_polling() {
        let state = test_state().await;
        let Json(stopped) = stop_monitoring(State(Arc::clone(&state))).await;
        assert_eq!(stopped["monitoring"], false);
        assert!(state.monitor.is_paused());

        let Json(started) = start_monitoring(State(Arc::clone(&state))).await;
        assert_eq!(started["monitoring"], true);
    }
}
