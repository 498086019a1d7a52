//! Axum router construction.
//!
//! [`build`] assembles the complete application router:
//! - CORS and per-request trace-id middleware
//! - health, task, worker and monitoring-control routes
//! - the OpenAPI document at `/api-docs/openapi.json`

pub mod doc;
mod health;
mod monitoring;
mod tasks;
mod workers;

use std::sync::Arc;

use axum::routing::get;
use axum::{Json, Router, middleware};

use crate::middleware::{cors, trace};
use crate::state::AppState;

/// Build the complete Axum [`Router`] for the monitor.
pub fn build(state: Arc<AppState>) -> Router {
    let api_doc = doc::get_docs();

    Router::new()
        .merge(health::router())
        .merge(tasks::router())
        .merge(workers::router())
        .merge(monitoring::router())
        .route(
            "/api-docs/openapi.json",
            get(move || {
                let doc = api_doc.clone();
                async move { Json(doc) }
            }),
        )
        .layer(cors::cors_layer(&state))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            trace::trace_middleware,
        ))
        .with_state(state)
}
