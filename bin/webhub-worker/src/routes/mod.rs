//! Axum router construction for a worker node.

mod health;
mod intake;

use std::sync::Arc;

use axum::{Router, middleware};

use crate::middleware::trace;
use crate::state::AppState;

pub fn build(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(health::router())
        .merge(intake::router())
        .layer(middleware::from_fn(trace::trace_middleware))
        .with_state(state)
}
