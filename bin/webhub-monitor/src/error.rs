//! Unified server error type.
//!
//! Every handler returns `Result<T, ServerError>`, which implements
//! [`axum::response::IntoResponse`] so errors become a JSON-body response
//! with a matching status code. Store and transport failures are logged in
//! full but only a generic message reaches the caller.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;
use tracing::error;
use webhub_core::RelayError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Relay(#[from] RelayError),

    /// The caller sent an invalid or malformed request.
    #[error("bad request: {0}")]
    BadRequest(String),
}

impl ServerError {
    fn status_and_message(&self) -> (StatusCode, String) {
        match self {
            ServerError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
            ServerError::Relay(e) => match e {
                RelayError::NotFound(_) => (StatusCode::NOT_FOUND, e.to_string()),
                RelayError::Conflict { .. }
                | RelayError::StaleReport { .. }
                | RelayError::InvalidTransition { .. }
                | RelayError::RetriesExhausted(_) => (StatusCode::CONFLICT, e.to_string()),
                RelayError::Payload(_) => (StatusCode::BAD_REQUEST, e.to_string()),
                RelayError::NoWorkerAvailable => (StatusCode::SERVICE_UNAVAILABLE, e.to_string()),
                other => {
                    error!(error = %other, "request failed");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "internal server error".to_owned(),
                    )
                }
            },
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, client_message) = self.status_and_message();
        (status, Json(json!({ "error": client_message }))).into_response()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use webhub_types::TaskStatus;

    fn status_of(e: RelayError) -> StatusCode {
        ServerError::from(e).into_response().status()
    }

    #[test]
    fn relay_errors_map_to_http_statuses() {
        assert_eq!(status_of(RelayError::NotFound("t1".into())), StatusCode::NOT_FOUND);
        assert_eq!(
            status_of(RelayError::Conflict {
                task_id: "t1".into(),
                expected: TaskStatus::Pending,
                actual: TaskStatus::Assigned,
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(RelayError::StaleReport {
                task_id: "t1".into(),
                worker: "http://old".into(),
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(RelayError::NoWorkerAvailable),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_of(RelayError::Store(sqlx::Error::PoolTimedOut)),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn internal_detail_is_not_leaked() {
        let (_, message) =
            ServerError::from(RelayError::Config("secret path".into())).status_and_message();
        assert_eq!(message, "internal server error");
    }
}
