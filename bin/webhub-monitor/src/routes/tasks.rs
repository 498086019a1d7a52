//! Task query, submission and worker report endpoints.
//!
//! Workers whose status sink is HTTP post their progress to
//! `/tasks/{id}/report` and `/tasks/{id}/replied`; everything else here is
//! for operators.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};
use utoipa::OpenApi;
use webhub_types::{
    Payload, RepliedAck, StatusReport, Task, TaskPriority, TaskSource, TaskStats, TaskStatus,
    TaskType,
};

use crate::error::ServerError;
use crate::state::AppState;

const DEFAULT_LIMIT: usize = 100;
const MAX_LIMIT: usize = 1000;

#[derive(OpenApi)]
#[openapi(paths(
    list_tasks,
    task_stats,
    get_task,
    create_task,
    report_task,
    mark_replied,
    retry_task
))]
pub struct TasksApi;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/tasks",              get(list_tasks).post(create_task))
        .route("/tasks/stats",        get(task_stats))
        .route("/tasks/{id}",         get(get_task))
        .route("/tasks/{id}/report",  post(report_task))
        .route("/tasks/{id}/replied", post(mark_replied))
        .route("/tasks/{id}/retry",   post(retry_task))
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    #[serde(rename = "type")]
    pub task_type: Option<String>,
    pub limit: Option<usize>,
}

fn parse_filter<T: FromStr>(raw: Option<&str>, what: &str) -> Result<Option<T>, ServerError> {
    raw.filter(|s| !s.is_empty())
        .map(|s| {
            T::from_str(s).map_err(|_| ServerError::BadRequest(format!("unknown {what}: {s}")))
        })
        .transpose()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskRequest {
    #[serde(default)]
    pub source: Option<TaskSource>,
    pub payload: Payload,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub priority: TaskPriority,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskResponse {
    pub task: Task,
    /// Worker the task went to on creation, if one accepted it.
    pub dispatched_to: Option<String>,
}

/// List tasks, newest first.
#[utoipa::path(
    get,
    path = "/tasks",
    tag = "tasks",
    params(
        ("status" = Option<String>, Query, description = "pending, assigned, processing, completed or failed"),
        ("type" = Option<String>, Query, description = "tts, voice_clone, video or image"),
        ("limit" = Option<usize>, Query, description = "At most this many tasks (default 100)"),
    ),
    responses(
        (status = 200, description = "Matching tasks", body = Value),
        (status = 400, description = "Unknown status or type"),
    )
)]
pub async fn list_tasks(
    State(state): State<Arc<AppState>>,
    Query(q): Query<ListQuery>,
) -> Result<Json<Vec<Task>>, ServerError> {
    let status = parse_filter::<TaskStatus>(q.status.as_deref(), "status")?;
    let task_type = parse_filter::<TaskType>(q.task_type.as_deref(), "task type")?;
    let limit = q.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);
    Ok(Json(state.manager.list(status, task_type, limit).await))
}

/// Task counts by status and by type.
#[utoipa::path(
    get,
    path = "/tasks/stats",
    tag = "tasks",
    responses((status = 200, description = "Task counts", body = Value))
)]
pub async fn task_stats(State(state): State<Arc<AppState>>) -> Json<TaskStats> {
    Json(state.manager.stats().await)
}

#[utoipa::path(
    get,
    path = "/tasks/{id}",
    tag = "tasks",
    params(("id" = String, Path, description = "Task id")),
    responses(
        (status = 200, description = "The task", body = Value),
        (status = 404, description = "No such task"),
    )
)]
pub async fn get_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Task>, ServerError> {
    Ok(Json(state.manager.get(&id).await?))
}

/// Submit a task directly and try to dispatch it immediately.
///
/// A task that finds no worker stays `pending` for the sweep.
#[utoipa::path(
    post,
    path = "/tasks",
    tag = "tasks",
    request_body = Value,
    responses(
        (status = 201, description = "Task created", body = Value),
        (status = 400, description = "Invalid payload or source"),
    )
)]
pub async fn create_task(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateTaskRequest>,
) -> Result<(StatusCode, Json<CreateTaskResponse>), ServerError> {
    let source = req.source.unwrap_or(TaskSource::Api);
    if source == TaskSource::ForumPost {
        return Err(ServerError::BadRequest(
            "forum_post tasks are created by the monitor".to_owned(),
        ));
    }

    let task = state
        .manager
        .create(source, req.payload, req.metadata, req.priority)
        .await?;
    info!(task_id = %task.id, task_type = %task.task_type, %source, "task submitted");

    let dispatched_to = match state.dispatcher.dispatch(&task.id).await {
        Ok(worker) => Some(worker.url),
        Err(e) => {
            debug!(task_id = %task.id, error = %e, "not dispatched on submit");
            None
        }
    };
    let task = state.manager.get(&task.id).await?;
    Ok((
        StatusCode::CREATED,
        Json(CreateTaskResponse {
            task,
            dispatched_to,
        }),
    ))
}

/// Progress report from the worker holding the task.
///
/// Reports from any other worker, or about an earlier attempt, are refused.
#[utoipa::path(
    post,
    path = "/tasks/{id}/report",
    tag = "tasks",
    params(("id" = String, Path, description = "Task id")),
    request_body = Value,
    responses(
        (status = 200, description = "Task after the report", body = Value),
        (status = 404, description = "No such task"),
        (status = 409, description = "Stale report or one that does not fit the task's state"),
    )
)]
pub async fn report_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(report): Json<StatusReport>,
) -> Result<Json<Task>, ServerError> {
    Ok(Json(state.dispatcher.apply_report(&id, report).await?))
}

#[utoipa::path(
    post,
    path = "/tasks/{id}/replied",
    tag = "tasks",
    params(("id" = String, Path, description = "Task id")),
    responses(
        (status = 200, description = "Whether this call set the flag", body = Value),
        (status = 404, description = "No such task"),
        (status = 409, description = "Task is not completed"),
    )
)]
pub async fn mark_replied(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<RepliedAck>, ServerError> {
    let newly_marked = state.manager.mark_replied(&id).await?;
    Ok(Json(RepliedAck { newly_marked }))
}

/// Put a failed task with retry budget left back in the queue.
#[utoipa::path(
    post,
    path = "/tasks/{id}/retry",
    tag = "tasks",
    params(("id" = String, Path, description = "Task id")),
    responses(
        (status = 200, description = "Task re-enqueued", body = Value),
        (status = 409, description = "Task is not failed or has no budget left"),
    )
)]
pub async fn retry_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Task>, ServerError> {
    Ok(Json(state.manager.requeue(&id).await?))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::state::test_state;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use serde_json::json;
    use tower::ServiceExt;

    async fn call(app: Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(v) => {
                req = req.header("content-type", "application/json");
                Body::from(v.to_string())
            }
            None => Body::empty(),
        };
        let resp = app
            .oneshot(req.body(body).expect("request"))
            .await
            .expect("response");
        let status = resp.status();
        let bytes = resp.into_body().collect().await.expect("body").to_bytes();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn submitted_task_waits_pending_without_workers() {
        let state = test_state().await;
        let app = router().with_state(Arc::clone(&state));

        let (status, body) = call(
            app.clone(),
            "POST",
            "/tasks",
            Some(json!({
                "payload": { "kind": "tts", "text": "你好", "title": "" },
                "priority": "high"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["task"]["status"], "pending");
        assert_eq!(body["task"]["source"], "api");
        assert!(body["dispatchedTo"].is_null());

        let (status, stats) = call(app, "GET", "/tasks/stats", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(stats["total"], 1);
        assert_eq!(stats["byStatus"]["pending"], 1);
    }

    #[tokio::test]
    async fn invalid_payload_and_filters_are_bad_requests() {
        let state = test_state().await;
        let app = router().with_state(state);

        let (status, _) = call(
            app.clone(),
            "POST",
            "/tasks",
            Some(json!({ "payload": { "kind": "video", "video_url": "" } })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = call(app, "GET", "/tasks?status=running", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap_or("").contains("running"));
    }

    #[tokio::test]
    async fn reports_follow_the_state_machine() {
        let state = test_state().await;
        let app = router().with_state(Arc::clone(&state));
        let (status, _) = call(app.clone(), "POST", "/tasks/nope/replied", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let task = state
            .manager
            .create(
                TaskSource::Manual,
                Payload::Tts(webhub_types::TtsPayload {
                    text: "hi".into(),
                    title: String::new(),
                }),
                BTreeMap::new(),
                TaskPriority::Normal,
            )
            .await
            .expect("create");

        // Not held by any worker yet.
        let uri = format!("/tasks/{}/report", task.id);
        let (status, _) = call(
            app.clone(),
            "POST",
            &uri,
            Some(json!({ "status": "processing" })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        state
            .manager
            .assign(&task.id, "w1", "http://w1")
            .await
            .expect("assign");
        // Only the holder of the current attempt may report on it.
        let (status, _) = call(
            app.clone(),
            "POST",
            &uri,
            Some(json!({ "status": "completed", "workerId": "w0" })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, body) = call(
            app.clone(),
            "POST",
            &uri,
            Some(json!({ "status": "completed", "outputFiles": ["a.wav"], "workerId": "w1", "attempt": 0 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "completed");

        let replied = format!("/tasks/{}/replied", task.id);
        let (_, first) = call(app.clone(), "POST", &replied, None).await;
        let (_, second) = call(app, "POST", &replied, None).await;
        assert_eq!(first["newlyMarked"], true);
        assert_eq!(second["newlyMarked"], false);
    }
}
