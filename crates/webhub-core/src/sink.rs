//! Where a worker sends task status updates.
//!
//! In-process deployments report straight into the [`Dispatcher`]; a remote
//! worker uses [`MonitorClient`] to reach the monitor's report endpoints.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::warn;
use webhub_types::{RepliedAck, StatusReport, Task};

use crate::dispatcher::Dispatcher;
use crate::error::RelayError;
use crate::store::TaskStore;

#[async_trait]
pub trait StatusSink: Send + Sync + 'static {
    /// Report on the attempt `task` was delivered for.
    async fn report(&self, task: &Task, report: StatusReport) -> Result<(), RelayError>;

    /// Set the task's `replied` flag. `Ok(false)` means it was already set.
    async fn mark_replied(&self, task_id: &str) -> Result<bool, RelayError>;
}

#[async_trait]
impl<S: TaskStore> StatusSink for Dispatcher<S> {
    async fn report(&self, task: &Task, report: StatusReport) -> Result<(), RelayError> {
        self.apply_report(&task.id, report.for_attempt(task))
            .await
            .map(|_| ())
    }

    async fn mark_replied(&self, task_id: &str) -> Result<bool, RelayError> {
        self.manager().mark_replied(task_id).await
    }
}

/// HTTP client for the monitor's `/tasks/{id}/report` and
/// `/tasks/{id}/replied` endpoints.
pub struct MonitorClient {
    base_url: String,
    client: Client,
    attempts: u32,
    retry_delay: Duration,
}

impl MonitorClient {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_owned(),
            client: Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
            attempts: 3,
            retry_delay: Duration::from_secs(1),
        }
    }

    /// `Err((retry, error))`; only transport and 5xx failures are retried.
    async fn post_once<T: serde::Serialize + Sync>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<reqwest::Response, (bool, RelayError)> {
        let resp = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .json(body)
            .send()
            .await
            .map_err(|e| (true, RelayError::from(e)))?;
        match resp.status() {
            s if s.is_success() => Ok(resp),
            StatusCode::NOT_FOUND => Err((false, RelayError::NotFound(path.to_owned()))),
            s if s.is_client_error() => Err((
                false,
                RelayError::Transient(format!("monitor refused {path}: {s}")),
            )),
            s => Err((
                true,
                RelayError::Transient(format!("monitor answered {s} for {path}")),
            )),
        }
    }

    async fn post<T: serde::Serialize + Sync>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<reqwest::Response, RelayError> {
        let mut last = RelayError::Transient("no attempt made".into());
        for attempt in 1..=self.attempts {
            match self.post_once(path, body).await {
                Ok(resp) => return Ok(resp),
                Err((false, e)) => return Err(e),
                Err((true, e)) => {
                    warn!(path, attempt, error = %e, "monitor call failed");
                    last = e;
                }
            }
            if attempt < self.attempts {
                tokio::time::sleep(self.retry_delay).await;
            }
        }
        Err(last)
    }
}

#[async_trait]
impl StatusSink for MonitorClient {
    async fn report(&self, task: &Task, report: StatusReport) -> Result<(), RelayError> {
        self.post(&format!("/tasks/{}/report", task.id), &report.for_attempt(task))
            .await
            .map(|_| ())
    }

    async fn mark_replied(&self, task_id: &str) -> Result<bool, RelayError> {
        let resp = self
            .post(&format!("/tasks/{task_id}/replied"), &serde_json::json!({}))
            .await?;
        let ack: RepliedAck = resp.json().await?;
        Ok(ack.newly_marked)
    }
}
