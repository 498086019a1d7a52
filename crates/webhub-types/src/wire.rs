//! Messages exchanged between the monitor and workers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::task::{Task, TaskStatus};

/// A worker known to the monitor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerDescriptor {
    pub id: String,
    pub url: String,
    /// Lower values are preferred.
    pub priority: u32,
    pub online: bool,
    pub current_load: u32,
    #[serde(default)]
    pub last_check: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_error: Option<String>,
}

impl WorkerDescriptor {
    /// Workers are identified by their base URL without a trailing slash.
    pub fn new(url: impl Into<String>, priority: u32) -> Self {
        let url = url.into().trim_end_matches('/').to_owned();
        Self {
            id: url.clone(),
            url,
            priority,
            online: false,
            current_load: 0,
            last_check: None,
            last_error: None,
        }
    }
}

/// Answer to `POST /receive-task`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveTaskResponse {
    pub accepted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ReceiveTaskResponse {
    pub fn accepted() -> Self {
        Self {
            accepted: true,
            reason: None,
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            accepted: false,
            reason: Some(reason.into()),
        }
    }
}

/// Answer to `GET /worker-status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerStatus {
    pub online: bool,
    pub current_load: u32,
    #[serde(default)]
    pub capacity: Option<u32>,
}

/// Outcome a worker reports for a task it holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub status: TaskStatus,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub output_files: Vec<String>,
    /// Only meaningful with `status = failed`: whether the failure should
    /// consume a retry and re-enqueue the task.
    #[serde(default)]
    pub retryable: bool,
    /// Worker holding the attempt this report is about.
    #[serde(default)]
    pub worker_id: String,
    /// The task's `retryCount` when that attempt was assigned.
    #[serde(default)]
    pub attempt: u32,
}

impl StatusReport {
    pub fn processing() -> Self {
        Self {
            status: TaskStatus::Processing,
            result: None,
            error: None,
            output_files: Vec::new(),
            retryable: false,
            worker_id: String::new(),
            attempt: 0,
        }
    }

    pub fn completed(result: Option<serde_json::Value>, output_files: Vec<String>) -> Self {
        Self {
            status: TaskStatus::Completed,
            result,
            error: None,
            output_files,
            retryable: false,
            worker_id: String::new(),
            attempt: 0,
        }
    }

    pub fn failed(error: impl Into<String>, retryable: bool) -> Self {
        Self {
            status: TaskStatus::Failed,
            result: None,
            error: Some(error.into()),
            output_files: Vec::new(),
            retryable,
            worker_id: String::new(),
            attempt: 0,
        }
    }

    /// Tie the report to the attempt `task` was delivered for.
    pub fn for_attempt(mut self, task: &Task) -> Self {
        self.worker_id = task.worker_id.clone().unwrap_or_default();
        self.attempt = task.retry_count;
        self
    }

    /// Whether `task` is still in the attempt this report describes.
    pub fn matches(&self, task: &Task) -> bool {
        task.worker_id.as_deref() == Some(self.worker_id.as_str()) && task.retry_count == self.attempt
    }
}

/// Answer to `POST /tasks/{id}/replied`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepliedAck {
    /// `false` when the flag was already set.
    pub newly_marked: bool,
}

/// What a processing adapter hands back.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingResult {
    pub success: bool,
    #[serde(default)]
    pub result_data: Option<serde_json::Value>,
    /// Overrides the default reply text when present.
    #[serde(default)]
    pub reply_text: Option<String>,
    #[serde(default)]
    pub output_files: Vec<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn worker_id_is_normalized_url() {
        let w = WorkerDescriptor::new("http://10.0.0.5:8001/", 2);
        assert_eq!(w.id, "http://10.0.0.5:8001");
        assert_eq!(w.url, w.id);
        assert!(!w.online);
    }

    #[test]
    fn rejection_carries_reason() {
        let json = serde_json::to_string(&ReceiveTaskResponse::rejected("queue full")).unwrap();
        assert_eq!(json, r#"{"accepted":false,"reason":"queue full"}"#);
        let ok = serde_json::to_string(&ReceiveTaskResponse::accepted()).unwrap();
        assert_eq!(ok, r#"{"accepted":true}"#);
    }

    #[test]
    fn worker_status_accepts_minimal_body() {
        let status: WorkerStatus =
            serde_json::from_str(r#"{"online":true,"currentLoad":4}"#).unwrap();
        assert!(status.online);
        assert_eq!(status.current_load, 4);
        assert_eq!(status.capacity, None);
    }

    #[test]
    fn report_matches_only_the_attempt_it_was_stamped_for() {
        use crate::payload::{Payload, TtsPayload};
        use crate::task::{TaskPriority, TaskSource};

        let mut task = Task::new(
            TaskSource::Api,
            Payload::Tts(TtsPayload {
                text: "hi".into(),
                title: String::new(),
            }),
            Default::default(),
            TaskPriority::Normal,
            3,
        );
        task.worker_id = Some("http://a".into());
        let report = StatusReport::failed("crashed", true).for_attempt(&task);
        assert_eq!(report.worker_id, "http://a");
        assert!(report.matches(&task));

        // Same worker, later attempt.
        task.retry_count = 1;
        assert!(!report.matches(&task));

        task.retry_count = 0;
        task.worker_id = Some("http://b".into());
        assert!(!report.matches(&task));

        // Unstamped reports never match a held task.
        assert!(!StatusReport::processing().matches(&task));
    }
}
