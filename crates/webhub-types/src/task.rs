use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};
use uuid::Uuid;

use crate::payload::Payload;

/// Default number of failed attempts a task may accumulate before it is
/// permanently failed.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Well-known keys of [`Task::metadata`].
///
/// Metadata carries the forum context needed to reply; the dispatcher never
/// interprets it.
pub mod meta {
    pub const FORUM_NAME: &str = "forum_name";
    pub const POST_ID: &str = "post_id";
    pub const THREAD_URL: &str = "thread_url";
    pub const AUTHOR: &str = "author";
    pub const TITLE: &str = "title";
    pub const DISCOVERED_AT: &str = "discovered_at";
}

/// Closed set of work kinds a worker can execute.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    AsRefStr,
    EnumString,
    EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum TaskType {
    Tts,
    VoiceClone,
    Video,
    Image,
}

impl TaskType {
    /// Speech tasks skip the download stage on the worker.
    pub fn is_speech(&self) -> bool {
        matches!(self, TaskType::Tts | TaskType::VoiceClone)
    }
}

/// Lifecycle state of a [`Task`].
///
/// ```text
/// PENDING ──assign──▶ ASSIGNED ──▶ PROCESSING ──▶ COMPLETED
///    ▲                   │  │            │
///    │                   │  └────────────┴──────▶ FAILED
///    └───── retry ───────┴────────────────────────────┘
/// ```
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    AsRefStr,
    EnumString,
    EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum TaskStatus {
    Pending,
    Assigned,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    /// `COMPLETED` and `FAILED` end an attempt.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// Statuses in which exactly one worker holds the task.
    pub fn is_held(&self) -> bool {
        matches!(self, TaskStatus::Assigned | TaskStatus::Processing)
    }

    /// Whether the state machine has an edge `self -> next`.
    ///
    /// Edges back to `PENDING` exist only for the retry path (`ASSIGNED`
    /// rollback and re-enqueue of a `FAILED` attempt); callers must also
    /// check the retry budget, which this table knows nothing about.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Assigned)
                | (Assigned, Processing)
                | (Assigned, Failed)
                | (Assigned, Pending)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Failed, Pending)
        )
    }
}

/// Queue ordering; higher variants are dispatched first.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    AsRefStr,
    EnumString,
    EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum TaskPriority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

impl TaskPriority {
    /// Numeric rank stored in the `priority_rank` column (higher first).
    pub fn rank(&self) -> i64 {
        match self {
            TaskPriority::Low => 0,
            TaskPriority::Normal => 1,
            TaskPriority::High => 2,
            TaskPriority::Urgent => 3,
        }
    }
}

/// Where a task came from.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    AsRefStr,
    EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TaskSource {
    ForumPost,
    Api,
    Manual,
}

/// One unit of work and its lifecycle.
///
/// `id` and `task_type` never change after creation. All mutation goes
/// through the task manager, which validates every status change against
/// [`TaskStatus::can_transition_to`] and the retry budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub source: TaskSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub payload: Payload,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub retry_count: u32,
    pub max_retries: u32,
    #[serde(default)]
    pub worker_id: Option<String>,
    #[serde(default)]
    pub worker_url: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub assigned_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    /// Earliest instant the dispatcher may pick this task up again.
    #[serde(default)]
    pub retry_after: Option<DateTime<Utc>>,
    #[serde(default)]
    pub output_files: Vec<String>,
    /// Set once the completion reply has been posted to the forum.
    #[serde(default)]
    pub replied: bool,
}

impl Task {
    /// Build a fresh `PENDING` task with a newly allocated id.
    ///
    /// The task type is taken from the payload variant, so the two can never
    /// disagree.
    pub fn new(
        source: TaskSource,
        payload: Payload,
        metadata: BTreeMap<String, String>,
        priority: TaskPriority,
        max_retries: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            task_type: payload.task_type(),
            source,
            source_url: metadata.get(meta::THREAD_URL).cloned(),
            status: TaskStatus::Pending,
            priority,
            payload,
            metadata,
            result: None,
            error_message: None,
            retry_count: 0,
            max_retries,
            worker_id: None,
            worker_url: None,
            created_at: Utc::now(),
            assigned_at: None,
            started_at: None,
            completed_at: None,
            retry_after: None,
            output_files: Vec::new(),
            replied: false,
        }
    }

    pub fn forum_name(&self) -> Option<&str> {
        self.metadata.get(meta::FORUM_NAME).map(String::as_str)
    }

    pub fn post_id(&self) -> Option<&str> {
        self.metadata.get(meta::POST_ID).map(String::as_str)
    }

    /// Whether another failed attempt would still be re-enqueued.
    pub fn has_retry_budget(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// `FAILED` with no budget left: the task never changes again.
    pub fn is_exhausted(&self) -> bool {
        self.status == TaskStatus::Failed && !self.has_retry_budget()
    }

    /// Whether the dispatcher may pick this task at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == TaskStatus::Pending && self.retry_after.is_none_or(|at| at <= now)
    }

    /// Ordering key for the pending queue: priority desc, then FIFO.
    pub fn queue_key(&self) -> (std::cmp::Reverse<TaskPriority>, DateTime<Utc>) {
        (std::cmp::Reverse(self.priority), self.created_at)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Counts by status and by type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStats {
    pub total: u64,
    pub by_status: BTreeMap<String, u64>,
    pub by_type: BTreeMap<String, u64>,
}

impl TaskStats {
    pub fn record(&mut self, task: &Task) {
        self.total += 1;
        *self
            .by_status
            .entry(task.status.as_ref().to_owned())
            .or_default() += 1;
        *self
            .by_type
            .entry(task.task_type.as_ref().to_owned())
            .or_default() += 1;
    }
}
