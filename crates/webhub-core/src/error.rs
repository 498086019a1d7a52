use thiserror::Error;
use webhub_types::{PayloadError, TaskStatus};

/// Errors produced by the relay core.
///
/// The first seven variants form the domain taxonomy every component speaks;
/// the rest wrap lower layers.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("task not found: {0}")]
    NotFound(String),

    /// Another dispatcher (or report) changed the task first.
    #[error("task {task_id} is {actual}, expected {expected}")]
    Conflict {
        task_id: String,
        expected: TaskStatus,
        actual: TaskStatus,
    },

    /// A report from a worker that no longer holds the attempt.
    #[error("stale report for task {task_id} from {worker}")]
    StaleReport { task_id: String, worker: String },

    #[error("invalid transition for task {task_id}: {from} -> {to}")]
    InvalidTransition {
        task_id: String,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("forum `{forum}` authentication failed: {message}")]
    Auth { forum: String, message: String },

    #[error("transient error: {0}")]
    Transient(String),

    #[error("no worker available")]
    NoWorkerAvailable,

    #[error("adapter error: {0}")]
    Adapter(String),

    /// The worker answered `accepted = false`.
    #[error("worker {worker} rejected task: {reason}")]
    Rejected { worker: String, reason: String },

    #[error("task {0} has no retries left")]
    RetriesExhausted(String),

    #[error("invalid payload: {0}")]
    Payload(#[from] PayloadError),

    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl RelayError {
    /// Whether the failing operation may succeed on a later cycle.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RelayError::Transient(_) | RelayError::NoWorkerAvailable | RelayError::Adapter(_)
        )
    }

    /// Contract violations are logged and dropped, never propagated as
    /// cycle failures.
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            RelayError::Conflict { .. }
                | RelayError::StaleReport { .. }
                | RelayError::InvalidTransition { .. }
        )
    }
}

impl From<reqwest::Error> for RelayError {
    fn from(e: reqwest::Error) -> Self {
        RelayError::Transient(e.to_string())
    }
}

pub type Result<T, E = RelayError> = std::result::Result<T, E>;
