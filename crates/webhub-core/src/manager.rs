//! Task manager: the only writer of task state.
//!
//! Every mutation is validated against the state machine, written through
//! to the durable [`TaskStore`] with a status compare-and-set, and only then
//! reflected in the in-memory index that serves read-heavy queries. The
//! index can always be rebuilt from the store.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use webhub_types::{
    Payload, StatusReport, Task, TaskPriority, TaskSource, TaskStats, TaskStatus, TaskType,
};

use crate::config::RetryBackoff;
use crate::error::RelayError;
use crate::store::{SqliteTaskStore, TaskStore};

pub struct TaskManager<S: TaskStore = SqliteTaskStore> {
    store: S,
    index: RwLock<HashMap<String, Task>>,
    /// Serializes read-modify-write cycles within this process. The store's
    /// compare-and-set covers writers in other processes.
    write_lock: Mutex<()>,
    max_retries: u32,
    backoff: RetryBackoff,
}

impl<S: TaskStore> TaskManager<S> {
    pub fn new(store: S, max_retries: u32, backoff: RetryBackoff) -> Self {
        Self {
            store,
            index: RwLock::new(HashMap::new()),
            write_lock: Mutex::new(()),
            max_retries,
            backoff,
        }
    }

    /// Build a manager and load the index from the store.
    pub async fn open(
        store: S,
        max_retries: u32,
        backoff: RetryBackoff,
    ) -> Result<Arc<Self>, RelayError> {
        let manager = Arc::new(Self::new(store, max_retries, backoff));
        manager.rebuild_index().await?;
        Ok(manager)
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Replace the in-memory index with the store's contents.
    pub async fn rebuild_index(&self) -> Result<usize, RelayError> {
        let tasks = self.store.load_all().await?;
        let count = tasks.len();
        let mut index = self.index.write().await;
        index.clear();
        index.extend(tasks.into_iter().map(|t| (t.id.clone(), t)));
        info!(tasks = count, "task index rebuilt");
        Ok(count)
    }

    /// Create a `PENDING` task. The task is durable before this returns.
    pub async fn create(
        &self,
        source: TaskSource,
        payload: Payload,
        metadata: BTreeMap<String, String>,
        priority: TaskPriority,
    ) -> Result<Task, RelayError> {
        payload.validate()?;
        let task = Task::new(source, payload, metadata, priority, self.max_retries);
        self.store.insert(&task).await?;
        self.index
            .write()
            .await
            .insert(task.id.clone(), task.clone());
        info!(task_id = %task.id, task_type = %task.task_type, priority = %task.priority, "task created");
        Ok(task)
    }

    /// Record input that can never be processed as a terminal `FAILED`
    /// task with no retry budget, so it is accounted for exactly once.
    pub async fn create_rejected(
        &self,
        source: TaskSource,
        payload: Payload,
        metadata: BTreeMap<String, String>,
        priority: TaskPriority,
        error: String,
    ) -> Result<Task, RelayError> {
        let mut task = Task::new(source, payload, metadata, priority, self.max_retries);
        task.status = TaskStatus::Failed;
        task.retry_count = task.max_retries;
        task.error_message = Some(error);
        task.completed_at = Some(Utc::now());
        self.store.insert(&task).await?;
        self.index
            .write()
            .await
            .insert(task.id.clone(), task.clone());
        warn!(task_id = %task.id, task_type = %task.task_type, error = task.error_message.as_deref().unwrap_or_default(), "task rejected on creation");
        Ok(task)
    }

    pub async fn get(&self, id: &str) -> Result<Task, RelayError> {
        if let Some(task) = self.index.read().await.get(id) {
            return Ok(task.clone());
        }
        match self.store.get(id).await? {
            Some(task) => {
                self.index
                    .write()
                    .await
                    .insert(task.id.clone(), task.clone());
                Ok(task)
            }
            None => Err(RelayError::NotFound(id.to_owned())),
        }
    }

    /// Claim a `PENDING` task for a worker.
    ///
    /// Fails with [`RelayError::Conflict`] when the task is no longer
    /// pending, which is how a losing dispatcher learns it lost the race.
    pub async fn assign(&self, id: &str, worker_id: &str, worker_url: &str) -> Result<Task, RelayError> {
        self.mutate(id, |task| {
            if task.status != TaskStatus::Pending {
                return Err(RelayError::Conflict {
                    task_id: task.id.clone(),
                    expected: TaskStatus::Pending,
                    actual: task.status,
                });
            }
            task.status = TaskStatus::Assigned;
            task.worker_id = Some(worker_id.to_owned());
            task.worker_url = Some(worker_url.to_owned());
            task.assigned_at = Some(Utc::now());
            task.retry_after = None;
            Ok(())
        })
        .await
    }

    /// Move a task along the state machine.
    ///
    /// `PENDING` as a target is the rollback path and is routed through
    /// [`Self::fail_attempt`] or [`Self::requeue`], so it is bounded by the
    /// retry budget like every other re-enqueue.
    pub async fn update_status(
        &self,
        id: &str,
        status: TaskStatus,
        result: Option<serde_json::Value>,
        error: Option<String>,
    ) -> Result<Task, RelayError> {
        match status {
            TaskStatus::Pending => {
                let current = self.get(id).await?;
                match current.status {
                    TaskStatus::Failed => self.requeue(id).await,
                    TaskStatus::Assigned => {
                        let reason = error.unwrap_or_else(|| "rolled back".to_owned());
                        self.fail_attempt(id, reason).await
                    }
                    from => Err(RelayError::InvalidTransition {
                        task_id: id.to_owned(),
                        from,
                        to: TaskStatus::Pending,
                    }),
                }
            }
            TaskStatus::Assigned => {
                let current = self.get(id).await?;
                Err(RelayError::InvalidTransition {
                    task_id: id.to_owned(),
                    from: current.status,
                    to: TaskStatus::Assigned,
                })
            }
            TaskStatus::Processing => self.mark_processing(id).await,
            TaskStatus::Completed => self.complete(id, result, Vec::new()).await,
            TaskStatus::Failed => {
                let error = error.unwrap_or_else(|| "failed".to_owned());
                self.fail(id, error).await
            }
        }
    }

    pub async fn mark_processing(&self, id: &str) -> Result<Task, RelayError> {
        self.mutate(id, to_processing).await
    }

    /// Terminal success. `output_files` are appended in order.
    pub async fn complete(
        &self,
        id: &str,
        result: Option<serde_json::Value>,
        output_files: Vec<String>,
    ) -> Result<Task, RelayError> {
        self.mutate(id, move |task| to_completed(task, result, output_files))
            .await
    }

    /// Record a failed attempt without re-enqueueing it.
    ///
    /// The attempt still consumes retry budget; a task left `FAILED` with
    /// budget remaining can be brought back with [`Self::requeue`].
    pub async fn fail(&self, id: &str, error: String) -> Result<Task, RelayError> {
        self.mutate(id, move |task| to_failed(task, error)).await
    }

    /// Count a failed attempt on a held task and re-enqueue it if budget
    /// remains; otherwise the task is permanently `FAILED`.
    ///
    /// Internally this is the FAILED -> PENDING edge collapsed into one
    /// durable write, so a crash cannot leave a retry-eligible task stranded.
    pub async fn fail_attempt(&self, id: &str, error: String) -> Result<Task, RelayError> {
        let backoff = self.backoff;
        let task = self
            .mutate(id, move |task| attempt_failed(task, error, backoff))
            .await?;
        log_attempt(&task);
        Ok(task)
    }

    /// Explicitly re-enqueue a `FAILED` task that still has budget.
    pub async fn requeue(&self, id: &str) -> Result<Task, RelayError> {
        let backoff = self.backoff;
        self.mutate(id, move |task| {
            if task.status != TaskStatus::Failed {
                return Err(RelayError::InvalidTransition {
                    task_id: task.id.clone(),
                    from: task.status,
                    to: TaskStatus::Pending,
                });
            }
            if !task.has_retry_budget() {
                return Err(RelayError::RetriesExhausted(task.id.clone()));
            }
            reset_for_retry(task, backoff);
            Ok(())
        })
        .await
    }

    /// Apply a worker's status report.
    ///
    /// The report must come from the worker holding the current attempt;
    /// anything else is a [`RelayError::StaleReport`] and changes nothing.
    /// A retryable failure consumes one attempt and re-enqueues the task
    /// when budget remains; a non-retryable one leaves it `FAILED`.
    pub async fn apply_report(&self, id: &str, report: StatusReport) -> Result<Task, RelayError> {
        let backoff = self.backoff;
        let counts_attempt = report.status == TaskStatus::Failed && report.retryable;
        let task = self
            .mutate(id, move |task| {
                if !report.matches(task) {
                    return Err(RelayError::StaleReport {
                        task_id: task.id.clone(),
                        worker: report.worker_id,
                    });
                }
                match report.status {
                    TaskStatus::Processing => to_processing(task),
                    TaskStatus::Completed => {
                        // A lost `processing` report must not strand a finished task.
                        if task.status == TaskStatus::Assigned {
                            to_processing(task)?;
                        }
                        to_completed(task, report.result, report.output_files)
                    }
                    TaskStatus::Failed => {
                        let error = report
                            .error
                            .unwrap_or_else(|| "worker reported failure".to_owned());
                        if report.retryable {
                            attempt_failed(task, error, backoff)
                        } else {
                            to_failed(task, error)
                        }
                    }
                    // Workers never move a task back to the queue themselves.
                    other => Err(RelayError::InvalidTransition {
                        task_id: task.id.clone(),
                        from: task.status,
                        to: other,
                    }),
                }
            })
            .await?;
        if counts_attempt {
            log_attempt(&task);
        }
        Ok(task)
    }

    /// Set the `replied` flag on a completed task.
    ///
    /// Returns `false` if it was already set.
    pub async fn mark_replied(&self, id: &str) -> Result<bool, RelayError> {
        let mut newly = false;
        self.mutate(id, |task| {
            if task.status != TaskStatus::Completed {
                return Err(RelayError::InvalidTransition {
                    task_id: task.id.clone(),
                    from: task.status,
                    to: TaskStatus::Completed,
                });
            }
            newly = !task.replied;
            task.replied = true;
            Ok(())
        })
        .await?;
        Ok(newly)
    }

    /// `PENDING` tasks in dispatch order: priority desc, then creation asc.
    pub async fn list_pending(&self, task_type: Option<TaskType>, limit: usize) -> Vec<Task> {
        let index = self.index.read().await;
        let mut pending: Vec<Task> = index
            .values()
            .filter(|t| t.status == TaskStatus::Pending)
            .filter(|t| task_type.is_none_or(|ty| t.task_type == ty))
            .cloned()
            .collect();
        pending.sort_by(|a, b| a.queue_key().cmp(&b.queue_key()).then_with(|| a.id.cmp(&b.id)));
        pending.truncate(limit);
        pending
    }

    /// Tasks filtered by status and type, newest first.
    pub async fn list(
        &self,
        status: Option<TaskStatus>,
        task_type: Option<TaskType>,
        limit: usize,
    ) -> Vec<Task> {
        let index = self.index.read().await;
        let mut tasks: Vec<Task> = index
            .values()
            .filter(|t| status.is_none_or(|s| t.status == s))
            .filter(|t| task_type.is_none_or(|ty| t.task_type == ty))
            .cloned()
            .collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        tasks.truncate(limit);
        tasks
    }

    /// Tasks currently held by a worker.
    pub async fn list_held(&self) -> Vec<Task> {
        self.index
            .read()
            .await
            .values()
            .filter(|t| t.status.is_held())
            .cloned()
            .collect()
    }

    pub async fn stats(&self) -> TaskStats {
        let index = self.index.read().await;
        let mut stats = TaskStats::default();
        for task in index.values() {
            stats.record(task);
        }
        stats
    }

    /// Dedup lookup against the durable store.
    pub async fn find_by_post(&self, forum: &str, post_id: &str) -> Result<Option<Task>, RelayError> {
        self.store.find_by_post(forum, post_id).await
    }

    /// Load from the store, apply `f`, compare-and-set on the loaded status,
    /// then refresh the index.
    async fn mutate<F>(&self, id: &str, f: F) -> Result<Task, RelayError>
    where
        F: FnOnce(&mut Task) -> Result<(), RelayError>,
    {
        let _guard = self.write_lock.lock().await;

        let Some(mut task) = self.store.get(id).await? else {
            return Err(RelayError::NotFound(id.to_owned()));
        };
        let expected = task.status;
        f(&mut task)?;

        if !self.store.compare_and_set(&task, expected).await? {
            // Another process moved it; resync and report the race.
            let actual = match self.store.get(id).await? {
                Some(fresh) => {
                    let status = fresh.status;
                    self.index.write().await.insert(fresh.id.clone(), fresh);
                    status
                }
                None => return Err(RelayError::NotFound(id.to_owned())),
            };
            return Err(RelayError::Conflict {
                task_id: id.to_owned(),
                expected,
                actual,
            });
        }

        debug!(task_id = %task.id, from = %expected, to = %task.status, "task updated");
        self.index
            .write()
            .await
            .insert(task.id.clone(), task.clone());
        Ok(task)
    }
}

fn check_edge(task: &Task, to: TaskStatus) -> Result<(), RelayError> {
    if task.status.can_transition_to(to) {
        Ok(())
    } else {
        Err(RelayError::InvalidTransition {
            task_id: task.id.clone(),
            from: task.status,
            to,
        })
    }
}

fn to_processing(task: &mut Task) -> Result<(), RelayError> {
    check_edge(task, TaskStatus::Processing)?;
    task.status = TaskStatus::Processing;
    task.started_at.get_or_insert_with(Utc::now);
    Ok(())
}

fn to_completed(
    task: &mut Task,
    result: Option<serde_json::Value>,
    output_files: Vec<String>,
) -> Result<(), RelayError> {
    check_edge(task, TaskStatus::Completed)?;
    task.status = TaskStatus::Completed;
    task.result = result;
    task.error_message = None;
    task.output_files.extend(output_files);
    task.completed_at = Some(Utc::now());
    Ok(())
}

fn to_failed(task: &mut Task, error: String) -> Result<(), RelayError> {
    check_edge(task, TaskStatus::Failed)?;
    task.status = TaskStatus::Failed;
    task.retry_count = (task.retry_count + 1).min(task.max_retries);
    task.error_message = Some(error);
    task.completed_at = Some(Utc::now());
    Ok(())
}

/// One failed attempt on a held task: re-enqueue while budget remains,
/// otherwise terminal `FAILED`.
fn attempt_failed(task: &mut Task, error: String, backoff: RetryBackoff) -> Result<(), RelayError> {
    if !task.status.is_held() {
        return Err(RelayError::InvalidTransition {
            task_id: task.id.clone(),
            from: task.status,
            to: TaskStatus::Failed,
        });
    }
    let attempts = task.retry_count + 1;
    task.error_message = Some(error);
    if attempts < task.max_retries {
        task.retry_count = attempts;
        reset_for_retry(task, backoff);
    } else {
        task.retry_count = attempts.min(task.max_retries);
        task.status = TaskStatus::Failed;
        task.completed_at = Some(Utc::now());
    }
    Ok(())
}

fn log_attempt(task: &Task) {
    if task.status == TaskStatus::Failed {
        warn!(
            task_id = %task.id,
            retry_count = task.retry_count,
            error = task.error_message.as_deref().unwrap_or_default(),
            "task permanently failed"
        );
    } else {
        info!(
            task_id = %task.id,
            retry_count = task.retry_count,
            retry_after = ?task.retry_after,
            "task re-enqueued"
        );
    }
}

fn reset_for_retry(task: &mut Task, backoff: RetryBackoff) {
    let delay = backoff.delay(task.retry_count.max(1));
    task.status = TaskStatus::Pending;
    task.worker_id = None;
    task.worker_url = None;
    task.assigned_at = None;
    task.completed_at = None;
    task.retry_after = chrono::Duration::from_std(delay)
        .ok()
        .map(|d| Utc::now() + d);
}
