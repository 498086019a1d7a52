//! Pushes tasks to workers.
//!
//! A dispatch claims the task with a compare-and-set `assign`, then delivers
//! it to the worker's receive endpoint. Only transport failures are retried
//! in place; a worker's `accepted = false` ends the attempt and that worker
//! is never offered the same task again. Every failed attempt goes through
//! [`TaskManager::fail_attempt`], so it is bounded by the retry budget.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use reqwest::Client;
use tracing::{debug, info, warn};
use webhub_types::{ReceiveTaskResponse, StatusReport, Task, TaskStatus, WorkerDescriptor};

use crate::config::DispatchConfig;
use crate::error::RelayError;
use crate::manager::TaskManager;
use crate::registry::WorkerRegistry;
use crate::store::{SqliteTaskStore, TaskStore};

const SEND_RETRY_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub dispatched: usize,
    pub failed: usize,
    pub reclaimed: usize,
}

pub struct Dispatcher<S: TaskStore = SqliteTaskStore> {
    manager: Arc<TaskManager<S>>,
    registry: Arc<WorkerRegistry>,
    client: Client,
    cfg: DispatchConfig,
    /// task id -> workers that rejected it.
    rejected_by: Mutex<HashMap<String, HashSet<String>>>,
}

enum SendError {
    Transient(String),
    Rejected(String),
}

impl<S: TaskStore> Dispatcher<S> {
    pub fn new(manager: Arc<TaskManager<S>>, registry: Arc<WorkerRegistry>, cfg: DispatchConfig) -> Self {
        let client = Client::builder()
            .timeout(cfg.timeout())
            .build()
            .unwrap_or_default();
        Self {
            manager,
            registry,
            client,
            cfg,
            rejected_by: Mutex::new(HashMap::new()),
        }
    }

    pub fn manager(&self) -> &Arc<TaskManager<S>> {
        &self.manager
    }

    pub fn registry(&self) -> &Arc<WorkerRegistry> {
        &self.registry
    }

    fn excluded(&self, task_id: &str) -> HashSet<String> {
        self.rejected_by
            .lock()
            .map(|m| m.get(task_id).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    fn exclude(&self, task_id: &str, worker_id: &str) {
        if let Ok(mut m) = self.rejected_by.lock() {
            m.entry(task_id.to_owned())
                .or_default()
                .insert(worker_id.to_owned());
        }
    }

    /// Drop the rejection list of a task that will never be dispatched again.
    fn settle(&self, task: &Task) {
        if task.status != TaskStatus::Completed && !task.is_exhausted() {
            return;
        }
        if let Ok(mut m) = self.rejected_by.lock() {
            m.remove(&task.id);
        }
    }

    #[cfg(test)]
    pub(crate) fn rejection_entries(&self) -> usize {
        self.rejected_by.lock().map(|m| m.len()).unwrap_or_default()
    }

    /// Assign `task_id` to the best available worker and deliver it.
    ///
    /// On success the worker owns the task. On failure the task is either
    /// untouched (`NoWorkerAvailable`, `Conflict`) or its attempt has been
    /// counted and it is back in `PENDING` or permanently `FAILED`.
    pub async fn dispatch(&self, task_id: &str) -> Result<WorkerDescriptor, RelayError> {
        let task = self.manager.get(task_id).await?;
        if task.status != TaskStatus::Pending {
            return Err(RelayError::Conflict {
                task_id: task.id,
                expected: TaskStatus::Pending,
                actual: task.status,
            });
        }

        let exclude = self.excluded(task_id);
        let worker = self
            .registry
            .select(&exclude)
            .await
            .ok_or(RelayError::NoWorkerAvailable)?;

        let assigned = self.manager.assign(task_id, &worker.id, &worker.url).await?;
        self.registry.acquire(&worker.id).await;
        debug!(task_id, worker = %worker.url, "task assigned");

        match self.send(&worker, &assigned).await {
            Ok(()) => {
                info!(task_id, worker = %worker.url, task_type = %assigned.task_type, "task dispatched");
                Ok(worker)
            }
            Err(SendError::Rejected(reason)) => {
                warn!(task_id, worker = %worker.url, %reason, "worker rejected task");
                self.exclude(task_id, &worker.id);
                self.registry.release(&worker.id).await;
                let failed = self
                    .manager
                    .fail_attempt(task_id, format!("rejected by {}: {reason}", worker.url))
                    .await?;
                self.settle(&failed);
                Err(RelayError::Rejected {
                    worker: worker.url,
                    reason,
                })
            }
            Err(SendError::Transient(message)) => {
                warn!(task_id, worker = %worker.url, error = %message, "dispatch failed");
                self.registry.release(&worker.id).await;
                let failed = self
                    .manager
                    .fail_attempt(task_id, format!("dispatch to {} failed: {message}", worker.url))
                    .await?;
                self.settle(&failed);
                Err(RelayError::Transient(message))
            }
        }
    }

    async fn send(&self, worker: &WorkerDescriptor, task: &Task) -> Result<(), SendError> {
        let url = format!("{}/receive-task", worker.url);
        let attempts = self.cfg.send_attempts.max(1);
        let mut last = String::new();

        for attempt in 1..=attempts {
            match self.client.post(&url).json(task).send().await {
                Ok(resp) if resp.status().is_success() => {
                    let body: ReceiveTaskResponse = resp
                        .json()
                        .await
                        .map_err(|e| SendError::Transient(format!("bad response body: {e}")))?;
                    return if body.accepted {
                        Ok(())
                    } else {
                        Err(SendError::Rejected(
                            body.reason.unwrap_or_else(|| "no reason given".to_owned()),
                        ))
                    };
                }
                Ok(resp) if resp.status().is_client_error() => {
                    return Err(SendError::Rejected(format!("worker answered {}", resp.status())));
                }
                Ok(resp) => last = format!("worker answered {}", resp.status()),
                Err(e) => last = e.to_string(),
            }
            if attempt < attempts {
                debug!(task_id = %task.id, attempt, error = %last, "retrying send");
                tokio::time::sleep(SEND_RETRY_DELAY).await;
            }
        }
        Err(SendError::Transient(last))
    }

    /// Apply a worker's report and release its load slot once the task
    /// leaves the worker.
    pub async fn apply_report(&self, task_id: &str, report: StatusReport) -> Result<Task, RelayError> {
        let before = self.manager.get(task_id).await?;
        let after = self.manager.apply_report(task_id, report).await?;
        if before.status.is_held() && !after.status.is_held() {
            if let Some(worker) = before.worker_id.as_deref() {
                self.registry.release(worker).await;
            }
        }
        self.settle(&after);
        Ok(after)
    }

    /// Treat held tasks on offline workers older than `timeout` as failed
    /// attempts.
    pub async fn reclaim_stuck(&self, timeout: Duration) -> usize {
        let Ok(timeout) = chrono::Duration::from_std(timeout) else {
            return 0;
        };
        let cutoff = Utc::now() - timeout;
        let mut reclaimed = 0;
        for task in self.manager.list_held().await {
            let Some(worker) = task.worker_id.as_deref() else {
                continue;
            };
            let stale = task.assigned_at.is_some_and(|at| at < cutoff);
            if !stale || self.registry.is_online(worker).await {
                continue;
            }
            match self
                .manager
                .fail_attempt(&task.id, format!("worker {worker} went offline"))
                .await
            {
                Ok(after) => {
                    self.settle(&after);
                    self.registry.release(worker).await;
                    reclaimed += 1;
                    warn!(task_id = %task.id, worker, "reclaimed task from offline worker");
                }
                Err(e) => debug!(task_id = %task.id, error = %e, "reclaim skipped"),
            }
        }
        reclaimed
    }

    /// One pass over due `PENDING` tasks in priority order.
    pub async fn sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();
        if let Some(timeout) = self.cfg.stuck_task_timeout() {
            report.reclaimed = self.reclaim_stuck(timeout).await;
        }

        let now = Utc::now();
        let due: Vec<Task> = self
            .manager
            .list_pending(None, self.cfg.sweep_batch)
            .await
            .into_iter()
            .filter(|t| t.is_due(now))
            .collect();

        for task in due {
            match self.dispatch(&task.id).await {
                Ok(_) => report.dispatched += 1,
                Err(RelayError::NoWorkerAvailable) => {
                    // Without exclusions every later task would fail the same way.
                    if self.excluded(&task.id).is_empty() {
                        debug!("no worker available; sweep stopped");
                        break;
                    }
                }
                Err(e) if e.is_contract_violation() => {
                    debug!(task_id = %task.id, error = %e, "task claimed elsewhere");
                }
                Err(e) => {
                    report.failed += 1;
                    debug!(task_id = %task.id, error = %e, "sweep dispatch failed");
                }
            }
        }
        report
    }

    /// Sweep forever at the configured interval.
    pub async fn run_sweep_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.cfg.sweep_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let report = self.sweep().await;
            if report != SweepReport::default() {
                info!(
                    dispatched = report.dispatched,
                    failed = report.failed,
                    reclaimed = report.reclaimed,
                    "sweep finished"
                );
            }
        }
    }
}
