//! Worker-side task routing.
//!
//! `receive` validates and enqueues without doing any work, so a slow
//! adapter never blocks intake. Two stage pools drain the queues:
//!
//! ```text
//! receive ──▶ [execute queue] ──▶ execute pool ──▶ [deliver queue] ──▶ deliver pool
//!                                 (adapter call)                      (forum reply)
//! ```
//!
//! A [`LoadSlot`] travels with each job, so the reported load is exactly
//! the number of jobs queued or running in either stage.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};
use webhub_types::{
    ProcessingResult, ReceiveTaskResponse, StatusReport, Task, TaskStatus, WorkerStatus,
};

use crate::adapter::{AdapterSet, adapter_input};
use crate::reply::ReplyManager;
use crate::sink::StatusSink;

#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub execute_workers: usize,
    pub deliver_workers: usize,
    /// Bound of the execute queue; a full queue rejects new tasks.
    pub queue_capacity: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            execute_workers: 2,
            deliver_workers: 1,
            queue_capacity: 32,
        }
    }
}

/// One unit of tracked load; released on drop.
struct LoadSlot(Arc<AtomicU32>);

impl LoadSlot {
    fn take(load: &Arc<AtomicU32>) -> Self {
        load.fetch_add(1, Ordering::AcqRel);
        Self(Arc::clone(load))
    }
}

impl Drop for LoadSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

struct Job {
    task: Task,
    _slot: LoadSlot,
}

pub struct WorkerRouter<K: StatusSink> {
    adapters: AdapterSet,
    sink: Arc<K>,
    execute_tx: flume::Sender<Job>,
    load: Arc<AtomicU32>,
    capacity: u32,
}

impl<K: StatusSink> WorkerRouter<K> {
    /// Build the router and spawn both stage pools on the current runtime.
    ///
    /// Without a reply manager, completed tasks skip the deliver stage.
    pub fn start(
        cfg: RouterConfig,
        adapters: AdapterSet,
        sink: Arc<K>,
        replies: Option<Arc<ReplyManager>>,
    ) -> Arc<Self> {
        let (execute_tx, execute_rx) = flume::bounded::<Job>(cfg.queue_capacity.max(1));
        let (deliver_tx, deliver_rx) = flume::unbounded::<Job>();

        for n in 0..cfg.execute_workers.max(1) {
            let rx = execute_rx.clone();
            let adapters = adapters.clone();
            let sink = Arc::clone(&sink);
            let deliver_tx = replies.as_ref().map(|_| deliver_tx.clone());
            tokio::spawn(async move {
                debug!(stage = "execute", n, "stage worker started");
                while let Ok(job) = rx.recv_async().await {
                    execute(job, &adapters, sink.as_ref(), deliver_tx.as_ref()).await;
                }
            });
        }

        if let Some(replies) = replies {
            for n in 0..cfg.deliver_workers.max(1) {
                let rx = deliver_rx.clone();
                let replies = Arc::clone(&replies);
                let sink = Arc::clone(&sink);
                tokio::spawn(async move {
                    debug!(stage = "deliver", n, "stage worker started");
                    while let Ok(job) = rx.recv_async().await {
                        deliver(job, &replies, sink.as_ref()).await;
                    }
                });
            }
        }

        Arc::new(Self {
            adapters,
            sink,
            execute_tx,
            load: Arc::new(AtomicU32::new(0)),
            capacity: cfg.queue_capacity as u32,
        })
    }

    pub fn sink(&self) -> &Arc<K> {
        &self.sink
    }

    pub fn current_load(&self) -> u32 {
        self.load.load(Ordering::Acquire)
    }

    pub fn status(&self) -> WorkerStatus {
        WorkerStatus {
            online: true,
            current_load: self.current_load(),
            capacity: Some(self.capacity),
        }
    }

    /// Accept or reject a task from the dispatcher.
    ///
    /// Rejections leave every queue untouched.
    pub fn receive(&self, task: Task) -> ReceiveTaskResponse {
        if let Err(e) = task.payload.validate_for(task.task_type) {
            return reject(&task, e.to_string());
        }
        if task.status != TaskStatus::Assigned {
            return reject(&task, format!("task is {}, expected assigned", task.status));
        }
        if !self.adapters.supports(task.task_type) {
            return reject(&task, format!("no adapter for {}", task.task_type));
        }

        let id = task.id.clone();
        let job = Job {
            task,
            _slot: LoadSlot::take(&self.load),
        };
        match self.execute_tx.try_send(job) {
            Ok(()) => {
                info!(task_id = %id, load = self.current_load(), "task accepted");
                ReceiveTaskResponse::accepted()
            }
            Err(flume::TrySendError::Full(job)) => reject(&job.task, "queue full".to_owned()),
            Err(flume::TrySendError::Disconnected(job)) => {
                reject(&job.task, "worker shutting down".to_owned())
            }
        }
    }
}

fn reject(task: &Task, reason: String) -> ReceiveTaskResponse {
    warn!(task_id = %task.id, task_type = %task.task_type, %reason, "task rejected");
    ReceiveTaskResponse::rejected(reason)
}

/// Result document stored on the task: the adapter's data plus its reply
/// text, if any.
fn result_document(result: &ProcessingResult) -> Value {
    let mut doc = match &result.result_data {
        Some(Value::Object(map)) => map.clone(),
        Some(other) => {
            let mut map = Map::new();
            map.insert("data".to_owned(), other.clone());
            map
        }
        None => Map::new(),
    };
    if let Some(text) = &result.reply_text {
        doc.insert("reply_text".to_owned(), Value::String(text.clone()));
    }
    Value::Object(doc)
}

async fn report<K: StatusSink + ?Sized>(sink: &K, task: &Task, report: StatusReport) -> bool {
    match sink.report(task, report).await {
        Ok(()) => true,
        Err(e) => {
            error!(task_id = %task.id, error = %e, "status report failed");
            false
        }
    }
}

async fn execute<K: StatusSink + ?Sized>(
    job: Job,
    adapters: &AdapterSet,
    sink: &K,
    deliver_tx: Option<&flume::Sender<Job>>,
) {
    let Job { mut task, _slot } = job;
    let Some(adapter) = adapters.get(task.task_type) else {
        report(sink, &task, StatusReport::failed("no adapter", false)).await;
        return;
    };

    report(sink, &task, StatusReport::processing()).await;
    debug!(task_id = %task.id, task_type = %task.task_type, "executing");

    let outcome = adapter.execute(task.task_type, adapter_input(&task)).await;
    match outcome {
        Ok(result) if result.success => {
            let doc = result_document(&result);
            let files = result.output_files.clone();
            let reported = report(
                sink,
                &task,
                StatusReport::completed(Some(doc.clone()), files.clone()),
            )
            .await;
            info!(task_id = %task.id, outputs = files.len(), "task completed");

            task.status = TaskStatus::Completed;
            task.result = Some(doc);
            task.output_files.extend(files);
            if let (true, Some(tx)) = (reported, deliver_tx) {
                let job = Job { task, _slot };
                if let Err(e) = tx.send_async(job).await {
                    warn!(error = %e, "deliver stage closed");
                }
            }
        }
        Ok(result) => {
            let error = result
                .error
                .unwrap_or_else(|| "adapter reported failure".to_owned());
            warn!(task_id = %task.id, %error, "task failed");
            report(sink, &task, StatusReport::failed(error, true)).await;
        }
        Err(e) => {
            warn!(task_id = %task.id, error = %e, "adapter error");
            report(sink, &task, StatusReport::failed(e.to_string(), e.is_retryable())).await;
        }
    }
}

async fn deliver<K: StatusSink + ?Sized>(job: Job, replies: &ReplyManager, sink: &K) {
    let task = &job.task;
    match replies.reply_for_task(task).await {
        Ok(true) => {
            if let Err(e) = sink.mark_replied(&task.id).await {
                error!(task_id = %task.id, error = %e, "could not record reply");
            }
        }
        Ok(false) => debug!(task_id = %task.id, "reply skipped"),
        Err(e) => warn!(task_id = %task.id, error = %e, "reply failed"),
    }
}
