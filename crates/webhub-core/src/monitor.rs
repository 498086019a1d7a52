//! Per-forum polling loop: fetch, dedup, classify, create, dispatch.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use webhub_types::TaskSource;

use crate::classifier::{Classifier, extract_payload, post_metadata};
use crate::config::ForumConfig;
use crate::dispatcher::Dispatcher;
use crate::error::RelayError;
use crate::forum::ForumHub;
use crate::store::{SqliteTaskStore, TaskStore};

/// What one polling cycle did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub fetched: usize,
    pub duplicates: usize,
    /// Posts whose extracted payload failed validation; each is stored as
    /// a `FAILED` task.
    pub invalid: usize,
    pub created: Vec<String>,
}

pub struct ForumMonitor<S: TaskStore = SqliteTaskStore> {
    hub: Arc<ForumHub>,
    dispatcher: Arc<Dispatcher<S>>,
    classifier: Classifier,
    paused: AtomicBool,
}

impl<S: TaskStore> ForumMonitor<S> {
    pub fn new(hub: Arc<ForumHub>, dispatcher: Arc<Dispatcher<S>>, classifier: Classifier) -> Self {
        Self {
            hub,
            dispatcher,
            classifier,
            paused: AtomicBool::new(false),
        }
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::Release);
        info!("forum monitoring paused");
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::Release);
        info!("forum monitoring resumed");
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// Run one cycle for `forum`.
    ///
    /// Login and fetch failures end the cycle before anything is created. A
    /// store failure stops at the failing post; the remaining posts were
    /// never recorded, so the next cycle sees them again. Each created task
    /// is dispatched on its own spawned task.
    pub async fn poll_once(&self, forum: &ForumConfig) -> Result<CycleReport, RelayError> {
        let name = forum.name.as_str();
        self.hub.ensure_logged_in(name).await?;
        let posts = self.hub.fetch_new_posts(name).await?;

        let manager = self.dispatcher.manager();
        let mut report = CycleReport {
            fetched: posts.len(),
            ..CycleReport::default()
        };

        for post in &posts {
            if manager.find_by_post(name, &post.id).await?.is_some() {
                report.duplicates += 1;
                continue;
            }

            let task_type = self.classifier.classify(post);
            let payload = extract_payload(post, task_type);
            let metadata = post_metadata(name, post);
            if let Err(e) = payload.validate() {
                // Recorded as failed so dedup sees the post next cycle.
                let task = manager
                    .create_rejected(
                        TaskSource::ForumPost,
                        payload,
                        metadata,
                        forum.task_priority,
                        e.to_string(),
                    )
                    .await?;
                warn!(forum = name, post_id = %post.id, task_id = %task.id, error = %e, "post cannot be processed");
                report.invalid += 1;
                continue;
            }
            let task = manager
                .create(TaskSource::ForumPost, payload, metadata, forum.task_priority)
                .await?;

            debug!(forum = name, post_id = %post.id, task_id = %task.id, %task_type, "post classified");
            report.created.push(task.id.clone());
            self.spawn_dispatch(task.id);
        }

        Ok(report)
    }

    fn spawn_dispatch(&self, task_id: String) {
        let dispatcher = Arc::clone(&self.dispatcher);
        tokio::spawn(async move {
            match dispatcher.dispatch(&task_id).await {
                Ok(worker) => debug!(task_id, worker = %worker.url, "dispatched on creation"),
                Err(RelayError::NoWorkerAvailable) => {
                    debug!(task_id, "no worker online; left for sweep")
                }
                Err(e) => debug!(task_id, error = %e, "dispatch on creation failed"),
            }
        });
    }

    /// Poll `forum` forever at its configured interval.
    pub async fn run_forum_loop(self: Arc<Self>, forum: ForumConfig) {
        let mut ticker = tokio::time::interval(forum.poll_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(forum = %forum.name, interval_secs = forum.poll_interval_secs, "forum loop started");
        loop {
            ticker.tick().await;
            if self.is_paused() {
                continue;
            }
            match self.poll_once(&forum).await {
                Ok(report) if !report.created.is_empty() => info!(
                    forum = %forum.name,
                    fetched = report.fetched,
                    created = report.created.len(),
                    duplicates = report.duplicates,
                    "cycle finished"
                ),
                Ok(report) => debug!(forum = %forum.name, fetched = report.fetched, "cycle finished"),
                Err(e @ RelayError::Auth { .. }) => {
                    warn!(forum = %forum.name, error = %e, "cycle skipped: not authenticated")
                }
                Err(e @ RelayError::Transient(_)) => {
                    warn!(forum = %forum.name, error = %e, "cycle skipped: forum unreachable")
                }
                Err(e) => warn!(forum = %forum.name, error = %e, "cycle aborted"),
            }
        }
    }

    /// Spawn one loop per enabled forum.
    pub fn spawn_all(self: &Arc<Self>, forums: &[ForumConfig]) -> Vec<JoinHandle<()>> {
        forums
            .iter()
            .filter(|f| f.enabled)
            .map(|f| tokio::spawn(Arc::clone(self).run_forum_loop(f.clone())))
            .collect()
    }
}
