//! Known workers, their health, and target selection.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use reqwest::Client;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use webhub_types::{WorkerDescriptor, WorkerStatus};

use crate::config::WorkerConfig;

pub struct WorkerRegistry {
    workers: RwLock<Vec<WorkerDescriptor>>,
    client: Client,
    health_timeout: Duration,
}

impl WorkerRegistry {
    /// Workers start offline until their first health check answers.
    pub fn new(workers: &[WorkerConfig], health_timeout: Duration) -> Self {
        Self {
            workers: RwLock::new(descriptors(workers)),
            client: Client::builder()
                .timeout(health_timeout)
                .build()
                .unwrap_or_default(),
            health_timeout,
        }
    }

    /// Swap in a new worker list, keeping state for URLs that remain.
    pub async fn replace(&self, workers: &[WorkerConfig]) {
        let mut current = self.workers.write().await;
        let next = descriptors(workers)
            .into_iter()
            .map(|fresh| match current.iter().find(|w| w.id == fresh.id) {
                Some(old) => WorkerDescriptor {
                    priority: fresh.priority,
                    ..old.clone()
                },
                None => fresh,
            })
            .collect();
        *current = next;
    }

    pub async fn snapshot(&self) -> Vec<WorkerDescriptor> {
        self.workers.read().await.clone()
    }

    pub async fn is_online(&self, worker_id: &str) -> bool {
        self.workers
            .read()
            .await
            .iter()
            .any(|w| w.id == worker_id && w.online)
    }

    /// Probe every worker's status endpoint concurrently.
    ///
    /// Returns the number of workers online afterwards.
    pub async fn check_all(&self) -> usize {
        let targets: Vec<(String, String)> = self
            .workers
            .read()
            .await
            .iter()
            .map(|w| (w.id.clone(), w.url.clone()))
            .collect();

        let probes = targets.into_iter().map(|(id, url)| async move {
            let outcome = self.probe(&url).await;
            (id, outcome)
        });
        let results = join_all(probes).await;

        let mut workers = self.workers.write().await;
        let now = Utc::now();
        for (id, outcome) in results {
            let Some(worker) = workers.iter_mut().find(|w| w.id == id) else {
                continue;
            };
            let was_online = worker.online;
            worker.last_check = Some(now);
            match outcome {
                Ok(status) => {
                    worker.online = status.online;
                    worker.current_load = status.current_load;
                    worker.last_error = None;
                }
                Err(e) => {
                    worker.online = false;
                    worker.last_error = Some(e);
                }
            }
            if was_online != worker.online {
                info!(worker = %worker.url, online = worker.online, "worker state changed");
            }
        }
        workers.iter().filter(|w| w.online).count()
    }

    async fn probe(&self, url: &str) -> Result<WorkerStatus, String> {
        let resp = self
            .client
            .get(format!("{url}/worker-status"))
            .timeout(self.health_timeout)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if !resp.status().is_success() {
            return Err(format!("status endpoint answered {}", resp.status()));
        }
        resp.json::<WorkerStatus>().await.map_err(|e| e.to_string())
    }

    /// Best online worker not in `exclude`: lowest priority value, then
    /// lowest load. Ties keep configuration order.
    pub async fn select(&self, exclude: &HashSet<String>) -> Option<WorkerDescriptor> {
        let workers = self.workers.read().await;
        let mut candidates: Vec<&WorkerDescriptor> = workers
            .iter()
            .filter(|w| w.online && !exclude.contains(&w.id))
            .collect();
        candidates.sort_by_key(|w| (w.priority, w.current_load));
        candidates.first().map(|w| (*w).clone())
    }

    /// Count one more task held by `worker_id`.
    pub async fn acquire(&self, worker_id: &str) {
        if let Some(w) = self.workers.write().await.iter_mut().find(|w| w.id == worker_id) {
            w.current_load += 1;
        }
    }

    pub async fn release(&self, worker_id: &str) {
        if let Some(w) = self.workers.write().await.iter_mut().find(|w| w.id == worker_id) {
            w.current_load = w.current_load.saturating_sub(1);
        }
    }

    /// Force a worker's state, bypassing the health check.
    pub async fn set_online(&self, worker_id: &str, online: bool) {
        if let Some(w) = self.workers.write().await.iter_mut().find(|w| w.id == worker_id) {
            w.online = online;
            w.last_check = Some(Utc::now());
        }
    }

    /// Health-check forever at `interval`.
    pub async fn run_health_loop(self: Arc<Self>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let online = self.check_all().await;
            if online == 0 {
                warn!("no worker online");
            } else {
                debug!(online, "health check finished");
            }
        }
    }
}

fn descriptors(workers: &[WorkerConfig]) -> Vec<WorkerDescriptor> {
    let mut seen = HashSet::new();
    workers
        .iter()
        .map(|w| WorkerDescriptor::new(w.url.clone(), w.priority))
        .filter(|w| seen.insert(w.id.clone()))
        .collect()
}
