//! Processing adapters: the pluggable handlers that do the actual work for
//! one task type on a worker.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;
use webhub_types::{ProcessingResult, Task, TaskType};

use crate::config::AdapterConfig;
use crate::error::RelayError;

#[async_trait]
pub trait ProcessingAdapter: Send + Sync {
    /// Run one task. `input` is the payload fields merged with the task's
    /// metadata. An `Err` or `success = false` both count as a failed
    /// attempt.
    async fn execute(
        &self,
        task_type: TaskType,
        input: Map<String, Value>,
    ) -> Result<ProcessingResult, RelayError>;
}

/// Payload fields overlaid with metadata; metadata wins on key clashes.
pub fn adapter_input(task: &Task) -> Map<String, Value> {
    let mut input = task.payload.fields();
    for (k, v) in &task.metadata {
        input.insert(k.clone(), Value::String(v.clone()));
    }
    input.insert("task_id".to_owned(), Value::String(task.id.clone()));
    input
}

/// Adapter table of one worker, keyed by task type.
#[derive(Clone, Default)]
pub struct AdapterSet {
    adapters: HashMap<TaskType, Arc<dyn ProcessingAdapter>>,
}

impl AdapterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(configs: &[AdapterConfig]) -> Self {
        let mut set = Self::new();
        for cfg in configs {
            set.register(
                cfg.task_type,
                Arc::new(HttpAdapter::new(&cfg.endpoint, Duration::from_secs(cfg.timeout_secs))),
            );
        }
        set
    }

    pub fn register(&mut self, task_type: TaskType, adapter: Arc<dyn ProcessingAdapter>) {
        self.adapters.insert(task_type, adapter);
    }

    pub fn get(&self, task_type: TaskType) -> Option<Arc<dyn ProcessingAdapter>> {
        self.adapters.get(&task_type).cloned()
    }

    pub fn supports(&self, task_type: TaskType) -> bool {
        self.adapters.contains_key(&task_type)
    }

    pub fn task_types(&self) -> Vec<TaskType> {
        let mut types: Vec<_> = self.adapters.keys().copied().collect();
        types.sort();
        types
    }
}

/// Forwards work to a processing service over HTTP.
///
/// The service receives `{"type": ..., "input": {...}}` and answers with a
/// [`ProcessingResult`].
pub struct HttpAdapter {
    endpoint: String,
    client: Client,
}

#[derive(Serialize)]
struct AdapterRequest<'a> {
    #[serde(rename = "type")]
    task_type: TaskType,
    input: &'a Map<String, Value>,
}

impl HttpAdapter {
    pub fn new(endpoint: &str, timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.to_owned(),
            client: Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
        }
    }
}

#[async_trait]
impl ProcessingAdapter for HttpAdapter {
    async fn execute(
        &self,
        task_type: TaskType,
        input: Map<String, Value>,
    ) -> Result<ProcessingResult, RelayError> {
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&AdapterRequest {
                task_type,
                input: &input,
            })
            .send()
            .await
            .map_err(|e| RelayError::Adapter(format!("{}: {e}", self.endpoint)))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(RelayError::Adapter(format!(
                "{} answered {status}",
                self.endpoint
            )));
        }
        let result: ProcessingResult = resp
            .json()
            .await
            .map_err(|e| RelayError::Adapter(format!("bad adapter response: {e}")))?;
        debug!(endpoint = %self.endpoint, success = result.success, "adapter finished");
        Ok(result)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::BTreeMap;
    use webhub_types::{Payload, TaskPriority, TaskSource, TtsPayload, meta};

    #[test]
    fn metadata_overlays_payload() {
        let mut metadata = BTreeMap::new();
        metadata.insert(meta::POST_ID.to_owned(), "9".to_owned());
        metadata.insert("title".to_owned(), "from metadata".to_owned());
        let task = Task::new(
            TaskSource::ForumPost,
            Payload::Tts(TtsPayload {
                text: "hi".into(),
                title: "from payload".into(),
            }),
            metadata,
            TaskPriority::Normal,
            3,
        );
        let input = adapter_input(&task);
        assert_eq!(input["text"], "hi");
        assert_eq!(input["title"], "from metadata");
        assert_eq!(input["post_id"], "9");
        assert_eq!(input["task_id"], Value::String(task.id.clone()));
    }

    #[test]
    fn adapter_set_lists_supported_types() {
        let set = AdapterSet::from_config(&[AdapterConfig {
            task_type: TaskType::Tts,
            endpoint: "http://127.0.0.1:7000/tts".into(),
            timeout_secs: 5,
        }]);
        assert!(set.supports(TaskType::Tts));
        assert!(!set.supports(TaskType::Video));
        assert_eq!(set.task_types(), vec![TaskType::Tts]);
    }
}
