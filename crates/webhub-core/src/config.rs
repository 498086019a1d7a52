//! Structured relay configuration, loaded from a TOML document with
//! environment overrides.
//!
//! Scalar process settings (bind address, database URL, log level) live in
//! each binary's own `Config::from_env`; this module covers the shape both
//! processes share: forums, workers, classifier rules, dispatch tuning and
//! worker-side adapters.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use webhub_types::{DEFAULT_MAX_RETRIES, TaskPriority, TaskType};

use crate::error::RelayError;

pub const DEFAULT_WORKER_PRIORITY: u32 = 5;

/// Root of the TOML document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub forums: Vec<ForumConfig>,
    pub workers: Vec<WorkerConfig>,
    pub classifier: ClassifierConfig,
    pub dispatch: DispatchConfig,
    pub adapters: Vec<AdapterConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForumConfig {
    pub name: String,
    pub base_url: String,
    pub forum_id: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Priority given to tasks created from this forum's posts.
    #[serde(default)]
    pub task_priority: TaskPriority,
}

impl ForumConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub url: String,
    #[serde(default = "default_worker_priority")]
    pub priority: u32,
}

impl WorkerConfig {
    /// Parse one `url@priority` entry; the priority part is optional.
    pub fn parse_entry(entry: &str) -> Option<Self> {
        let entry = entry.trim();
        if entry.is_empty() {
            return None;
        }
        if let Some((url, priority)) = entry.rsplit_once('@')
            && let Ok(priority) = priority.trim().parse::<u32>()
        {
            return Some(Self {
                url: url.trim().to_owned(),
                priority,
            });
        }
        Some(Self {
            url: entry.to_owned(),
            priority: DEFAULT_WORKER_PRIORITY,
        })
    }
}

/// Keyword rules for [`crate::classifier::Classifier`].
///
/// Keywords are matched case-insensitively against title and content.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub voice_clone_keywords: Vec<String>,
    pub tts_keywords: Vec<String>,
    pub image_keywords: Vec<String>,
    pub fallback: TaskType,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        let words = |list: &[&str]| list.iter().map(|s| (*s).to_owned()).collect();
        Self {
            voice_clone_keywords: words(&[
                "音色克隆",
                "声音克隆",
                "voice clone",
                "克隆音色",
                "克隆声音",
                "语音克隆",
            ]),
            tts_keywords: words(&["tts", "语音合成", "文本转语音", "配音", "朗读", "语音生成"]),
            image_keywords: words(&["图片生成", "生成图片", "画图", "image generation"]),
            fallback: TaskType::Video,
        }
    }
}

/// Delay applied before a re-enqueued task becomes eligible again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RetryBackoff {
    Fixed { secs: u64 },
    Exponential { base_secs: u64, max_secs: u64 },
}

impl Default for RetryBackoff {
    fn default() -> Self {
        RetryBackoff::Exponential {
            base_secs: 5,
            max_secs: 30,
        }
    }
}

impl RetryBackoff {
    /// Delay after the `attempt`-th failure (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            RetryBackoff::Fixed { secs } => Duration::from_secs(secs),
            RetryBackoff::Exponential {
                base_secs,
                max_secs,
            } => {
                let shift = attempt.saturating_sub(1).min(32);
                let secs = base_secs.saturating_mul(1u64 << shift);
                Duration::from_secs(secs.min(max_secs))
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub timeout_secs: u64,
    /// Attempts per dispatch for transient network errors only.
    pub send_attempts: u32,
    pub max_retries: u32,
    pub sweep_interval_secs: u64,
    pub sweep_batch: usize,
    pub health_interval_secs: u64,
    pub health_timeout_secs: u64,
    pub retry_backoff: RetryBackoff,
    /// Reclaim held tasks on offline workers after this long. Disabled when unset.
    pub stuck_task_timeout_secs: Option<u64>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 10,
            send_attempts: 2,
            max_retries: DEFAULT_MAX_RETRIES,
            sweep_interval_secs: 10,
            sweep_batch: 50,
            health_interval_secs: 15,
            health_timeout_secs: 3,
            retry_backoff: RetryBackoff::default(),
            stuck_task_timeout_secs: None,
        }
    }
}

impl DispatchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn health_interval(&self) -> Duration {
        Duration::from_secs(self.health_interval_secs.max(1))
    }

    pub fn health_timeout(&self) -> Duration {
        Duration::from_secs(self.health_timeout_secs)
    }

    pub fn stuck_task_timeout(&self) -> Option<Duration> {
        self.stuck_task_timeout_secs.map(Duration::from_secs)
    }
}

/// Worker-side mapping of a task type to a processing service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterConfig {
    pub task_type: TaskType,
    pub endpoint: String,
    #[serde(default = "default_adapter_timeout")]
    pub timeout_secs: u64,
}

impl RelayConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, RelayError> {
        toml::from_str(raw).map_err(|e| RelayError::Config(e.to_string()))
    }

    /// Load the document from `path`, else from `WEBHUB_CONFIG`, else start
    /// from defaults; then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, RelayError> {
        let path: Option<PathBuf> = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os("WEBHUB_CONFIG").map(PathBuf::from));

        let mut cfg = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(&path).map_err(|e| {
                    RelayError::Config(format!("cannot read {}: {e}", path.display()))
                })?;
                Self::from_toml_str(&raw)?
            }
            None => Self::default(),
        };
        cfg.apply_overrides(|key| std::env::var(key).ok());
        Ok(cfg)
    }

    /// Apply `WEBHUB_*` overrides using `lookup` as the variable source.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(username) = lookup("WEBHUB_FORUM_USERNAME") {
            for forum in &mut self.forums {
                forum.username = username.clone();
            }
        }
        if let Some(password) = lookup("WEBHUB_FORUM_PASSWORD") {
            for forum in &mut self.forums {
                forum.password = password.clone();
            }
        }
        if let Some(list) = lookup("WEBHUB_WORKERS") {
            let workers: Vec<_> = list.split(',').filter_map(WorkerConfig::parse_entry).collect();
            if !workers.is_empty() {
                self.workers = workers;
            }
        }
        if let Some(n) = lookup("WEBHUB_MAX_RETRIES").and_then(|v| v.parse().ok()) {
            self.dispatch.max_retries = n;
        }
    }

    /// Checks a monitor cannot run without.
    pub fn validate_for_monitor(&self) -> Result<(), RelayError> {
        if !self.forums.iter().any(|f| f.enabled) {
            return Err(RelayError::Config("no enabled forum configured".into()));
        }
        for forum in &self.forums {
            if forum.name.trim().is_empty() {
                return Err(RelayError::Config("forum with empty name".into()));
            }
            check_url(&forum.base_url)?;
        }
        let mut names: Vec<_> = self.forums.iter().map(|f| f.name.as_str()).collect();
        names.sort_unstable();
        if names.windows(2).any(|w| w[0] == w[1]) {
            return Err(RelayError::Config("duplicate forum name".into()));
        }
        for worker in &self.workers {
            check_url(&worker.url)?;
        }
        if self.dispatch.send_attempts == 0 {
            return Err(RelayError::Config("dispatch.send_attempts must be >= 1".into()));
        }
        Ok(())
    }

    pub fn validate_for_worker(&self) -> Result<(), RelayError> {
        if self.adapters.is_empty() {
            return Err(RelayError::Config("no processing adapter configured".into()));
        }
        for adapter in &self.adapters {
            check_url(&adapter.endpoint)?;
        }
        for forum in &self.forums {
            check_url(&forum.base_url)?;
        }
        Ok(())
    }

    pub fn forum(&self, name: &str) -> Option<&ForumConfig> {
        self.forums.iter().find(|f| f.name == name)
    }
}

fn check_url(raw: &str) -> Result<(), RelayError> {
    let url = reqwest::Url::parse(raw)
        .map_err(|e| RelayError::Config(format!("invalid url `{raw}`: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(RelayError::Config(format!(
            "unsupported scheme `{other}` in `{raw}`"
        ))),
    }
}

fn default_poll_interval() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

fn default_worker_priority() -> u32 {
    DEFAULT_WORKER_PRIORITY
}

fn default_adapter_timeout() -> u64 {
    300
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::HashMap;

    const SAMPLE: &str = r#"
[[forums]]
name = "main"
base_url = "http://127.0.0.1:9000"
forum_id = "2"
username = "bot"
password = "secret"

[[workers]]
url = "http://10.0.0.2:8001"
priority = 1

[[workers]]
url = "http://10.0.0.3:8001"

[classifier]
tts_keywords = ["read aloud"]

[dispatch]
max_retries = 5
retry_backoff = { kind = "fixed", secs = 7 }

[[adapters]]
task_type = "voice_clone"
endpoint = "http://127.0.0.1:7000/clone"
"#;

    #[test]
    fn parses_document_with_defaults() {
        let cfg = RelayConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(cfg.forums.len(), 1);
        assert_eq!(cfg.forums[0].poll_interval_secs, 10);
        assert!(cfg.forums[0].enabled);
        assert_eq!(cfg.workers[1].priority, DEFAULT_WORKER_PRIORITY);
        assert_eq!(cfg.classifier.tts_keywords, vec!["read aloud".to_owned()]);
        assert!(cfg.classifier.voice_clone_keywords.contains(&"音色克隆".to_owned()));
        assert_eq!(cfg.classifier.fallback, TaskType::Video);
        assert_eq!(cfg.dispatch.max_retries, 5);
        assert_eq!(cfg.dispatch.timeout_secs, 10);
        assert_eq!(cfg.dispatch.retry_backoff, RetryBackoff::Fixed { secs: 7 });
        assert_eq!(cfg.adapters[0].task_type, TaskType::VoiceClone);
        assert_eq!(cfg.adapters[0].timeout_secs, 300);
        cfg.validate_for_monitor().unwrap();
        cfg.validate_for_worker().unwrap();
    }

    #[test]
    fn env_overrides_credentials_and_workers() {
        let mut cfg = RelayConfig::from_toml_str(SAMPLE).unwrap();
        let env: HashMap<&str, &str> = [
            ("WEBHUB_FORUM_PASSWORD", "rotated"),
            ("WEBHUB_WORKERS", "http://a:1@2, http://b:2"),
        ]
        .into_iter()
        .collect();
        cfg.apply_overrides(|k| env.get(k).map(|v| (*v).to_owned()));

        assert_eq!(cfg.forums[0].password, "rotated");
        assert_eq!(cfg.forums[0].username, "bot");
        assert_eq!(
            cfg.workers,
            vec![
                WorkerConfig {
                    url: "http://a:1".into(),
                    priority: 2
                },
                WorkerConfig {
                    url: "http://b:2".into(),
                    priority: DEFAULT_WORKER_PRIORITY
                },
            ]
        );
    }

    #[test]
    fn exponential_backoff_doubles_and_caps() {
        let b = RetryBackoff::default();
        assert_eq!(b.delay(1), Duration::from_secs(5));
        assert_eq!(b.delay(2), Duration::from_secs(10));
        assert_eq!(b.delay(3), Duration::from_secs(20));
        assert_eq!(b.delay(4), Duration::from_secs(30));
        assert_eq!(b.delay(60), Duration::from_secs(30));
    }

    #[test]
    fn monitor_requires_an_enabled_forum() {
        let cfg = RelayConfig::default();
        assert!(matches!(
            cfg.validate_for_monitor(),
            Err(RelayError::Config(_))
        ));
    }

    #[test]
    fn rejects_non_http_worker_url() {
        let mut cfg = RelayConfig::from_toml_str(SAMPLE).unwrap();
        cfg.workers.push(WorkerConfig {
            url: "ftp://10.0.0.9".into(),
            priority: 1,
        });
        assert!(cfg.validate_for_monitor().is_err());
    }

    #[test]
    fn unknown_task_type_is_rejected() {
        let raw = r#"
[[adapters]]
task_type = "podcast"
endpoint = "http://127.0.0.1:7000"
"#;
        assert!(RelayConfig::from_toml_str(raw).is_err());
    }

    #[test]
    fn shipped_example_is_valid_for_both_roles() {
        let raw = include_str!("../../../config/webhub.example.toml");
        let cfg = RelayConfig::from_toml_str(raw).expect("example parses");
        cfg.validate_for_monitor().expect("monitor config");
        cfg.validate_for_worker().expect("worker config");
        assert_eq!(cfg.workers.len(), 2);
        assert_eq!(cfg.dispatch.stuck_task_timeout_secs, None);
        assert_eq!(cfg.adapters[1].timeout_secs, 300);
    }
}
