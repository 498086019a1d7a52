//! Worker configuration, loaded from environment variables at startup.

use std::path::PathBuf;
use std::time::Duration;

use webhub_core::RouterConfig;
use webhub_core::logging::LogConfig;

#[derive(Debug, Clone)]
pub struct Config {
    /// TCP address to bind (default: `"0.0.0.0:8001"`).
    pub bind_address: String,

    /// Base URL of the monitor that receives status reports.
    pub monitor_url: String,

    /// Timeout for one status report request.
    pub report_timeout_secs: u64,

    /// Concurrent adapter calls.
    pub execute_workers: usize,

    /// Concurrent reply posts.
    pub deliver_workers: usize,

    /// Accepted tasks waiting for an execute worker; beyond this the worker
    /// rejects.
    pub queue_capacity: usize,

    pub log_level: String,
    pub log_json: bool,
    pub log_dir: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = RouterConfig::default();
        Self {
            bind_address: env_or(&lookup, "WEBHUB_WORKER_BIND", "0.0.0.0:8001"),
            monitor_url: env_or(&lookup, "WEBHUB_MONITOR_URL", "http://127.0.0.1:3000"),
            report_timeout_secs: parse_env(&lookup, "WEBHUB_REPORT_TIMEOUT_SECS", 10),
            execute_workers: parse_env(&lookup, "WEBHUB_EXECUTE_WORKERS", defaults.execute_workers),
            deliver_workers: parse_env(&lookup, "WEBHUB_DELIVER_WORKERS", defaults.deliver_workers),
            queue_capacity: parse_env(&lookup, "WEBHUB_QUEUE_CAPACITY", defaults.queue_capacity),
            log_level: env_or(&lookup, "WEBHUB_LOG", "info"),
            log_json: lookup("WEBHUB_LOG_JSON")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            log_dir: lookup("WEBHUB_LOG_DIR")
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
        }
    }

    pub fn report_timeout(&self) -> Duration {
        Duration::from_secs(self.report_timeout_secs)
    }

    pub fn router_config(&self) -> RouterConfig {
        RouterConfig {
            execute_workers: self.execute_workers,
            deliver_workers: self.deliver_workers,
            queue_capacity: self.queue_capacity,
        }
    }

    pub fn log_config(&self) -> LogConfig {
        LogConfig {
            level: self.log_level.clone(),
            json: self.log_json,
            dir: self.log_dir.clone(),
            file_prefix: "webhub-worker.log".to_owned(),
        }
    }
}

// ── private helpers ──────────────────────────────────────────────────────────

fn env_or(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: &str) -> String {
    lookup(key).unwrap_or_else(|| default.to_owned())
}

fn parse_env<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> T {
    lookup(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn stage_sizes_fall_back_on_garbage() {
        let cfg = Config::from_lookup(|k| match k {
            "WEBHUB_EXECUTE_WORKERS" => Some("4".to_owned()),
            "WEBHUB_QUEUE_CAPACITY" => Some("lots".to_owned()),
            _ => None,
        });
        let router = cfg.router_config();
        assert_eq!(router.execute_workers, 4);
        assert_eq!(router.queue_capacity, RouterConfig::default().queue_capacity);
        assert_eq!(cfg.monitor_url, "http://127.0.0.1:3000");
    }
}
