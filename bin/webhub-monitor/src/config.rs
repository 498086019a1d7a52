//! Server configuration, loaded from environment variables at startup.
//!
//! Scalar process settings live here; the structured relay surface (forums,
//! workers, dispatch tuning) is the TOML document in
//! [`webhub_core::config::RelayConfig`].

use std::path::PathBuf;

use webhub_core::logging::LogConfig;

/// Runtime configuration for webhub-monitor.
///
/// Every field has a default so the monitor starts without any environment
/// variables set.
#[derive(Debug, Clone)]
pub struct Config {
    /// TCP address to bind (default: `"0.0.0.0:3000"`).
    pub bind_address: String,

    /// Task store URL (default: `"sqlite://webhub.db"`).
    pub database_url: String,

    /// `tracing` filter string, e.g. `"info"` or `"debug,hyper=warn"`.
    pub log_level: String,

    /// When `true`, emit log records as newline-delimited JSON.
    pub log_json: bool,

    /// Directory for the daily-rolling log file; stdout only when unset.
    pub log_dir: Option<PathBuf>,

    /// Comma-separated allowed CORS origins; any origin when unset.
    pub cors_allowed_origins: Option<String>,
}

impl Config {
    /// Build [`Config`] from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            bind_address: env_or(&lookup, "WEBHUB_BIND", "0.0.0.0:3000"),
            database_url: env_or(&lookup, "WEBHUB_DATABASE_URL", "sqlite://webhub.db"),
            log_level: env_or(&lookup, "WEBHUB_LOG", "info"),
            log_json: lookup("WEBHUB_LOG_JSON")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            log_dir: lookup("WEBHUB_LOG_DIR")
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
            cors_allowed_origins: lookup("WEBHUB_CORS_ORIGINS").filter(|v| !v.trim().is_empty()),
        }
    }

    pub fn log_config(&self) -> LogConfig {
        LogConfig {
            level: self.log_level.clone(),
            json: self.log_json,
            dir: self.log_dir.clone(),
            file_prefix: "webhub-monitor.log".to_owned(),
        }
    }
}

// ── private helpers ──────────────────────────────────────────────────────────

fn env_or(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: &str) -> String {
    lookup(key).unwrap_or_else(|| default.to_owned())
}
