//! Process-wide tracing bootstrap shared by both binaries.

use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::MakeWriterExt;

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// `tracing` filter string, e.g. `"info"` or `"debug,hyper=warn"`.
    pub level: String,
    /// Emit newline-delimited JSON instead of the human format.
    pub json: bool,
    /// Also write a daily-rolling file here when set.
    pub dir: Option<PathBuf>,
    pub file_prefix: String,
}

/// Install the global subscriber.
///
/// `RUST_LOG` wins over `level`; an unparsable `level` falls back to `info`
/// with a warning on stderr. The returned guard flushes the file writer and
/// must be held until shutdown.
pub fn init_tracing(cfg: &LogConfig) -> Option<WorkerGuard> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(f) => f,
        Err(_) => match cfg.level.parse::<EnvFilter>() {
            Ok(f) => f,
            Err(e) => {
                eprintln!(
                    "WARN: log level '{}' is not a valid tracing filter ({}); \
                     falling back to 'info'",
                    cfg.level, e
                );
                EnvFilter::new("info")
            }
        },
    };

    let (file_writer, guard) = match &cfg.dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, &cfg.file_prefix);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(writer), Some(guard))
        }
        None => (None, None),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true);

    let result = match (file_writer, cfg.json) {
        (Some(file), true) => builder
            .json()
            .with_writer(std::io::stdout.and(file))
            .try_init(),
        (Some(file), false) => builder.with_writer(std::io::stdout.and(file)).try_init(),
        (None, true) => builder.json().try_init(),
        (None, false) => builder.try_init(),
    };
    if let Err(e) = result {
        eprintln!("WARN: tracing subscriber already installed ({e})");
    }

    guard
}
