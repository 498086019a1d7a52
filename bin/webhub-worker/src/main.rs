//! webhub-worker – entry point.
//!
//! Startup order:
//! 1. Parse CLI flags and environment configuration.
//! 2. Initialise structured tracing.
//! 3. Load the relay configuration and build the processing adapters.
//! 4. Connect the status sink to the monitor and, when forums are
//!    configured, the reply manager.
//! 5. Start the stage pools and serve the intake API with graceful shutdown.

mod config;
mod middleware;
mod routes;
mod state;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};
use webhub_core::config::ForumConfig;
use webhub_core::forum::ClientFactory;
use webhub_core::logging::init_tracing;
use webhub_core::{
    AdapterSet, ForumClient, ForumHub, HttpForumClient, MonitorClient, RelayConfig, RelayError,
    ReplyManager, WorkerRouter,
};

use crate::config::Config;
use crate::state::AppState;

#[derive(Debug, Parser)]
#[command(name = "webhub-worker", version, about = "Task worker node")]
struct Cli {
    /// Relay configuration (TOML). Falls back to `WEBHUB_CONFIG`.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Configuration ───────────────────────────────────────────────────────
    let cli = Cli::parse();
    let cfg = Config::from_env();

    // ── 2. Tracing ─────────────────────────────────────────────────────────────
    let _log_guard = init_tracing(&cfg.log_config());
    info!(version = env!("CARGO_PKG_VERSION"), "webhub-worker starting");

    // ── 3. Adapters ────────────────────────────────────────────────────────────
    let relay = RelayConfig::load(cli.config.as_deref())?;
    relay.validate_for_worker()?;
    let adapters = AdapterSet::from_config(&relay.adapters);
    info!(task_types = ?adapters.task_types(), "adapters ready");

    // ── 4. Status sink and replies ─────────────────────────────────────────────
    let sink = Arc::new(MonitorClient::new(&cfg.monitor_url, cfg.report_timeout()));
    let forums: Vec<ForumConfig> = relay.forums.iter().filter(|f| f.enabled).cloned().collect();
    let replies = if forums.is_empty() {
        warn!("no forums configured; completed tasks will not be replied to");
        None
    } else {
        let timeout = relay.dispatch.timeout();
        let factory: ClientFactory = Arc::new(
            move |forum: &ForumConfig| -> Result<Arc<dyn ForumClient>, RelayError> {
                Ok(Arc::new(HttpForumClient::new(forum, timeout)))
            },
        );
        let hub = Arc::new(ForumHub::new(forums, factory));
        Some(Arc::new(ReplyManager::new(hub)))
    };

    // ── 5. Stage pools and HTTP server ─────────────────────────────────────────
    let router = WorkerRouter::start(cfg.router_config(), adapters, sink, replies);
    info!(
        execute_workers = cfg.execute_workers,
        deliver_workers = cfg.deliver_workers,
        queue_capacity = cfg.queue_capacity,
        monitor = %cfg.monitor_url,
        "stage pools started"
    );

    let state = Arc::new(AppState {
        config: Arc::new(cfg.clone()),
        router,
    });
    let app = routes::build(Arc::clone(&state));
    let addr: SocketAddr = cfg.bind_address.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let in_flight = state.router.current_load();
    if in_flight > 0 {
        warn!(in_flight, "stopping with tasks in flight; the monitor will reclaim them");
    }
    info!("webhub-worker stopped");
    Ok(())
}

/// Returns a future that resolves when SIGINT (Ctrl-C) or SIGTERM is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install CTRL+C signal handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => warn!(error = %e, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received; starting graceful shutdown");
}
