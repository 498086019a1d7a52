//! webhub-monitor – entry point.
//!
//! Startup order:
//! 1. Parse CLI flags and environment configuration.
//! 2. Initialise structured tracing.
//! 3. Load and validate the relay configuration document.
//! 4. Open the SQLite task store and rebuild the in-memory index.
//! 5. Wire the worker registry, dispatcher, forum hub and monitor.
//! 6. Spawn the health-check, sweep and per-forum polling loops.
//! 7. Build the Axum router and serve with graceful shutdown.

mod config;
mod error;
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
    Classifier, Dispatcher, ForumClient, ForumHub, ForumMonitor, HttpForumClient, RelayConfig,
    RelayError, SqliteTaskStore, TaskManager, WorkerRegistry,
};

use crate::config::Config;
use crate::state::AppState;

#[derive(Debug, Parser)]
#[command(name = "webhub-monitor", version, about = "Forum monitor and task dispatcher")]
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
    info!(version = env!("CARGO_PKG_VERSION"), "webhub-monitor starting");

    // ── 3. Relay configuration ─────────────────────────────────────────────────
    let relay = RelayConfig::load(cli.config.as_deref())?;
    relay.validate_for_monitor()?;
    info!(
        forums = relay.forums.len(),
        workers = relay.workers.len(),
        "relay configuration loaded"
    );

    // ── 4. Task store ──────────────────────────────────────────────────────────
    let store = SqliteTaskStore::connect(&cfg.database_url).await?;
    let manager = TaskManager::open(
        store,
        relay.dispatch.max_retries,
        relay.dispatch.retry_backoff,
    )
    .await?;
    info!(database_url = %cfg.database_url, "task store ready");

    // ── 5. Components ──────────────────────────────────────────────────────────
    let registry = Arc::new(WorkerRegistry::new(
        &relay.workers,
        relay.dispatch.health_timeout(),
    ));
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&manager),
        Arc::clone(&registry),
        relay.dispatch.clone(),
    ));

    let forum_timeout = relay.dispatch.timeout();
    let factory: ClientFactory = Arc::new(
        move |forum: &ForumConfig| -> Result<Arc<dyn ForumClient>, RelayError> {
            Ok(Arc::new(HttpForumClient::new(forum, forum_timeout)))
        },
    );
    let hub = Arc::new(ForumHub::new(relay.forums.clone(), factory));
    let monitor = Arc::new(ForumMonitor::new(
        hub,
        Arc::clone(&dispatcher),
        Classifier::new(&relay.classifier),
    ));

    // ── 6. Background loops ────────────────────────────────────────────────────
    let online = registry.check_all().await;
    info!(online, total = relay.workers.len(), "initial worker health check");

    let health_loop = tokio::spawn(
        Arc::clone(&registry).run_health_loop(relay.dispatch.health_interval()),
    );
    let sweep_loop = tokio::spawn(Arc::clone(&dispatcher).run_sweep_loop());
    let forum_loops = monitor.spawn_all(&relay.forums);
    info!(forums = forum_loops.len(), "forum loops started");

    // ── 7. HTTP server with graceful shutdown ──────────────────────────────────
    let state = Arc::new(AppState {
        config: Arc::new(cfg.clone()),
        manager,
        dispatcher,
        registry,
        monitor,
    });
    let app = routes::build(Arc::clone(&state));
    let addr: SocketAddr = cfg.bind_address.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    health_loop.abort();
    sweep_loop.abort();
    for handle in forum_loops {
        handle.abort();
    }

    info!("webhub-monitor stopped");
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
