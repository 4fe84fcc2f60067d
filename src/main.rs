use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::Layer;
use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use upframe::api::{self, ApiState};
use upframe::config;
use upframe::context::AppContext;
use upframe::events::EventHub;
use upframe::pool::WorkerPool;
use upframe::queue::JobQueue;
use upframe::store::JobStore;

/// How long workers get to drain after a shutdown signal before the
/// process exits forcefully.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Parser)]
#[command(name = "upframe", about = "Frame-rate upscaling job server", version)]
struct Cli {
    /// Path to the YAML config file.
    #[arg(long = "config_path", default_value = "./config.yml")]
    config_path: PathBuf,
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("upframe: {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = Arc::new(config::load(&cli.config_path)?);
    let _log_guard = init_logging(&config.log_path)?;
    info!(config = %cli.config_path.display(), "starting upframe");

    let store = JobStore::open(&config.database_path).await?;

    let hub = Arc::new(EventHub::new());
    let queue = Arc::new(JobQueue::new(hub.clone()));
    let pending = store.pending_jobs().await?;
    info!(pending = pending.len(), "restored pending jobs from the store");
    for job in pending {
        queue.enqueue(job);
    }

    let ctx = AppContext {
        config: config.clone(),
        store,
        queue,
        hub,
    };

    let cancel = CancellationToken::new();
    let pool = Arc::new(WorkerPool::start(ctx.clone(), cancel.clone()));

    let app = api::router(ApiState {
        ctx,
        pool: pool.clone(),
    });
    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "listening");

    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            signal_cancel.cancel();
        }
    });

    let serve_cancel = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { serve_cancel.cancelled().await })
        .await
        .context("serving http")?;

    cancel.cancel();
    if !pool.shutdown(SHUTDOWN_TIMEOUT).await {
        error!(
            timeout_seconds = SHUTDOWN_TIMEOUT.as_secs(),
            "workers did not drain in time, forcing exit"
        );
        std::process::exit(1);
    }

    info!("shutdown complete");
    Ok(())
}

/// Two sinks: human-readable INFO (or `RUST_LOG`) on stderr, and JSON at
/// DEBUG into a daily-rotated file under `log_path`.
fn init_logging(log_path: &Path) -> Result<tracing_appender::non_blocking::WorkerGuard> {
    std::fs::create_dir_all(log_path)
        .with_context(|| format!("creating log directory {}", log_path.display()))?;

    let file_appender = tracing_appender::rolling::daily(log_path, "upframe.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_ansi(false)
        .with_writer(file_writer)
        .with_filter(LevelFilter::DEBUG);

    let console_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(console_filter);

    tracing_subscriber::registry()
        .with(file_layer)
        .with(console_layer)
        .init();

    Ok(guard)
}
