//! # Warden Worker
//!
//! Runs the job scheduler against the configured document store.
//!
//! ## Architecture
//!
//! The worker:
//! - Opens the store (PostgreSQL, or in-memory without `DATABASE_URL`)
//! - Registers the built-in `purge-expired-jobs` recurring job
//! - Polls for due jobs until Ctrl-C, then drains and closes the store
//!
//! ## Usage
//!
//! ```bash
//! cargo run -p warden-worker
//! ```

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use warden_shared::db::Db;
use warden_worker::config::WorkerConfig;
use warden_worker::handler::{PurgeExpiredJobs, PURGE_EXPIRED_JOBS, PURGE_SCHEDULE};
use warden_worker::queue::JobQueue;
use warden_worker::runner::Runner;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    tracing::info!("Warden Worker v{} starting...", env!("CARGO_PKG_VERSION"));

    let config = WorkerConfig::from_env()?;
    tracing::info!(
        collection = %config.jobs_collection,
        poll_interval_ms = config.poll_interval_ms,
        "Configuration loaded"
    );

    let db = Db::open(config.database_url.as_deref(), config.max_connections).await?;

    let queue = JobQueue::new(&db, config.jobs_collection.clone()).with_ttl(config.job_ttl());
    queue.ensure_indexes().await?;

    let runner = Runner::new(queue.clone(), config.runner_config());
    runner
        .schedule_with(PURGE_SCHEDULE, PURGE_EXPIRED_JOBS, PurgeExpiredJobs::new(queue))
        .await?;

    runner.start().await;
    tracing::info!("Worker ready and polling for jobs");

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");

    runner.stop().await;
    db.close().await;

    tracing::info!("Worker shut down");
    Ok(())
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "warden_worker=debug,warden_shared=info".into());

    let registry = tracing_subscriber::registry().with(filter);
    if std::env::var("LOG_FORMAT").map(|format| format == "json").unwrap_or(false) {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
