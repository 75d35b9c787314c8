//! Offline queue host process.
//!
//! Opens the on-device store, restores the pending queue and drains it in the
//! background until Ctrl-C.

use std::sync::Arc;

use anyhow::Context;
use wardrobe_offline::{AppConfig, LoggingSender, PendingEventQueue, SqliteStore, SyncWorker};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    match std::env::var("WARDROBE_LOG_FORMAT").as_deref() {
        Ok("pretty") => wardrobe_observability::init_pretty(),
        _ => wardrobe_observability::init(),
    }

    let config = AppConfig::from_env().context("invalid configuration")?;
    let db_path = config.database_path();
    tracing::info!(path = %db_path.display(), "opening offline store");

    let store = Arc::new(SqliteStore::open(db_path));
    let queue = PendingEventQueue::new(store, config.queue.clone());

    let report = queue
        .rehydrate()
        .await
        .context("failed to restore pending wear events")?;
    let stats = queue.stats();
    tracing::info!(
        loaded = report.loaded,
        dropped = report.dropped,
        total = stats.total,
        pending = stats.pending,
        failed = stats.failed,
        exhausted = stats.exhausted,
        "offline queue ready"
    );

    let worker = SyncWorker::new(queue.clone(), LoggingSender, config.worker.clone());
    let handle = worker.start();

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("shutdown requested");

    worker.shutdown();
    handle.await.context("sync worker panicked")?;

    queue
        .flush()
        .await
        .context("failed to persist pending wear events")?;
    tracing::info!(remaining = queue.len(), "offline queue flushed");

    Ok(())
}
