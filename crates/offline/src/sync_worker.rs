//! Background worker that drains the pending queue.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::SyncWorkerConfig;
use crate::queue::PendingEventQueue;
use crate::types::PendingEvent;

/// Why a delivery attempt did not succeed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeliveryError {
    /// No connectivity. Ends the current cycle.
    #[error("offline")]
    Offline,
    /// The server refused the event.
    #[error("rejected: {0}")]
    Rejected(String),
    #[error("transport error: {0}")]
    Transport(String),
}

/// Delivers one event to the server.
#[async_trait]
pub trait EventSender: Send + Sync {
    /// Connectivity check made before any event is marked `syncing`.
    async fn is_online(&self) -> bool {
        true
    }

    async fn send(&self, event: &PendingEvent) -> Result<(), DeliveryError>;
}

#[async_trait]
impl<T> EventSender for Arc<T>
where
    T: EventSender + ?Sized,
{
    async fn is_online(&self) -> bool {
        (**self).is_online().await
    }

    async fn send(&self, event: &PendingEvent) -> Result<(), DeliveryError> {
        (**self).send(event).await
    }
}

/// Sender that only logs. Used by the binary, where the delivery protocol is
/// not wired up.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingSender;

#[async_trait]
impl EventSender for LoggingSender {
    async fn send(&self, event: &PendingEvent) -> Result<(), DeliveryError> {
        tracing::info!(
            local_id = %event.local_id,
            subject_id = %event.subject_id,
            occurred_on = %event.occurred_on,
            related = event.related_ids.len(),
            attempt = event.attempt_count,
            "delivering wear event"
        );
        Ok(())
    }
}

/// Outcome of one sync cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub attempted: usize,
    pub delivered: usize,
    pub failed: usize,
    /// Retryable events left untouched (offline, or the event disappeared
    /// before its attempt started).
    pub skipped: usize,
    /// The cycle ended because the sender reported no connectivity.
    pub offline: bool,
}

impl CycleReport {
    fn needs_backoff(&self) -> bool {
        self.failed > 0 || self.offline
    }
}

/// Periodically delivers retryable events and prunes stale ones.
pub struct SyncWorker<S> {
    queue: PendingEventQueue,
    sender: Arc<S>,
    config: SyncWorkerConfig,
    shutdown: Arc<Notify>,
}

impl<S> SyncWorker<S>
where
    S: EventSender + 'static,
{
    pub fn new(queue: PendingEventQueue, sender: S, config: SyncWorkerConfig) -> Self {
        Self {
            queue,
            sender: Arc::new(sender),
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Attempt every retryable event once.
    ///
    /// Does nothing until the queue is hydrated. Being offline never uses up
    /// an attempt: the cycle is skipped when `is_online` is false, and an
    /// event whose send reports `DeliveryError::Offline` is released back to
    /// `pending` before the cycle stops.
    pub async fn run_cycle(&self) -> CycleReport {
        Self::cycle(&self.queue, self.sender.as_ref()).await
    }

    async fn cycle(queue: &PendingEventQueue, sender: &S) -> CycleReport {
        let mut report = CycleReport::default();

        if !queue.is_hydrated() {
            tracing::debug!("Skipping sync - queue not hydrated yet");
            return report;
        }

        let retryable = queue.get_retryable();
        if retryable.is_empty() {
            return report;
        }

        if !sender.is_online().await {
            tracing::debug!(pending = retryable.len(), "Skipping sync - no connectivity");
            report.skipped = retryable.len();
            report.offline = true;
            return report;
        }

        tracing::debug!(count = retryable.len(), "syncing pending wear events");

        let mut remaining = retryable.into_iter();
        while let Some(event) = remaining.next() {
            let id = event.local_id;
            if !queue.mark_syncing(id) {
                report.skipped += 1;
                continue;
            }
            report.attempted += 1;

            // Send the state as it stands after marking, so attempt numbers line up.
            let event = queue.get(id).unwrap_or(event);

            match sender.send(&event).await {
                Ok(()) => {
                    queue.remove(id);
                    report.delivered += 1;
                }
                Err(DeliveryError::Offline) => {
                    queue.release(id);
                    report.offline = true;
                    report.skipped += remaining.len();
                    tracing::debug!(skipped = report.skipped, "went offline; ending sync cycle");
                    break;
                }
                Err(err) => {
                    tracing::warn!(local_id = %id, error = %err, "wear event delivery failed");
                    queue.mark_failed(id, err.to_string());
                    report.failed += 1;
                }
            }
        }

        tracing::info!(
            attempted = report.attempted,
            delivered = report.delivered,
            failed = report.failed,
            skipped = report.skipped,
            offline = report.offline,
            "sync cycle finished"
        );
        report
    }

    /// Spawn the worker loop on the current runtime.
    ///
    /// The loop runs a cycle every `sync_interval` (longer after failed or
    /// offline cycles) and prunes every `prune_interval`, until `shutdown`.
    pub fn start(&self) -> tokio::task::JoinHandle<()> {
        let queue = self.queue.clone();
        let sender = self.sender.clone();
        let config = self.config.clone();
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            tracing::info!(
                sync_interval = ?config.sync_interval,
                prune_interval = ?config.prune_interval,
                "Background sync worker started"
            );

            let mut prune_interval = tokio::time::interval(config.prune_interval);
            prune_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick fires immediately; rehydrate has just pruned.
            prune_interval.tick().await;

            let mut consecutive_failures = 0u32;
            let next_sync = tokio::time::sleep(config.sync_interval);
            tokio::pin!(next_sync);

            loop {
                tokio::select! {
                    _ = shutdown.notified() => {
                        tracing::info!("Background sync worker received shutdown signal");
                        break;
                    }
                    _ = prune_interval.tick() => {
                        queue.prune_stale();
                    }
                    _ = &mut next_sync => {
                        let report = Self::cycle(&queue, sender.as_ref()).await;
                        let delay = if report.needs_backoff() {
                            consecutive_failures += 1;
                            let delay = backoff(config.sync_interval, consecutive_failures, config.max_backoff);
                            tracing::debug!(
                                consecutive_failures,
                                ?delay,
                                "Applying backoff before next sync attempt"
                            );
                            delay
                        } else {
                            consecutive_failures = 0;
                            config.sync_interval
                        };
                        // Only a finished cycle moves the deadline; prune ticks leave it alone.
                        next_sync.as_mut().reset(Instant::now() + delay);
                    }
                }
            }

            tracing::info!("Background sync worker stopped");
        })
    }

    /// Request graceful shutdown of the worker.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }
}

/// `base * 2^failures` (exponent capped at 5), never more than `max`.
fn backoff(base: Duration, failures: u32, max: Duration) -> Duration {
    base.saturating_mul(1 << failures.min(5)).min(max)
}
