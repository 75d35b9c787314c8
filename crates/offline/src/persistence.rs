//! Ordered, fire-and-forget snapshot writes.
//!
//! Queue mutations hand serialized snapshots to a single writer task over an
//! unbounded channel. The task applies them strictly in the order they were
//! sent, so a later snapshot can never be overwritten by an earlier one.
//! Commands that pile up while the store is busy are drained as a batch; a
//! write that is followed by another write or remove of the same key before
//! the next flush is skipped. Failures are logged and remembered until the next `flush`.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use crate::store::{KeyValueStore, StorageError};

enum PersistCommand {
    Write { key: String, value: String },
    Remove { key: String },
    Flush(oneshot::Sender<Result<(), StorageError>>),
}

/// Handle to the background writer. Dropping every handle stops the writer
/// once queued commands have been applied.
#[derive(Debug, Clone)]
pub(crate) struct PersistenceHandle {
    tx: mpsc::UnboundedSender<PersistCommand>,
}

impl PersistenceHandle {
    /// Spawn the writer on the current Tokio runtime.
    pub(crate) fn spawn(store: Arc<dyn KeyValueStore>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_writer(store, rx));
        Self { tx }
    }

    pub(crate) fn write(&self, key: &str, value: String) {
        self.send(PersistCommand::Write {
            key: key.to_string(),
            value,
        });
    }

    pub(crate) fn remove(&self, key: &str) {
        self.send(PersistCommand::Remove {
            key: key.to_string(),
        });
    }

    /// Wait until everything sent so far is applied.
    ///
    /// Returns the first write failure since the previous flush, if any.
    pub(crate) async fn flush(&self) -> Result<(), StorageError> {
        let (reply, done) = oneshot::channel();
        if self.tx.send(PersistCommand::Flush(reply)).is_err() {
            return Err(writer_stopped());
        }
        done.await.unwrap_or_else(|_| Err(writer_stopped()))
    }

    fn send(&self, cmd: PersistCommand) {
        if self.tx.send(cmd).is_err() {
            tracing::error!("persistence writer stopped; snapshot not written");
        }
    }
}

impl std::fmt::Debug for PersistCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PersistCommand::Write { key, value } => f
                .debug_struct("Write")
                .field("key", key)
                .field("bytes", &value.len())
                .finish(),
            PersistCommand::Remove { key } => f.debug_struct("Remove").field("key", key).finish(),
            PersistCommand::Flush(_) => f.write_str("Flush"),
        }
    }
}

fn writer_stopped() -> StorageError {
    StorageError::Unavailable("persistence writer stopped".to_string())
}

async fn run_writer(
    store: Arc<dyn KeyValueStore>,
    mut rx: mpsc::UnboundedReceiver<PersistCommand>,
) {
    let mut first_error: Option<StorageError> = None;
    let mut batch = Vec::new();

    while let Some(cmd) = rx.recv().await {
        batch.push(cmd);
        while let Ok(cmd) = rx.try_recv() {
            batch.push(cmd);
        }

        let superseded = superseded_writes(&batch);
        let mut skipped = 0usize;
        for (cmd, skip) in batch.drain(..).zip(superseded) {
            if skip {
                skipped += 1;
                continue;
            }
            apply(store.as_ref(), cmd, &mut first_error).await;
        }
        if skipped > 0 {
            tracing::debug!(skipped, "coalesced superseded snapshot writes");
        }
    }

    tracing::debug!("persistence writer stopped");
}

/// Marks writes whose key is written or removed again before the next flush
/// in the batch.
fn superseded_writes(batch: &[PersistCommand]) -> Vec<bool> {
    let mut touched_later: HashSet<&str> = HashSet::new();
    let mut superseded = vec![false; batch.len()];
    for (index, cmd) in batch.iter().enumerate().rev() {
        match cmd {
            PersistCommand::Flush(_) => touched_later.clear(),
            PersistCommand::Write { key, .. } => {
                superseded[index] = !touched_later.insert(key.as_str());
            }
            PersistCommand::Remove { key } => {
                touched_later.insert(key.as_str());
            }
        }
    }
    superseded
}

async fn apply(
    store: &dyn KeyValueStore,
    cmd: PersistCommand,
    first_error: &mut Option<StorageError>,
) {
    match cmd {
        PersistCommand::Write { key, value } => {
            if let Err(err) = store.set(&key, &value).await {
                tracing::warn!(key = %key, error = %err, "failed to persist queue snapshot");
                first_error.get_or_insert(err);
            }
        }
        PersistCommand::Remove { key } => {
            if let Err(err) = store.remove(&key).await {
                tracing::warn!(key = %key, error = %err, "failed to remove queue snapshot");
                first_error.get_or_insert(err);
            }
        }
        PersistCommand::Flush(reply) => {
            let outcome = match first_error.take() {
                Some(err) => Err(err),
                None => Ok(()),
            };
            let _ = reply.send(outcome);
        }
    }
}
