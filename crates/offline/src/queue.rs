//! Bounded, deduplicating queue of wear events awaiting delivery.
//!
//! - At most one event per `(subject_id, occurred_on)`: a new `add` replaces
//!   the old event outright (fresh id, zero attempts, `pending`).
//! - At most `MAX_QUEUE_SIZE` events: the oldest by `created_at` are evicted.
//! - Every state change is written through to a `KeyValueStore` in the
//!   background; the in-memory queue stays authoritative for the process.
//! - `rehydrate` loads the last snapshot once at startup. Until then the queue
//!   reports `is_hydrated() == false` and does not write snapshots, so an
//!   early `add` cannot clobber data that has not been read yet. `clear` and
//!   `purge` are the exceptions: they delete the stored snapshot.
//!
//! The handle is cheap to clone; clones share one queue. Operations are
//! synchronous and atomic with respect to each other.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use wardrobe_core::{Clock, EntropySource, LocalId, OsEntropy, SystemClock};

use crate::config::{MAX_QUEUE_SIZE, QueueConfig};
use crate::error::QueueResult;
use crate::persistence::PersistenceHandle;
use crate::rehydrate::{self, ResetReason};
use crate::store::KeyValueStore;
use crate::types::{EventStatus, NewWearEvent, PendingEvent, QueueStats};

/// Offline pending wear-event queue.
#[derive(Clone)]
pub struct PendingEventQueue {
    inner: Arc<Inner>,
}

struct Inner {
    state: Mutex<QueueState>,
    config: QueueConfig,
    clock: Arc<dyn Clock>,
    store: Arc<dyn KeyValueStore>,
    persistence: PersistenceHandle,
}

struct QueueState {
    events: Vec<PendingEvent>,
    hydrated: bool,
    entropy: Box<dyn EntropySource>,
}

/// What `rehydrate` found in storage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HydrationReport {
    /// Valid events read from the snapshot.
    pub loaded: usize,
    /// Snapshot elements discarded as malformed.
    pub dropped: usize,
    /// Interrupted attempts reset from `syncing` to `pending`.
    pub recovered_syncing: usize,
    /// Events added before hydration and merged into the loaded set.
    pub merged: usize,
    /// Events removed by the post-load `prune_stale`.
    pub pruned: usize,
    /// Set when the whole snapshot was discarded.
    pub reset: Option<ResetReason>,
}

impl PendingEventQueue {
    /// Create an empty, not yet hydrated queue over `store`.
    ///
    /// Must be called from within a Tokio runtime: snapshot writes run on a
    /// background task.
    pub fn new(store: Arc<dyn KeyValueStore>, config: QueueConfig) -> Self {
        Self::with_clock(store, config, Arc::new(SystemClock))
    }

    pub fn with_clock(store: Arc<dyn KeyValueStore>, config: QueueConfig, clock: Arc<dyn Clock>) -> Self {
        let persistence = PersistenceHandle::spawn(store.clone());
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(QueueState {
                    events: Vec::new(),
                    hydrated: false,
                    entropy: Box::new(OsEntropy),
                }),
                config,
                clock,
                store,
                persistence,
            }),
        }
    }

    /// Replace the entropy source used to mint event ids.
    pub fn with_entropy(self, entropy: Box<dyn EntropySource>) -> Self {
        self.lock().entropy = entropy;
        self
    }

    pub fn config(&self) -> &QueueConfig {
        &self.inner.config
    }

    /// Load, validate and merge the persisted snapshot, then prune once.
    ///
    /// A storage read error is returned and the queue stays unhydrated.
    /// Calling this on an already hydrated queue does nothing.
    pub async fn rehydrate(&self) -> QueueResult<HydrationReport> {
        if self.is_hydrated() {
            tracing::warn!("rehydrate called on an already hydrated queue; ignoring");
            return Ok(HydrationReport::default());
        }

        // A purge or clear issued before hydration must land before the read.
        self.inner.persistence.flush().await?;

        let key = self.inner.config.storage_key.as_str();
        let raw = self.inner.store.get(key).await?;
        let snapshot = rehydrate::validate_snapshot(raw.as_deref());

        if let Some(reason) = snapshot.reset {
            tracing::warn!(?reason, "discarding unreadable pending-event snapshot");
        }

        let mut report = HydrationReport {
            loaded: snapshot.events.len(),
            dropped: snapshot.dropped,
            recovered_syncing: snapshot.recovered_syncing,
            reset: snapshot.reset,
            ..HydrationReport::default()
        };

        let mut state = self.lock();
        if state.hydrated {
            // Lost a race with a concurrent rehydrate.
            return Ok(HydrationReport::default());
        }

        let early = std::mem::take(&mut state.events);
        report.merged = early.len();
        state.events = merge(snapshot.events, early);
        evict_oldest(&mut state.events, None);

        state.hydrated = true;
        report.pruned = self.prune_locked(&mut state);
        self.persist(&state);

        tracing::info!(
            loaded = report.loaded,
            dropped = report.dropped,
            recovered_syncing = report.recovered_syncing,
            merged = report.merged,
            pruned = report.pruned,
            total = state.events.len(),
            "pending wear events hydrated"
        );

        Ok(report)
    }

    pub fn is_hydrated(&self) -> bool {
        self.lock().hydrated
    }

    /// Queue a wear event, replacing any event for the same outfit and date.
    ///
    /// Returns the new event's id. Afterwards exactly one event exists for the
    /// key and the queue holds at most `MAX_QUEUE_SIZE` events.
    pub fn add(&self, input: NewWearEvent) -> QueueResult<LocalId> {
        let mut state = self.lock();

        let local_id = loop {
            let candidate = LocalId::generate(state.entropy.as_mut())?;
            if !state.events.iter().any(|e| e.local_id == candidate) {
                break candidate;
            }
        };
        let event = PendingEvent::from_input(local_id, input, self.inner.clock.now());

        let before = state.events.len();
        state
            .events
            .retain(|e| !e.has_key(&event.subject_id, &event.occurred_on));
        let replaced = before - state.events.len();

        tracing::debug!(
            local_id = %local_id,
            subject_id = %event.subject_id,
            occurred_on = %event.occurred_on,
            source = event.source.as_str(),
            replaced,
            "queued wear event"
        );

        state.events.push(event);
        let evicted = evict_oldest(&mut state.events, Some(local_id));
        if evicted > 0 {
            tracing::warn!(evicted, max = MAX_QUEUE_SIZE, "pending queue full; evicted oldest events");
        }

        self.persist(&state);
        Ok(local_id)
    }

    /// Record the start of a delivery attempt. Allowed from any status.
    pub fn mark_syncing(&self, local_id: LocalId) -> bool {
        let now = self.inner.clock.now();
        self.update(local_id, |event| {
            event.status = EventStatus::Syncing;
            event.attempt_count = event.attempt_count.saturating_add(1);
            event.last_attempt_at = Some(now);
        })
    }

    /// Record a failed attempt. The attempt count is left as is.
    pub fn mark_failed(&self, local_id: LocalId, error: impl Into<String>) -> bool {
        let error = error.into();
        self.update(local_id, move |event| {
            event.status = EventStatus::Failed;
            event.last_error = Some(error);
        })
    }

    /// Drop an event, typically after confirmed delivery.
    pub fn remove(&self, local_id: LocalId) -> bool {
        let mut state = self.lock();
        let before = state.events.len();
        state.events.retain(|e| e.local_id != local_id);
        let removed = state.events.len() != before;
        if removed {
            tracing::debug!(local_id = %local_id, "removed wear event");
            self.persist(&state);
        }
        removed
    }

    /// Drop every event for `(subject_id, occurred_on)`. Returns how many.
    pub fn remove_for_subject_and_date(&self, subject_id: &str, occurred_on: &str) -> usize {
        let mut state = self.lock();
        let before = state.events.len();
        state.events.retain(|e| !e.has_key(subject_id, occurred_on));
        let removed = before - state.events.len();
        if removed > 0 {
            tracing::debug!(subject_id, occurred_on, removed, "removed wear events for key");
            self.persist(&state);
        }
        removed
    }

    /// Events eligible for a delivery attempt: `pending`, or `failed` with
    /// attempts left.
    pub fn get_retryable(&self) -> Vec<PendingEvent> {
        let max = self.inner.config.max_sync_attempts;
        self.lock()
            .events
            .iter()
            .filter(|e| e.is_retryable(max))
            .cloned()
            .collect()
    }

    pub fn get_for_subject(&self, subject_id: &str) -> Vec<PendingEvent> {
        self.lock()
            .events
            .iter()
            .filter(|e| e.subject_id == subject_id)
            .cloned()
            .collect()
    }

    pub fn has_for_subject(&self, subject_id: &str) -> bool {
        self.lock().events.iter().any(|e| e.subject_id == subject_id)
    }

    pub fn get(&self, local_id: LocalId) -> Option<PendingEvent> {
        self.lock()
            .events
            .iter()
            .find(|e| e.local_id == local_id)
            .cloned()
    }

    /// Copy of every queued event.
    pub fn events(&self) -> Vec<PendingEvent> {
        self.lock().events.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().events.is_empty()
    }

    pub fn stats(&self) -> QueueStats {
        let max = self.inner.config.max_sync_attempts;
        let state = self.lock();
        let mut stats = QueueStats {
            total: state.events.len(),
            ..QueueStats::default()
        };
        for event in &state.events {
            match event.status {
                EventStatus::Pending => stats.pending += 1,
                EventStatus::Syncing => stats.syncing += 1,
                EventStatus::Failed => stats.failed += 1,
            }
            if event.is_exhausted(max) {
                stats.exhausted += 1;
            }
        }
        stats
    }

    /// Drop events older than `stale_event_age` and failed events with no
    /// attempts left. Returns how many were removed.
    pub fn prune_stale(&self) -> usize {
        let mut state = self.lock();
        let pruned = self.prune_locked(&mut state);
        if pruned > 0 {
            self.persist(&state);
        }
        pruned
    }

    /// Empty the queue (logout).
    ///
    /// Before hydration the stored snapshot is deleted instead, so a later
    /// `rehydrate` cannot bring the cleared events back.
    pub fn clear(&self) {
        let mut state = self.lock();
        let cleared = state.events.len();
        state.events.clear();
        tracing::info!(cleared, hydrated = state.hydrated, "pending wear events cleared");
        if state.hydrated {
            self.persist(&state);
        } else {
            self.inner.persistence.remove(&self.inner.config.storage_key);
        }
    }

    /// Return an interrupted attempt to `pending`, as a restart would.
    ///
    /// Only applies to `syncing` events. The attempt count is kept, but a
    /// `pending` event is never exhausted, so it stays queued.
    pub fn release(&self, local_id: LocalId) -> bool {
        let mut state = self.lock();
        let Some(event) = state
            .events
            .iter_mut()
            .find(|e| e.local_id == local_id && e.status == EventStatus::Syncing)
        else {
            return false;
        };
        event.status = EventStatus::Pending;
        tracing::debug!(local_id = %local_id, "released wear event back to pending");
        self.persist(&state);
        true
    }

    /// Empty the queue and delete the persisted snapshot entirely.
    pub fn purge(&self) {
        let mut state = self.lock();
        state.events.clear();
        self.inner.persistence.remove(&self.inner.config.storage_key);
        tracing::info!("pending wear events purged");
    }

    /// Wait for every snapshot write issued so far.
    ///
    /// Returns the first storage failure since the previous flush.
    pub async fn flush(&self) -> QueueResult<()> {
        self.inner.persistence.flush().await?;
        Ok(())
    }

    fn update<F>(&self, local_id: LocalId, apply: F) -> bool
    where
        F: FnOnce(&mut PendingEvent),
    {
        let mut state = self.lock();
        let Some(event) = state.events.iter_mut().find(|e| e.local_id == local_id) else {
            tracing::debug!(local_id = %local_id, "no queued event with this id; ignoring");
            return false;
        };
        apply(event);
        tracing::debug!(
            local_id = %local_id,
            status = event.status.as_str(),
            attempt_count = event.attempt_count,
            "wear event updated"
        );
        self.persist(&state);
        true
    }

    fn prune_locked(&self, state: &mut QueueState) -> usize {
        let now = self.inner.clock.now();
        let max_age = self.inner.config.stale_event_age;
        let max_attempts = self.inner.config.max_sync_attempts;

        let before = state.events.len();
        state.events.retain(|e| {
            let stale = (now - e.created_at)
                .to_std()
                .map(|age| age > max_age)
                .unwrap_or(false);
            !stale && !e.is_exhausted(max_attempts)
        });
        let pruned = before - state.events.len();
        if pruned > 0 {
            tracing::info!(pruned, remaining = state.events.len(), "pruned stale wear events");
        }
        pruned
    }

    fn persist(&self, state: &QueueState) {
        if !state.hydrated {
            return;
        }
        match rehydrate::encode_snapshot(&state.events) {
            Ok(json) => self
                .inner
                .persistence
                .write(&self.inner.config.storage_key, json),
            Err(err) => tracing::error!(error = %err, "failed to serialize pending-event snapshot"),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for PendingEventQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("PendingEventQueue")
            .field("events", &state.events.len())
            .field("hydrated", &state.hydrated)
            .field("storage_key", &self.inner.config.storage_key)
            .finish()
    }
}

/// Combine loaded events with events added before hydration.
///
/// Loaded events keep the last occurrence per dedup key; events added in this
/// process win over loaded ones for the same key or id.
fn merge(loaded: Vec<PendingEvent>, early: Vec<PendingEvent>) -> Vec<PendingEvent> {
    let mut merged: Vec<PendingEvent> = Vec::with_capacity(loaded.len() + early.len());
    for event in loaded.into_iter().chain(early) {
        merged.retain(|e| {
            e.local_id != event.local_id && !e.has_key(&event.subject_id, &event.occurred_on)
        });
        merged.push(event);
    }
    merged
}

/// Trim to `MAX_QUEUE_SIZE` by dropping the oldest `created_at` first.
/// `keep` is never evicted. Returns the number evicted.
fn evict_oldest(events: &mut Vec<PendingEvent>, keep: Option<LocalId>) -> usize {
    if events.len() <= MAX_QUEUE_SIZE {
        return 0;
    }
    let excess = events.len() - MAX_QUEUE_SIZE;

    let mut candidates: Vec<(usize, chrono::DateTime<chrono::Utc>)> = events
        .iter()
        .enumerate()
        .filter(|(_, e)| Some(e.local_id) != keep)
        .map(|(i, e)| (i, e.created_at))
        .collect();
    candidates.sort_by_key(|&(i, created_at)| (created_at, i));

    let mut doomed: Vec<usize> = candidates.iter().take(excess).map(|&(i, _)| i).collect();
    doomed.sort_unstable();

    let mut index = 0;
    events.retain(|_| {
        let drop = doomed.binary_search(&index).is_ok();
        index += 1;
        !drop
    });
    excess
}
