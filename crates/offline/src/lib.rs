//! Offline pending wear-event queue.
//!
//! Wear events recorded while the device is offline (or while delivery is
//! failing) are held in a bounded, deduplicated queue that survives restarts:
//! - `PendingEventQueue`: the queue itself (add/replace, status transitions,
//!   retry selection, pruning, eviction)
//! - `store`: durable key-value backends (`InMemoryStore`, `SqliteStore`)
//! - `rehydrate`: snapshot layout and startup validation
//! - `SyncWorker`: reference background loop that drains the queue through an
//!   `EventSender`

pub mod config;
pub mod error;
mod persistence;
pub mod queue;
pub mod rehydrate;
pub mod store;
pub mod sync_worker;
pub mod types;

pub use config::{AppConfig, ConfigError, QueueConfig, SyncWorkerConfig, MAX_QUEUE_SIZE, MAX_SYNC_ATTEMPTS};
pub use error::{QueueError, QueueResult};
pub use queue::{HydrationReport, PendingEventQueue};
pub use store::{InMemoryStore, KeyValueStore, SqliteStore, StorageError};
pub use sync_worker::{CycleReport, DeliveryError, EventSender, LoggingSender, SyncWorker};
pub use types::{EventSource, EventStatus, NewWearEvent, PendingEvent, QueueStats};
pub use wardrobe_core::LocalId;
