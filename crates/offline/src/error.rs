//! Offline queue error types.

use thiserror::Error;
use wardrobe_core::DomainError;

use crate::store::StorageError;

/// Queue error type.
///
/// Expected conditions (unknown id, overflow, malformed snapshot entries) are
/// not errors; only storage I/O and identifier minting can fail.
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("could not mint event id: {0}")]
    Id(#[from] DomainError),
}

/// Result type alias using QueueError.
pub type QueueResult<T> = Result<T, QueueError>;
