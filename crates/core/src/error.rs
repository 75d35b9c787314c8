//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic domain failures (malformed identifiers,
/// missing entropy). Infrastructure concerns belong elsewhere.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// An identifier was invalid (e.g. parse failure, wrong UUID version).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// No usable randomness was available to mint an identifier.
    #[error("entropy unavailable: {0}")]
    Entropy(String),
}

impl DomainError {
    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn entropy(msg: impl Into<String>) -> Self {
        Self::Entropy(msg.into())
    }
}
