//! Domain primitives shared by the wardrobe crates.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! identifiers, the entropy sources used to mint them, and a clock abstraction
//! so time-dependent rules can be tested deterministically.

pub mod clock;
pub mod entropy;
pub mod error;
pub mod id;

pub use clock::{Clock, ManualClock, SystemClock};
pub use entropy::{EntropySource, OsEntropy};
#[cfg(feature = "weak-entropy-fallback")]
pub use entropy::FallbackEntropy;
pub use error::{DomainError, DomainResult};
pub use id::LocalId;
