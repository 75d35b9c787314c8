//! Random byte sources used to mint client-side identifiers.
//!
//! The operating system CSPRNG is always tried first. The clock-seeded
//! fallback exists for environments where the OS source is unavailable and is
//! compiled only with the `weak-entropy-fallback` feature.

use rand::RngCore;
use rand::rngs::OsRng;

use crate::error::DomainResult;

/// A source of random bytes.
pub trait EntropySource: Send {
    /// Fill `buf` entirely with random bytes.
    fn fill(&mut self, buf: &mut [u8]) -> DomainResult<()>;
}

/// Operating-system CSPRNG, with the weak fallback applied on failure when the
/// `weak-entropy-fallback` feature is enabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsEntropy;

impl EntropySource for OsEntropy {
    fn fill(&mut self, buf: &mut [u8]) -> DomainResult<()> {
        match OsRng.try_fill_bytes(buf) {
            Ok(()) => Ok(()),
            Err(err) => fill_after_os_failure(buf, err),
        }
    }
}

#[cfg(feature = "weak-entropy-fallback")]
fn fill_after_os_failure(buf: &mut [u8], err: rand::Error) -> DomainResult<()> {
    tracing::warn!(error = %err, "OS entropy unavailable; using clock-seeded fallback");
    FallbackEntropy::new().fill(buf)
}

#[cfg(not(feature = "weak-entropy-fallback"))]
fn fill_after_os_failure(_buf: &mut [u8], err: rand::Error) -> DomainResult<()> {
    Err(crate::error::DomainError::entropy(err.to_string()))
}

#[cfg(feature = "weak-entropy-fallback")]
pub use fallback::FallbackEntropy;

#[cfg(feature = "weak-entropy-fallback")]
mod fallback {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::{SystemTime, UNIX_EPOCH};

    use rand::rngs::SmallRng;
    use rand::{RngCore, SeedableRng};

    use super::EntropySource;
    use crate::error::DomainResult;

    static INSTANCE_COUNTER: AtomicU64 = AtomicU64::new(0);

    /// Non-cryptographic PRNG seeded from the wall clock and a process-local
    /// counter. Uniqueness is best-effort only.
    #[derive(Debug, Clone)]
    pub struct FallbackEntropy {
        rng: SmallRng,
    }

    impl FallbackEntropy {
        pub fn new() -> Self {
            let nanos = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_nanos() as u64)
                .unwrap_or_default();
            let counter = INSTANCE_COUNTER.fetch_add(1, Ordering::Relaxed);
            Self::from_seed(nanos ^ counter.wrapping_mul(0x9E37_79B9_7F4A_7C15))
        }

        /// Deterministic stream, for tests and reproducible fixtures.
        pub fn from_seed(seed: u64) -> Self {
            Self {
                rng: SmallRng::seed_from_u64(seed),
            }
        }
    }

    impl Default for FallbackEntropy {
        fn default() -> Self {
            Self::new()
        }
    }

    impl EntropySource for FallbackEntropy {
        fn fill(&mut self, buf: &mut [u8]) -> DomainResult<()> {
            self.rng.fill_bytes(buf);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn os_entropy_fills_whole_buffer() {
        let mut a = [0u8; 32];
        let mut b = [0u8; 32];
        OsEntropy.fill(&mut a).unwrap();
        OsEntropy.fill(&mut b).unwrap();
        assert_ne!(a, b);
    }

    #[cfg(feature = "weak-entropy-fallback")]
    #[test]
    fn fallback_from_seed_is_reproducible() {
        let mut a = [0u8; 16];
        let mut b = [0u8; 16];
        FallbackEntropy::from_seed(7).fill(&mut a).unwrap();
        FallbackEntropy::from_seed(7).fill(&mut b).unwrap();
        assert_eq!(a, b);
    }

    #[cfg(feature = "weak-entropy-fallback")]
    #[test]
    fn fresh_fallback_instances_diverge() {
        let mut a = [0u8; 16];
        let mut b = [0u8; 16];
        FallbackEntropy::new().fill(&mut a).unwrap();
        FallbackEntropy::new().fill(&mut b).unwrap();
        assert_ne!(a, b);
    }
}
