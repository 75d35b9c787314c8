//! Client-generated identifiers.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::{Builder, Uuid, Variant, Version};

use crate::entropy::EntropySource;
use crate::error::{DomainError, DomainResult};

/// Identifier assigned on-device to a queued record.
///
/// Always minted as a random version-4 UUID
/// (`xxxxxxxx-xxxx-4xxx-yxxx-xxxxxxxxxxxx`, `y` in `8..=b`). Persisted ids are
/// accepted as any well-formed UUID so older snapshots stay readable.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocalId(Uuid);

impl LocalId {
    /// Mint a fresh identifier from `entropy`.
    ///
    /// Pure apart from consuming 16 bytes of entropy; no state is kept.
    pub fn generate(entropy: &mut dyn EntropySource) -> DomainResult<Self> {
        let mut bytes = [0u8; 16];
        entropy.fill(&mut bytes)?;
        Ok(Self(Builder::from_random_bytes(bytes).into_uuid()))
    }

    /// True when the id carries the version-4 and RFC 4122 variant bits.
    pub fn is_random_v4(&self) -> bool {
        self.0.get_version() == Some(Version::Random) && self.0.get_variant() == Variant::RFC4122
    }
}

impl core::fmt::Display for LocalId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0.hyphenated(), f)
    }
}

impl From<Uuid> for LocalId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl From<LocalId> for Uuid {
    fn from(value: LocalId) -> Self {
        value.0
    }
}

impl FromStr for LocalId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let uuid = Uuid::from_str(s)
            .map_err(|e| DomainError::invalid_id(format!("LocalId: {}", e)))?;
        Ok(Self(uuid))
    }
}
