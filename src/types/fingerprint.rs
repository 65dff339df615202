//! Artifact fingerprints for early cutoff.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::hash::Hasher;
use xxhash_rust::xxh64::Xxh64;

use crate::canonical::canonical_hash_hex;

/// Short digest of an artifact's semantic content.
///
/// Distinct from the value itself: two recomputations that produce equal
/// fingerprints are treated as the same output, and dependents are not
/// invalidated.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Create a fingerprint from a precomputed hash string.
    pub fn new(hash: impl Into<String>) -> Self {
        Self(hash.into())
    }

    /// Fingerprint a serializable value (xxh64 of its canonical JSON).
    ///
    /// Returns `None` when the value has no canonical form, in which case
    /// the artifact simply gets no cutoff.
    pub fn of<T: Serialize + ?Sized>(value: &T) -> Option<Self> {
        canonical_hash_hex(value).ok().map(Self)
    }

    /// Fingerprint opaque bytes, such as a serialized interface summary.
    ///
    /// Uses the first 128 bits of SHA-256.
    pub fn of_bytes(bytes: &[u8]) -> Self {
        let digest = Sha256::digest(bytes);
        Self(hex::encode(&digest[..16]))
    }

    /// Fold several fingerprints into one, order-sensitively.
    pub fn combine<'a, I>(parts: I) -> Self
    where
        I: IntoIterator<Item = &'a Fingerprint>,
    {
        let mut hasher = Xxh64::new(0);
        let mut count: u64 = 0;
        for part in parts {
            hasher.write(part.0.as_bytes());
            hasher.write(&[0xff]);
            count += 1;
        }
        hasher.write(&count.to_le_bytes());
        Self(format!("{:016x}", hasher.finish()))
    }

    /// Get the fingerprint as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
