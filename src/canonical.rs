//! Canonical serialization for deterministic fingerprints.
//!
//! Artifact fingerprints and configuration hashes are computed from a
//! canonical byte form so that the same logical value always produces the
//! same digest, across runs and across processes.
//!
//! ## Determinism Guarantees
//!
//! - Stable field order: Struct fields serialize in declaration order
//! - Stable Vec order: Vectors serialize in index order
//! - No HashMap allowed: Use BTreeMap for maps in hashed data

use serde::Serialize;
use xxhash_rust::xxh64::xxh64;

/// Serialize a value to canonical JSON bytes for hashing.
///
/// Fails only for values serde_json cannot represent, such as maps keyed
/// by compound types.
pub fn to_canonical_bytes<T: Serialize + ?Sized>(value: &T) -> serde_json::Result<Vec<u8>> {
    serde_json::to_vec(value)
}

/// Compute canonical hash of a serializable value.
pub fn canonical_hash<T: Serialize + ?Sized>(value: &T) -> serde_json::Result<u64> {
    let bytes = to_canonical_bytes(value)?;
    Ok(xxh64(&bytes, 0))
}

/// Compute canonical hash and return as hex string.
pub fn canonical_hash_hex<T: Serialize + ?Sized>(value: &T) -> serde_json::Result<String> {
    Ok(format!("{:016x}", canonical_hash(value)?))
}
