//! Artifact records as held by the store.

use serde::Serialize;

use super::diagnostic::{no_diagnostics, Diagnostics};
use super::fingerprint::Fingerprint;
use super::key::ArtifactKey;
use super::revision::Revision;
use super::value::ArtifactValue;

/// Lifecycle state of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RecordStatus {
    /// Never computed, or evicted.
    Missing,
    /// A computation is in flight.
    Computing,
    /// The last computation produced a value.
    Ready,
    /// The last computation produced no value; see the record's diagnostics.
    Failed,
}

/// The last successful computation of a key.
///
/// Kept across later failures so stale reads can still serve it.
#[derive(Debug, Clone)]
pub struct ReadySnapshot {
    /// Computed value.
    pub value: ArtifactValue,
    /// Fingerprint supplied with the value, if any.
    pub fingerprint: Option<Fingerprint>,
    /// Diagnostics produced alongside the value.
    pub diagnostics: Diagnostics,
    /// Revision the value was computed at.
    pub computed_at: Revision,
}

/// Per-key cache entry.
#[derive(Debug, Clone)]
pub struct ArtifactRecord {
    /// Current status.
    pub status: RecordStatus,
    /// Diagnostics of the last computation.
    pub diagnostics: Diagnostics,
    /// Keys read during the last computation, in first-read order.
    pub dependencies: Vec<ArtifactKey>,
    /// Last value-producing computation.
    pub last_ready: Option<ReadySnapshot>,
    /// Revision of the last computation.
    pub computed_at: Option<Revision>,
    /// Revision at which the record last changed, as seen by dependents.
    pub changed_at: Revision,
    /// Revision at which the record was last known to be up to date.
    pub verified_at: Option<Revision>,
}

impl Default for ArtifactRecord {
    fn default() -> Self {
        Self {
            status: RecordStatus::Missing,
            diagnostics: no_diagnostics(),
            dependencies: Vec::new(),
            last_ready: None,
            computed_at: None,
            changed_at: Revision::INITIAL,
            verified_at: None,
        }
    }
}

impl ArtifactRecord {
    /// Current value, only while the record is `Ready`.
    pub fn value(&self) -> Option<&ArtifactValue> {
        match self.status {
            RecordStatus::Ready => self.last_ready.as_ref().map(|s| &s.value),
            _ => None,
        }
    }

    /// Fingerprint of the current value.
    pub fn fingerprint(&self) -> Option<&Fingerprint> {
        match self.status {
            RecordStatus::Ready => self.last_ready.as_ref().and_then(|s| s.fingerprint.as_ref()),
            _ => None,
        }
    }

    /// Whether the record has settled on a result.
    pub fn is_settled(&self) -> bool {
        matches!(self.status, RecordStatus::Ready | RecordStatus::Failed)
    }
}
