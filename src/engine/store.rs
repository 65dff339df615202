//! Shared artifact store.
//!
//! One map from key to slot, guarded by a single mutex held only for short
//! synchronous sections. A slot is the settled record plus the bookkeeping
//! for an in-flight computation of that key.

use std::collections::{BTreeMap, BTreeSet};

use tokio::sync::watch;

use crate::error::ContractViolation;
use crate::types::{ArtifactKey, ArtifactRecord, RecordStatus, Revision};

use super::EngineStats;

/// A running computation of one key.
#[derive(Debug)]
pub(crate) struct InFlight {
    /// Revision the current attempt started at.
    pub started_at: Revision,
    /// Flips to `true` once the computation settles or is abandoned.
    pub done: watch::Receiver<bool>,
    /// Keys this computation is currently waiting on, with multiplicity.
    pub awaiting: BTreeMap<ArtifactKey, usize>,
}

/// Store entry for one key.
#[derive(Debug, Default)]
pub(crate) struct Slot {
    pub record: ArtifactRecord,
    pub in_flight: Option<InFlight>,
    /// Last revision at which an `Input` record was marked dirty or evicted.
    pub invalidated_at: Option<Revision>,
    /// Last revision at which the key's subject was edited, for any rule.
    pub edited_at: Option<Revision>,
    /// Contract violation raised by the last computation of this key.
    pub violation: Option<ContractViolation>,
}

impl Slot {
    /// Whether the record was marked dirty after `revision`.
    pub fn invalidated_since(&self, revision: Revision) -> bool {
        self.invalidated_at.map_or(false, |at| at > revision)
    }

    /// Whether a result computed at `revision` must be thrown away.
    pub fn edited_since(&self, revision: Revision) -> bool {
        self.invalidated_since(revision) || self.edited_at.map_or(false, |at| at > revision)
    }

    /// The record as seen from outside, with `Computing` while in flight.
    pub fn snapshot(&self) -> ArtifactRecord {
        let mut record = self.record.clone();
        if self.in_flight.is_some() {
            record.status = RecordStatus::Computing;
        }
        record
    }
}

#[derive(Debug, Default)]
pub(crate) struct StoreInner {
    pub revision: Revision,
    pub slots: BTreeMap<ArtifactKey, Slot>,
    pub closed: bool,
    pub stats: EngineStats,
}

impl StoreInner {
    /// Whether `requester` waiting on `target` would close a wait cycle.
    ///
    /// Follows the `awaiting` edges of in-flight computations from `target`
    /// and reports whether `requester` is reachable.
    pub fn would_deadlock(&self, requester: &ArtifactKey, target: &ArtifactKey) -> bool {
        if requester == target {
            return true;
        }

        let mut seen: BTreeSet<&ArtifactKey> = BTreeSet::new();
        let mut stack = vec![target];
        while let Some(key) = stack.pop() {
            if !seen.insert(key) {
                continue;
            }
            let Some(flight) = self.slots.get(key).and_then(|s| s.in_flight.as_ref()) else {
                continue;
            };
            for awaited in flight.awaiting.keys() {
                if awaited == requester {
                    return true;
                }
                stack.push(awaited);
            }
        }
        false
    }

    /// Record that `requester` waits on `target`.
    pub fn add_await(&mut self, requester: &ArtifactKey, target: &ArtifactKey) {
        if let Some(flight) = self.slots.get_mut(requester).and_then(|s| s.in_flight.as_mut()) {
            *flight.awaiting.entry(target.clone()).or_insert(0) += 1;
        }
    }

    /// Undo one [`add_await`](Self::add_await).
    pub fn remove_await(&mut self, requester: &ArtifactKey, target: &ArtifactKey) {
        if let Some(flight) = self.slots.get_mut(requester).and_then(|s| s.in_flight.as_mut()) {
            if let Some(count) = flight.awaiting.get_mut(target) {
                *count -= 1;
                if *count == 0 {
                    flight.awaiting.remove(target);
                }
            }
        }
    }
}
