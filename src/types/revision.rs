//! Build generations.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Monotonically increasing generation counter.
///
/// Bumped whenever external inputs change. Records carry the revisions at
/// which they were computed, changed and last verified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Revision(u64);

impl Revision {
    /// The revision a fresh engine starts at.
    pub const INITIAL: Revision = Revision(0);

    /// Create a revision from a raw counter.
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Get the raw counter.
    pub fn get(&self) -> u64 {
        self.0
    }

    /// The following revision.
    pub fn next(&self) -> Revision {
        Revision(self.0 + 1)
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}
