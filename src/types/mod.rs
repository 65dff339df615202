//! Core types for the artifact kernel.

pub mod diagnostic;
pub mod fingerprint;
pub mod key;
pub mod record;
pub mod revision;
pub mod value;

pub use diagnostic::{no_diagnostics, Diagnostic, Diagnostics, Position, Range, Severity};
pub use fingerprint::Fingerprint;
pub use key::{ArtifactKey, NormalizedPath, RuleKind, Subject};
pub use record::{ArtifactRecord, ReadySnapshot, RecordStatus};
pub use revision::Revision;
pub use value::ArtifactValue;
