//! Error types shared across the kernel.
//!
//! Domain failures never cross the engine boundary as `Err`: they become
//! diagnostics on `Failed` records. The types here describe the two other
//! failure classes, caller bugs and misbehaving external collaborators.

use std::time::Duration;

use crate::types::{ArtifactKey, Diagnostic, Range, RuleKind, Subject};

/// A caller bug: a request the engine can never serve.
///
/// Raised with `panic!` by the engine after logging at `error` level.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContractViolation {
    /// No rule is registered for the kind.
    #[error("no rule registered for kind `{0}`")]
    UnknownRule(RuleKind),

    /// The subject does not have the shape the rule accepts.
    #[error("rule `{kind}` expects {expected} subjects, got `{subject}`")]
    SubjectShape {
        /// Requested kind.
        kind: RuleKind,
        /// Shape the rule accepts.
        expected: &'static str,
        /// Offending subject.
        subject: Subject,
    },
}

/// Failure of an external collaborator (locator, session provider, loader).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CollaboratorError {
    /// The invocation did not finish in time.
    #[error("{operation} timed out after {}ms", .after.as_millis())]
    Timeout {
        /// What was being invoked.
        operation: String,
        /// The bound that expired.
        after: Duration,
    },

    /// I/O failure reported by the collaborator.
    #[error("I/O error: {0}")]
    Io(String),

    /// Any other collaborator failure.
    #[error("{0}")]
    Failed(String),
}

impl CollaboratorError {
    /// Render as a failure diagnostic for `key`.
    pub fn into_diagnostic(self, key: &ArtifactKey) -> Diagnostic {
        let diagnostic = Diagnostic::error(key.kind.as_str(), self.to_string());
        match key.subject.path() {
            Some(path) => diagnostic.at(path, Range::default()),
            None => diagnostic,
        }
    }
}

impl From<std::io::Error> for CollaboratorError {
    fn from(err: std::io::Error) -> Self {
        CollaboratorError::Io(err.to_string())
    }
}
