//! Session handles as always-dirty artifacts.
//!
//! The session (compiler flags, environment) for a file comes from an
//! external provider the engine cannot fingerprint itself, so the rule is
//! re-run once per revision. A provider-supplied fingerprint still lets
//! dependents cut off when the session did not actually change.

use std::sync::Arc;

use async_trait::async_trait;

use crate::engine::RuleContext;
use crate::error::CollaboratorError;
use crate::types::{ArtifactKey, Fingerprint, NormalizedPath, RuleKind, Subject};

use super::{Priority, Rule, RuleDefinition, RuleOutput, SubjectShape, Volatility};

/// Kind of the per-file session artifact.
pub const SESSION: RuleKind = RuleKind::new("session");

/// Source of session handles.
#[async_trait]
pub trait SessionProvider: Send + Sync + 'static {
    /// Session handle type stored as the artifact value.
    type Session: Send + Sync + 'static;

    /// Load the session for `path`.
    async fn session_for(&self, path: &NormalizedPath) -> Result<Self::Session, CollaboratorError>;

    /// Digest of a session, if the provider can compute one.
    fn fingerprint(&self, _session: &Self::Session) -> Option<Fingerprint> {
        None
    }
}

struct SessionRule<P> {
    provider: Arc<P>,
}

#[async_trait]
impl<P: SessionProvider> Rule for SessionRule<P> {
    async fn compute(&self, subject: &Subject, ctx: &RuleContext) -> RuleOutput {
        let key = ArtifactKey::new(SESSION, subject.clone());
        let Some(path) = subject.path() else {
            return RuleOutput::failed(Vec::new());
        };

        let loaded = ctx
            .with_default_timeout("session load", self.provider.session_for(path))
            .await
            .and_then(|result| result);

        match loaded {
            Ok(session) => {
                let fingerprint = self.provider.fingerprint(&session);
                RuleOutput::ready(session).with_fingerprint(fingerprint)
            }
            Err(err) => RuleOutput::failed(vec![err.into_diagnostic(&key)]),
        }
    }
}

/// Rule definition for [`SESSION`] backed by `provider`.
pub fn session_rule<P: SessionProvider>(provider: Arc<P>) -> RuleDefinition {
    RuleDefinition::new(SESSION, SessionRule { provider })
        .priority(Priority::HIGH)
        .volatility(Volatility::AlwaysDirty)
        .shape(SubjectShape::File)
}
