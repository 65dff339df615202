//! Rule registry.
//!
//! A rule computes the artifact for one [`RuleKind`] given a subject and a
//! [`RuleContext`] through which it requests the artifacts it depends on.
//! Kinds are registered once at startup; the engine is generic over them.

pub mod session;

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::engine::RuleContext;
use crate::types::{ArtifactValue, Diagnostic, Fingerprint, RuleKind, Subject};

pub use session::{session_rule, SessionProvider, SESSION};

/// Scheduling priority. Higher runs first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Priority(pub u8);

impl Priority {
    /// Background work (workspace-wide passes).
    pub const LOW: Priority = Priority(20);
    /// Ordinary rules.
    pub const DEFAULT: Priority = Priority(50);
    /// Latency-sensitive rules on the interactive path.
    pub const HIGH: Priority = Priority(80);
}

impl Default for Priority {
    fn default() -> Self {
        Priority::DEFAULT
    }
}

/// How a rule's records become dirty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Volatility {
    /// Dirty only when a recorded dependency changed.
    #[default]
    Derived,
    /// Reads external state for its subject; dirtied by `invalidate`.
    Input,
    /// Recomputed once per revision.
    AlwaysDirty,
}

/// Which subjects a rule accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectShape {
    /// Only `Subject::File`.
    #[default]
    File,
    /// Only `Subject::NoFile`.
    NoFile,
    /// Either.
    Any,
}

impl SubjectShape {
    /// Whether `subject` has this shape.
    pub fn accepts(&self, subject: &Subject) -> bool {
        match self {
            SubjectShape::File => subject.is_file(),
            SubjectShape::NoFile => !subject.is_file(),
            SubjectShape::Any => true,
        }
    }

    /// Short description for error messages.
    pub fn describe(&self) -> &'static str {
        match self {
            SubjectShape::File => "per-file",
            SubjectShape::NoFile => "whole-session",
            SubjectShape::Any => "any",
        }
    }
}

/// Result of one rule computation.
#[derive(Debug, Clone, Default)]
pub struct RuleOutput {
    /// Digest used for early cutoff. `None` means always changed.
    pub fingerprint: Option<Fingerprint>,
    /// Diagnostics produced by the computation.
    pub diagnostics: Vec<Diagnostic>,
    /// The value; `None` marks the computation as failed.
    pub value: Option<ArtifactValue>,
}

impl RuleOutput {
    /// A successful output without a fingerprint.
    pub fn ready<T: std::any::Any + Send + Sync>(value: T) -> Self {
        Self {
            fingerprint: None,
            diagnostics: Vec::new(),
            value: Some(ArtifactValue::new(value)),
        }
    }

    /// A successful output fingerprinted by its canonical serialization.
    pub fn fingerprinted<T>(value: T) -> Self
    where
        T: Serialize + std::any::Any + Send + Sync,
    {
        let fingerprint = Fingerprint::of(&value);
        Self::ready(value).with_fingerprint(fingerprint)
    }

    /// A failed output.
    pub fn failed(diagnostics: Vec<Diagnostic>) -> Self {
        Self {
            fingerprint: None,
            diagnostics,
            value: None,
        }
    }

    /// Set the fingerprint.
    pub fn with_fingerprint(mut self, fingerprint: impl Into<Option<Fingerprint>>) -> Self {
        self.fingerprint = fingerprint.into();
        self
    }

    /// Append diagnostics.
    pub fn with_diagnostics(mut self, diagnostics: impl IntoIterator<Item = Diagnostic>) -> Self {
        self.diagnostics.extend(diagnostics);
        self
    }

    /// Whether the output carries a value.
    pub fn is_ready(&self) -> bool {
        self.value.is_some()
    }
}

/// A compute function for one rule kind.
#[async_trait]
pub trait Rule: Send + Sync + 'static {
    /// Compute the artifact for `subject`.
    ///
    /// Sub-artifacts requested through `ctx` become the dependency edges of
    /// the resulting record.
    async fn compute(&self, subject: &Subject, ctx: &RuleContext) -> RuleOutput;
}

/// Rule backed by an async closure. Build with [`rule_fn`].
pub struct FnRule<F>(F);

#[async_trait]
impl<F, Fut> Rule for FnRule<F>
where
    F: Fn(Subject, RuleContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = RuleOutput> + Send + 'static,
{
    async fn compute(&self, subject: &Subject, ctx: &RuleContext) -> RuleOutput {
        (self.0)(subject.clone(), ctx.clone()).await
    }
}

/// Wrap an async closure as a [`Rule`].
pub fn rule_fn<F, Fut>(f: F) -> FnRule<F>
where
    F: Fn(Subject, RuleContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = RuleOutput> + Send + 'static,
{
    FnRule(f)
}

/// A registered rule and its static metadata.
#[derive(Clone)]
pub struct RuleDefinition {
    /// Kind the rule computes.
    pub kind: RuleKind,
    /// Scheduling priority.
    pub priority: Priority,
    /// Dirtiness behaviour.
    pub volatility: Volatility,
    /// Accepted subjects.
    pub shape: SubjectShape,
    /// The compute function.
    pub rule: Arc<dyn Rule>,
}

impl RuleDefinition {
    /// A derived, per-file rule at default priority.
    pub fn new(kind: RuleKind, rule: impl Rule) -> Self {
        Self {
            kind,
            priority: Priority::DEFAULT,
            volatility: Volatility::Derived,
            shape: SubjectShape::File,
            rule: Arc::new(rule),
        }
    }

    /// Set the priority.
    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Set the volatility.
    pub fn volatility(mut self, volatility: Volatility) -> Self {
        self.volatility = volatility;
        self
    }

    /// Set the accepted subject shape.
    pub fn shape(mut self, shape: SubjectShape) -> Self {
        self.shape = shape;
        self
    }
}

impl std::fmt::Debug for RuleDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleDefinition")
            .field("kind", &self.kind)
            .field("priority", &self.priority)
            .field("volatility", &self.volatility)
            .field("shape", &self.shape)
            .finish_non_exhaustive()
    }
}

/// Registry errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// A rule for the kind is already registered.
    #[error("rule `{0}` is already registered")]
    DuplicateRule(RuleKind),
}

/// Mapping from rule kind to its definition.
///
/// Uses a BTreeMap for deterministic iteration and fingerprinting.
#[derive(Debug, Clone, Default)]
pub struct RuleRegistry {
    rules: BTreeMap<RuleKind, RuleDefinition>,
}

impl RuleRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a rule. Each kind may be registered once.
    pub fn register(&mut self, definition: RuleDefinition) -> Result<(), RegistryError> {
        if self.rules.contains_key(&definition.kind) {
            return Err(RegistryError::DuplicateRule(definition.kind));
        }
        self.rules.insert(definition.kind, definition);
        Ok(())
    }

    /// Look up a rule.
    pub fn get(&self, kind: RuleKind) -> Option<&RuleDefinition> {
        self.rules.get(&kind)
    }

    /// Static priority of a kind.
    pub fn priority_hint(&self, kind: RuleKind) -> Option<Priority> {
        self.rules.get(&kind).map(|d| d.priority)
    }

    /// Registered kinds in order.
    pub fn kinds(&self) -> impl Iterator<Item = RuleKind> + '_ {
        self.rules.keys().copied()
    }

    /// Number of registered rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether no rules are registered.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Fingerprint of the registered kinds and their metadata.
    pub fn fingerprint(&self) -> Fingerprint {
        let entries: Vec<_> = self
            .rules
            .values()
            .map(|d| (d.kind, d.priority, d.volatility, d.shape))
            .collect();
        Fingerprint::of(&entries).unwrap_or_else(|| Fingerprint::new(""))
    }
}
