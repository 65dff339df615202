//! Query front-end for interactive callers.
//!
//! Thin typed layer over [`Engine`] requests. Chains of lookups stop at the
//! first failed sub-request and yield `None` rather than a partial answer.

pub mod position;

use std::any::Any;
use std::sync::Arc;

use tracing::debug;

use crate::engine::{Engine, Freshness, Response};
use crate::graph::{TransitiveDependencies, TRANSITIVE_DEPENDENCIES};
use crate::types::{ArtifactKey, NormalizedPath, Position, Range, Revision, RuleKind};

pub use position::{PositionMapping, TextChange};

/// Source of edits made to open files.
pub trait TextBuffers: Send + Sync + 'static {
    /// Edits to `path` since the text version the engine saw at `revision`,
    /// oldest first. `None` when the history is not available.
    fn changes_since(&self, path: &NormalizedPath, revision: Revision) -> Option<Vec<TextChange>>;
}

/// Buffers that never change: every mapping is the identity.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoBuffers;

impl TextBuffers for NoBuffers {
    fn changes_since(&self, _path: &NormalizedPath, _revision: Revision) -> Option<Vec<TextChange>> {
        Some(Vec::new())
    }
}

/// A stale value with the mapping from its text version to the current one.
#[derive(Debug, Clone)]
pub struct StaleResult<T> {
    /// The value.
    pub value: Arc<T>,
    /// Edits since the value was computed.
    pub mapping: PositionMapping,
    /// Whether the value is current.
    pub freshness: Freshness,
}

/// Typed queries over an [`Engine`].
#[derive(Clone)]
pub struct QueryFrontEnd {
    engine: Engine,
    buffers: Arc<dyn TextBuffers>,
}

impl QueryFrontEnd {
    /// Front-end over `engine` with edits supplied by `buffers`.
    pub fn new(engine: Engine, buffers: Arc<dyn TextBuffers>) -> Self {
        Self { engine, buffers }
    }

    /// Front-end without an edit history.
    pub fn without_buffers(engine: Engine) -> Self {
        Self::new(engine, Arc::new(NoBuffers))
    }

    /// The underlying engine.
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Current value of `kind` for `path`, waiting if needed.
    pub async fn fresh<T: Any + Send + Sync>(
        &self,
        kind: RuleKind,
        path: impl Into<NormalizedPath>,
    ) -> Option<Arc<T>> {
        self.engine
            .fresh(ArtifactKey::file(kind, path))
            .await
            .value_as::<T>()
    }

    /// Last computed value of `kind` for `path` and its position mapping.
    ///
    /// `None` if nothing was computed yet or the edit history since is
    /// unavailable.
    pub fn stale<T: Any + Send + Sync>(
        &self,
        kind: RuleKind,
        path: impl Into<NormalizedPath>,
    ) -> Option<StaleResult<T>> {
        let path = path.into();
        let response = self.engine.stale(&ArtifactKey::file(kind, &path));
        self.with_mapping(&path, response)
    }

    /// Transitive dependencies of `path`, dependencies first.
    pub async fn dependencies_of(&self, path: impl Into<NormalizedPath>) -> Option<Vec<NormalizedPath>> {
        self.fresh::<TransitiveDependencies>(TRANSITIVE_DEPENDENCIES, path)
            .await
            .map(|deps| deps.modules.clone())
    }

    /// Fresh values for every key, or `None` at the first failure.
    ///
    /// Keys are requested in order; later keys are not requested once one
    /// fails.
    pub async fn fresh_all<T: Any + Send + Sync>(&self, keys: &[ArtifactKey]) -> Option<Vec<Arc<T>>> {
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            let value = self.engine.fresh(key.clone()).await.value_as::<T>();
            match value {
                Some(value) => values.push(value),
                None => {
                    debug!(key = %key, "query chain stopped at failed request");
                    return None;
                }
            }
        }
        Some(values)
    }

    /// Evaluate `lookup` at a current-text position.
    ///
    /// Uses the last computed value of `kind` for `path`, falling back to a
    /// fresh request when none exists. The position is mapped back into the
    /// value's text version and the range `lookup` returns is mapped
    /// forward again. Positions that fall inside edits yield `None`.
    pub async fn at_position<T, R, F>(
        &self,
        kind: RuleKind,
        path: impl Into<NormalizedPath>,
        position: Position,
        lookup: F,
    ) -> Option<(R, Range)>
    where
        T: Any + Send + Sync,
        F: FnOnce(&T, Position) -> Option<(R, Range)>,
    {
        let path = path.into();
        let key = ArtifactKey::file(kind, &path);

        let response = self.engine.stale(&key);
        let response = if response.is_ready() {
            response
        } else {
            self.engine.fresh(key).await
        };

        let stale: StaleResult<T> = self.with_mapping(&path, response)?;
        let old_position = stale.mapping.to_old(position)?;
        let (result, old_range) = lookup(&stale.value, old_position)?;
        let range = stale.mapping.range_to_current(old_range)?;
        Some((result, range))
    }

    fn with_mapping<T: Any + Send + Sync>(
        &self,
        path: &NormalizedPath,
        response: Response,
    ) -> Option<StaleResult<T>> {
        let value = response.value_as::<T>()?;
        let computed_at = response.computed_at?;
        let changes = self.buffers.changes_since(path, computed_at)?;
        Some(StaleResult {
            value,
            mapping: PositionMapping::new(changes),
            freshness: response.freshness,
        })
    }
}

impl std::fmt::Debug for QueryFrontEnd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryFrontEnd")
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}
