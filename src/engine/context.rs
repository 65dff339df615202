//! Handle passed to a running rule.

use std::any::Any;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::warn;

use crate::error::CollaboratorError;
use crate::types::{ArtifactKey, Diagnostic, Revision};

use super::scheduler::WorkerSlot;
use super::{Engine, Response};

struct ContextInner {
    engine: Engine,
    key: ArtifactKey,
    revision: Revision,
    dependencies: Mutex<Vec<ArtifactKey>>,
    slot: WorkerSlot,
}

/// Handle a rule uses to request other artifacts.
///
/// Every key requested through the context becomes a dependency edge of
/// the artifact being computed. While a request waits, the computation
/// gives up its worker slot.
#[derive(Clone)]
pub struct RuleContext {
    inner: Arc<ContextInner>,
}

impl RuleContext {
    pub(crate) fn new(engine: Engine, key: ArtifactKey, revision: Revision, slot: WorkerSlot) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                engine,
                key,
                revision,
                dependencies: Mutex::new(Vec::new()),
                slot,
            }),
        }
    }

    /// Key being computed.
    pub fn key(&self) -> &ArtifactKey {
        &self.inner.key
    }

    /// Revision the computation started at.
    pub fn revision(&self) -> Revision {
        self.inner.revision
    }

    /// Default bound for collaborator calls.
    pub fn collaborator_timeout(&self) -> Duration {
        self.inner.engine.config().collaborator_timeout()
    }

    /// Fresh sub-request for `key`.
    ///
    /// # Panics
    ///
    /// On a contract violation, as [`Engine::fresh`] does. The violation also
    /// reaches every caller waiting on this computation.
    pub async fn request(&self, key: ArtifactKey) -> Response {
        self.inner.engine.check_request(&self.inner.key, &key);
        self.record(&key);

        self.inner.slot.suspend().await;
        let outcome = self
            .inner
            .engine
            .resolve(Some(self.inner.key.clone()), key)
            .await;
        self.inner.slot.resume().await;
        outcome.response
    }

    /// Fresh sub-requests for independent keys, run concurrently.
    ///
    /// Responses come back in the order of `keys`.
    pub async fn request_many<I>(&self, keys: I) -> Vec<Response>
    where
        I: IntoIterator<Item = ArtifactKey>,
    {
        let keys: Vec<ArtifactKey> = keys.into_iter().collect();
        if keys.is_empty() {
            return Vec::new();
        }
        for key in &keys {
            self.inner.engine.check_request(&self.inner.key, key);
            self.record(key);
        }

        self.inner.slot.suspend().await;
        let handles: Vec<_> = keys
            .into_iter()
            .map(|key| {
                let engine = self.inner.engine.clone();
                let requester = self.inner.key.clone();
                tokio::spawn(async move { engine.resolve(Some(requester), key).await.response })
            })
            .collect();

        let mut responses = Vec::with_capacity(handles.len());
        for handle in handles {
            responses.push(match handle.await {
                Ok(response) => response,
                Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
                Err(err) => Response::failed(Diagnostic::error(
                    "engine",
                    format!("sub-request task failed: {}", err),
                )),
            });
        }
        self.inner.slot.resume().await;
        responses
    }

    /// Fresh sub-request returning the value as `T`.
    pub async fn value<T: Any + Send + Sync>(&self, key: ArtifactKey) -> Option<Arc<T>> {
        self.request(key).await.value_as::<T>()
    }

    /// Bound one collaborator invocation.
    pub async fn with_timeout<F>(
        &self,
        operation: &str,
        limit: Duration,
        future: F,
    ) -> Result<F::Output, CollaboratorError>
    where
        F: Future,
    {
        match tokio::time::timeout(limit, future).await {
            Ok(output) => Ok(output),
            Err(_) => {
                warn!(
                    key = %self.inner.key,
                    operation,
                    timeout_ms = limit.as_millis() as u64,
                    "collaborator timed out"
                );
                Err(CollaboratorError::Timeout {
                    operation: operation.to_string(),
                    after: limit,
                })
            }
        }
    }

    /// [`with_timeout`](Self::with_timeout) with the configured default bound.
    pub async fn with_default_timeout<F>(
        &self,
        operation: &str,
        future: F,
    ) -> Result<F::Output, CollaboratorError>
    where
        F: Future,
    {
        self.with_timeout(operation, self.collaborator_timeout(), future)
            .await
    }

    fn record(&self, key: &ArtifactKey) {
        let mut dependencies = self.inner.dependencies.lock();
        if !dependencies.contains(key) {
            dependencies.push(key.clone());
        }
    }

    /// Release the slot and hand back the recorded dependencies.
    pub(crate) async fn finish(&self) -> Vec<ArtifactKey> {
        self.inner.slot.release().await;
        std::mem::take(&mut *self.inner.dependencies.lock())
    }
}

impl std::fmt::Debug for RuleContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleContext")
            .field("key", &self.inner.key)
            .field("revision", &self.inner.revision)
            .finish_non_exhaustive()
    }
}
