//! Incremental artifact engine.
//!
//! The engine owns the artifact store and schedules rule computations.
//! A fresh request resolves a key to a record verified at the current
//! revision, recomputing it (or just re-verifying its dependencies) when
//! dirty. A stale request returns the last value-producing computation
//! without waiting.
//!
//! ## Concurrency
//!
//! Each key has at most one computation in flight; later requesters attach
//! to it. Computations run in worker slots handed out by priority and give
//! their slot back while waiting on sub-requests. A sub-request that would
//! wait on a computation which is itself (transitively) waiting on the
//! requester fails with a `cyclic rule dependency` diagnostic.

mod context;
mod scheduler;
mod store;

pub use context::RuleContext;

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::config::EngineConfig;
use crate::error::ContractViolation;
use crate::rules::{Priority, RuleDefinition, RuleOutput, RuleRegistry, Volatility};
use crate::types::{
    ArtifactKey, ArtifactRecord, ArtifactValue, Diagnostic, Diagnostics, NormalizedPath,
    Range, ReadySnapshot, RecordStatus, Revision, RuleKind,
};

use scheduler::{Scheduler, WorkerSlot};
use store::{InFlight, Slot, StoreInner};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// How a request waits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestMode {
    /// Wait for a result verified at the current revision.
    Fresh,
    /// Return the last computed value immediately.
    Stale,
}

/// Whether a response reflects the current revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Freshness {
    /// Verified at the current revision.
    Current,
    /// Computed at an earlier revision, or never computed.
    Outdated,
}

/// Result of a request.
#[derive(Debug, Clone)]
pub struct Response {
    /// Diagnostics of the computation that produced this response.
    pub diagnostics: Diagnostics,
    /// The value, absent on failure or when nothing was ever computed.
    pub value: Option<ArtifactValue>,
    /// Whether the response is current.
    pub freshness: Freshness,
    /// Revision the value or failure was computed at.
    pub computed_at: Option<Revision>,
}

impl Response {
    fn empty() -> Self {
        Self {
            diagnostics: crate::types::no_diagnostics(),
            value: None,
            freshness: Freshness::Outdated,
            computed_at: None,
        }
    }

    pub(crate) fn failed(diagnostic: Diagnostic) -> Self {
        Self {
            diagnostics: Arc::from(vec![diagnostic]),
            value: None,
            freshness: Freshness::Current,
            computed_at: None,
        }
    }

    /// The value downcast to `T`.
    pub fn value_as<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.value.as_ref().and_then(|v| v.downcast::<T>())
    }

    /// Whether a value is present.
    pub fn is_ready(&self) -> bool {
        self.value.is_some()
    }
}

/// Engine counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    /// Rule runs per kind.
    pub computations: BTreeMap<&'static str, u64>,
    /// Requests answered straight from the store.
    pub cache_hits: u64,
    /// Dirty-candidate records confirmed clean without running their rule.
    pub clean_verifications: u64,
    /// Results thrown away because their subject changed mid-run.
    pub discarded_results: u64,
    /// Computations that ended without settling (panics).
    pub abandoned: u64,
    /// Computations waiting for a worker slot.
    pub queued: usize,
    /// Records in the store.
    pub records: usize,
    /// Current revision.
    pub revision: Revision,
}

impl EngineStats {
    /// Rule runs for `kind`.
    pub fn computations_of(&self, kind: RuleKind) -> u64 {
        self.computations.get(kind.as_str()).copied().unwrap_or(0)
    }
}

enum Settle {
    Done,
    Retry,
    Gone,
}

pub(crate) struct Outcome {
    response: Response,
    changed_at: Revision,
}

impl Outcome {
    fn from_record(record: &ArtifactRecord) -> Self {
        Self {
            response: Response {
                diagnostics: record.diagnostics.clone(),
                value: record.value().cloned(),
                freshness: Freshness::Current,
                computed_at: record.computed_at,
            },
            changed_at: record.changed_at,
        }
    }

    fn failure(diagnostic: Diagnostic, revision: Revision) -> Self {
        Self {
            response: Response::failed(diagnostic),
            changed_at: revision,
        }
    }
}

struct Shared {
    registry: RuleRegistry,
    config: EngineConfig,
    scheduler: Arc<Scheduler>,
    store: Mutex<StoreInner>,
}

/// Handle to the incremental engine. Cheap to clone.
#[derive(Clone)]
pub struct Engine {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("rules", &self.shared.registry.len())
            .field("config", &self.shared.config)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Start a session over `registry`.
    pub fn new(registry: RuleRegistry, config: EngineConfig) -> Self {
        info!(
            rules = registry.len(),
            workers = config.workers,
            registry = %registry.fingerprint(),
            "engine started"
        );
        Self {
            shared: Arc::new(Shared {
                scheduler: Scheduler::new(config.workers),
                registry,
                config,
                store: Mutex::new(StoreInner::default()),
            }),
        }
    }

    /// The rule registry.
    pub fn registry(&self) -> &RuleRegistry {
        &self.shared.registry
    }

    /// The engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    /// Current revision.
    pub fn revision(&self) -> Revision {
        self.shared.store.lock().revision
    }

    /// Request `key` in the given mode.
    ///
    /// # Panics
    ///
    /// On a [`ContractViolation`]: unregistered kind or wrongly shaped subject.
    pub async fn request(&self, key: ArtifactKey, mode: RequestMode) -> Response {
        match mode {
            RequestMode::Fresh => self.fresh(key).await,
            RequestMode::Stale => self.stale(&key),
        }
    }

    /// Wait for `key` verified at the current revision.
    pub async fn fresh(&self, key: ArtifactKey) -> Response {
        self.definition(&key);
        self.resolve(None, key).await.response
    }

    /// The last value computed for `key`, without waiting.
    ///
    /// An outdated or missing value schedules a background refresh when
    /// [`EngineConfig::refresh_stale_in_background`] is set and a Tokio
    /// runtime is available.
    pub fn stale(&self, key: &ArtifactKey) -> Response {
        self.definition(key);

        let (response, refresh) = {
            let inner = self.shared.store.lock();
            let revision = inner.revision;
            match inner.slots.get(key) {
                Some(slot) => {
                    let verified = slot.record.verified_at == Some(revision);
                    let current = verified
                        && slot.in_flight.is_none()
                        && slot.record.status == RecordStatus::Ready;
                    let freshness = if current {
                        Freshness::Current
                    } else {
                        Freshness::Outdated
                    };
                    let response = match &slot.record.last_ready {
                        Some(snapshot) => Response {
                            diagnostics: snapshot.diagnostics.clone(),
                            value: Some(snapshot.value.clone()),
                            freshness,
                            computed_at: Some(snapshot.computed_at),
                        },
                        None => Response::empty(),
                    };
                    (response, !inner.closed && !verified && slot.in_flight.is_none())
                }
                None => (Response::empty(), !inner.closed),
            }
        };

        if refresh && self.shared.config.refresh_stale_in_background {
            self.refresh_in_background(key.clone());
        }
        response
    }

    /// Static priority of a rule kind.
    ///
    /// # Panics
    ///
    /// If `kind` is not registered.
    pub fn priority_hint(&self, kind: RuleKind) -> Priority {
        match self.shared.registry.priority_hint(kind) {
            Some(priority) => priority,
            None => contract_violation(ContractViolation::UnknownRule(kind)),
        }
    }

    /// Mark the `Input` records of `paths` dirty and start a new revision.
    ///
    /// Every other record of `paths` is only stamped as edited: a derived
    /// result already running is discarded, but settled ones keep early
    /// cutoff through their dependencies.
    pub fn invalidate<I, P>(&self, paths: I) -> Revision
    where
        I: IntoIterator<Item = P>,
        P: Into<NormalizedPath>,
    {
        let paths: BTreeSet<NormalizedPath> = paths.into_iter().map(Into::into).collect();
        let registry = &self.shared.registry;

        let mut inner = self.shared.store.lock();
        let revision = inner.revision.next();
        inner.revision = revision;

        let mut marked = 0usize;
        for (key, slot) in inner.slots.iter_mut() {
            let Some(path) = key.subject.path() else {
                continue;
            };
            if !paths.contains(path) {
                continue;
            }
            slot.edited_at = Some(revision);
            let is_input = registry
                .get(key.kind)
                .map_or(false, |d| d.volatility == Volatility::Input);
            if is_input {
                slot.invalidated_at = Some(revision);
                marked += 1;
            }
        }

        info!(revision = %revision, paths = paths.len(), marked, "inputs invalidated");
        revision
    }

    /// Drop every record whose subject is one of `paths`.
    ///
    /// Records with a computation in flight are reset instead; the running
    /// result is discarded when it finishes.
    pub fn evict<I, P>(&self, paths: I) -> Revision
    where
        I: IntoIterator<Item = P>,
        P: Into<NormalizedPath>,
    {
        let paths: BTreeSet<NormalizedPath> = paths.into_iter().map(Into::into).collect();

        let mut inner = self.shared.store.lock();
        let revision = inner.revision.next();
        inner.revision = revision;

        let mut removed = 0usize;
        inner.slots.retain(|key, slot| {
            let hit = key.subject.path().map_or(false, |p| paths.contains(p));
            if !hit {
                return true;
            }
            if slot.in_flight.is_some() {
                slot.record = ArtifactRecord::default();
                slot.invalidated_at = Some(revision);
                slot.edited_at = Some(revision);
                true
            } else {
                removed += 1;
                false
            }
        });

        info!(revision = %revision, paths = paths.len(), removed, "records evicted");
        revision
    }

    /// End the session: drop every record and refuse further computations.
    pub fn shutdown(&self) {
        let mut inner = self.shared.store.lock();
        inner.closed = true;
        let records = inner.slots.len();
        inner.slots.clear();
        info!(records, "engine shut down");
    }

    /// Whether [`shutdown`](Self::shutdown) was called.
    pub fn is_shut_down(&self) -> bool {
        self.shared.store.lock().closed
    }

    /// Diagnostics of every settled record for `path`, in key order.
    pub fn diagnostics_for(&self, path: impl Into<NormalizedPath>) -> Vec<Diagnostic> {
        let path = path.into();
        let inner = self.shared.store.lock();
        let mut diagnostics = Vec::new();
        for (key, slot) in inner.slots.iter() {
            if key.subject.path() == Some(&path) && slot.record.is_settled() {
                diagnostics.extend(slot.record.diagnostics.iter().cloned());
            }
        }
        diagnostics
    }

    /// Snapshot of the record for `key`.
    pub fn record(&self, key: &ArtifactKey) -> Option<ArtifactRecord> {
        self.shared.store.lock().slots.get(key).map(Slot::snapshot)
    }

    /// Keys present in the store.
    pub fn keys(&self) -> Vec<ArtifactKey> {
        self.shared.store.lock().slots.keys().cloned().collect()
    }

    /// Engine counters.
    pub fn stats(&self) -> EngineStats {
        let queued = self.shared.scheduler.queued();
        let inner = self.shared.store.lock();
        let mut stats = inner.stats.clone();
        stats.queued = queued;
        stats.records = inner.slots.len();
        stats.revision = inner.revision;
        stats
    }

    /// Check `key` against its rule and return the definition.
    pub(crate) fn definition(&self, key: &ArtifactKey) -> &RuleDefinition {
        match self.check(key) {
            Ok(definition) => definition,
            Err(violation) => contract_violation(violation),
        }
    }

    /// Check a sub-request `requester` makes for `key`.
    ///
    /// A violation is kept on the requester's record before it is raised, so
    /// whoever waits on the requester fails the same way.
    pub(crate) fn check_request(&self, requester: &ArtifactKey, key: &ArtifactKey) {
        let Err(violation) = self.check(key) else {
            return;
        };
        if let Some(slot) = self.shared.store.lock().slots.get_mut(requester) {
            slot.violation = Some(violation.clone());
        }
        contract_violation(violation);
    }

    fn check(&self, key: &ArtifactKey) -> Result<&RuleDefinition, ContractViolation> {
        let Some(definition) = self.shared.registry.get(key.kind) else {
            return Err(ContractViolation::UnknownRule(key.kind));
        };
        if !definition.shape.accepts(&key.subject) {
            return Err(ContractViolation::SubjectShape {
                kind: key.kind,
                expected: definition.shape.describe(),
                subject: key.subject.clone(),
            });
        }
        Ok(definition)
    }

    /// Resolve `key` to a record verified at the current revision.
    ///
    /// `requester` is the computation waiting on the result, if any; it is
    /// used to detect wait cycles.
    pub(crate) fn resolve(
        &self,
        requester: Option<ArtifactKey>,
        key: ArtifactKey,
    ) -> BoxFuture<'_, Outcome> {
        Box::pin(async move {
            loop {
                let mut done = {
                    let mut inner = self.shared.store.lock();
                    let revision = inner.revision;
                    if inner.closed {
                        return Outcome::failure(
                            Diagnostic::error("engine", "engine has shut down"),
                            revision,
                        );
                    }

                    let slot = inner.slots.entry(key.clone()).or_default();
                    let running = slot.in_flight.as_ref().map(|f| (f.done.clone(), f.started_at));
                    let done = match running {
                        Some((done, started_at)) => {
                            if let Some(requester) = &requester {
                                if inner.would_deadlock(requester, &key) {
                                    warn!(requester = %requester, key = %key, "cyclic rule dependency");
                                    let diagnostic = cyclic_diagnostic(requester, &key);
                                    return Outcome::failure(diagnostic, revision);
                                }
                            }
                            debug!(key = %key, started_at = %started_at, "joining in-flight computation");
                            done
                        }
                        None if slot.record.verified_at == Some(revision) => {
                            if let Some(violation) = slot.violation.clone() {
                                if let Some(waiting) =
                                    requester.as_ref().and_then(|r| inner.slots.get_mut(r))
                                {
                                    waiting.violation = Some(violation.clone());
                                }
                                drop(inner);
                                contract_violation(violation);
                            }
                            let outcome = Outcome::from_record(&slot.record);
                            inner.stats.cache_hits += 1;
                            debug!(key = %key, revision = %revision, "cache hit");
                            return outcome;
                        }
                        None => {
                            let (sender, done) = watch::channel(false);
                            slot.violation = None;
                            slot.in_flight = Some(InFlight {
                                started_at: revision,
                                done: done.clone(),
                                awaiting: BTreeMap::new(),
                            });
                            self.spawn_drive(key.clone(), sender);
                            done
                        }
                    };

                    if let Some(requester) = &requester {
                        inner.add_await(requester, &key);
                    }
                    done
                };

                let _awaiting = requester.as_ref().map(|requester| AwaitGuard {
                    engine: self,
                    requester: requester.clone(),
                    target: key.clone(),
                });
                while !*done.borrow() {
                    if done.changed().await.is_err() {
                        break;
                    }
                }
            }
        })
    }

    fn spawn_drive(&self, key: ArtifactKey, done: watch::Sender<bool>) {
        let engine = self.clone();
        let drive: BoxFuture<'static, ()> = Box::pin(async move { engine.drive(key, done).await });
        tokio::spawn(drive);
    }

    fn refresh_in_background(&self, key: ArtifactKey) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        debug!(key = %key, "refreshing stale record in background");
        let engine = self.clone();
        handle.spawn(async move {
            engine.resolve(None, key).await;
        });
    }

    /// Bring the in-flight record for `key` up to date.
    async fn drive(self, key: ArtifactKey, done: watch::Sender<bool>) {
        let mut flight = FlightGuard {
            engine: self.clone(),
            key: key.clone(),
            done: Some(done),
            settled: false,
        };
        let Some(definition) = self.shared.registry.get(key.kind).cloned() else {
            return;
        };

        let mut discarded = false;
        loop {
            let (revision, verify) = {
                let mut inner = self.shared.store.lock();
                if inner.closed {
                    return;
                }
                let revision = inner.revision;
                let Some(slot) = inner.slots.get_mut(&key) else {
                    return;
                };
                if let Some(running) = slot.in_flight.as_mut() {
                    running.started_at = revision;
                }

                let record = &slot.record;
                let must_compute = match record.verified_at {
                    None => true,
                    Some(verified) => {
                        discarded
                            || record.status == RecordStatus::Missing
                            || definition.volatility == Volatility::AlwaysDirty
                            || slot.invalidated_since(verified)
                    }
                };
                let verify = match (must_compute, record.verified_at) {
                    (false, Some(verified)) => Some((verified, record.dependencies.clone())),
                    _ => None,
                };
                (revision, verify)
            };

            if let Some((verified, dependencies)) = verify {
                let mut changed = false;
                for dependency in dependencies {
                    let outcome = self.resolve(Some(key.clone()), dependency).await;
                    if outcome.changed_at > verified {
                        changed = true;
                        break;
                    }
                }

                if !changed {
                    match self.settle_clean(&key, revision) {
                        Settle::Done => {
                            flight.settled = true;
                            return;
                        }
                        Settle::Retry => continue,
                        Settle::Gone => return,
                    }
                }
            }

            let (output, dependencies) = self.run_rule(&definition, &key, revision).await;
            match self.settle_computed(&key, output, dependencies, revision) {
                Settle::Done => {
                    flight.settled = true;
                    return;
                }
                Settle::Retry => {
                    discarded = true;
                    continue;
                }
                Settle::Gone => return,
            }
        }
    }

    fn settle_clean(&self, key: &ArtifactKey, revision: Revision) -> Settle {
        let mut inner = self.shared.store.lock();
        if inner.closed {
            return Settle::Gone;
        }
        let Some(slot) = inner.slots.get_mut(key) else {
            return Settle::Gone;
        };
        if slot.invalidated_since(revision) {
            return Settle::Retry;
        }
        slot.record.verified_at = Some(revision);
        inner.stats.clean_verifications += 1;
        debug!(key = %key, revision = %revision, "verified clean");
        Settle::Done
    }

    fn settle_computed(
        &self,
        key: &ArtifactKey,
        output: RuleOutput,
        dependencies: Vec<ArtifactKey>,
        revision: Revision,
    ) -> Settle {
        let mut inner = self.shared.store.lock();
        if inner.closed {
            return Settle::Gone;
        }
        let Some(slot) = inner.slots.get_mut(key) else {
            return Settle::Gone;
        };
        if slot.edited_since(revision) {
            inner.stats.discarded_results += 1;
            warn!(key = %key, revision = %revision, "subject changed during computation; result discarded");
            return Settle::Retry;
        }
        let changed = accept(slot, output, dependencies, revision);
        debug!(key = %key, revision = %revision, changed, "computation settled");
        Settle::Done
    }

    async fn run_rule(
        &self,
        definition: &RuleDefinition,
        key: &ArtifactKey,
        revision: Revision,
    ) -> (RuleOutput, Vec<ArtifactKey>) {
        {
            let mut inner = self.shared.store.lock();
            *inner.stats.computations.entry(key.kind.as_str()).or_insert(0) += 1;
        }

        let slot = WorkerSlot::new(Arc::clone(&self.shared.scheduler), definition.priority);
        slot.start().await;
        let ctx = RuleContext::new(self.clone(), key.clone(), revision, slot);

        let span = info_span!("compute", kind = %key.kind, subject = %key.subject, revision = %revision);
        let output = definition.rule.compute(&key.subject, &ctx).instrument(span).await;
        let dependencies = ctx.finish().await;
        (output, dependencies)
    }
}

/// Store a finished computation. Returns whether dependents see a change.
fn accept(
    slot: &mut Slot,
    output: RuleOutput,
    dependencies: Vec<ArtifactKey>,
    revision: Revision,
) -> bool {
    let record = &mut slot.record;
    let diagnostics: Diagnostics = output.diagnostics.into();

    let changed = match output.value {
        None => {
            record.status = RecordStatus::Failed;
            true
        }
        Some(value) => {
            let unchanged = record.status == RecordStatus::Ready
                && output.fingerprint.is_some()
                && record.fingerprint() == output.fingerprint.as_ref();
            record.last_ready = Some(ReadySnapshot {
                value,
                fingerprint: output.fingerprint,
                diagnostics: diagnostics.clone(),
                computed_at: revision,
            });
            record.status = RecordStatus::Ready;
            !unchanged
        }
    };

    if changed {
        record.changed_at = revision;
    }
    record.diagnostics = diagnostics;
    record.dependencies = dependencies;
    record.computed_at = Some(revision);
    record.verified_at = Some(revision);
    changed
}

fn cyclic_diagnostic(requester: &ArtifactKey, key: &ArtifactKey) -> Diagnostic {
    let diagnostic = Diagnostic::error(
        "engine",
        format!("cyclic rule dependency: {} requested {}", requester, key),
    );
    match requester.subject.path() {
        Some(path) => diagnostic.at(path, Range::default()),
        None => diagnostic,
    }
}

fn contract_violation(violation: ContractViolation) -> ! {
    error!(violation = %violation, "contract violation");
    panic!("contract violation: {}", violation);
}

/// Registers a wait edge for the duration of one wait.
struct AwaitGuard<'a> {
    engine: &'a Engine,
    requester: ArtifactKey,
    target: ArtifactKey,
}

impl Drop for AwaitGuard<'_> {
    fn drop(&mut self) {
        self.engine
            .shared
            .store
            .lock()
            .remove_await(&self.requester, &self.target);
    }
}

/// Clears the in-flight marker and wakes waiters, however the drive ends.
struct FlightGuard {
    engine: Engine,
    key: ArtifactKey,
    done: Option<watch::Sender<bool>>,
    settled: bool,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        let mut abandoned = false;
        {
            let mut inner = self.engine.shared.store.lock();
            let revision = inner.revision;
            let closed = inner.closed;
            if let Some(slot) = inner.slots.get_mut(&self.key) {
                slot.in_flight = None;
                if !self.settled && !closed {
                    let message = match &slot.violation {
                        Some(violation) => {
                            format!("computation of {} was abandoned: {}", self.key, violation)
                        }
                        None => format!("computation of {} was abandoned", self.key),
                    };
                    let record = &mut slot.record;
                    record.status = RecordStatus::Failed;
                    record.diagnostics = Arc::from(vec![Diagnostic::error("engine", message)]);
                    record.changed_at = revision;
                    record.computed_at = Some(revision);
                    record.verified_at = Some(revision);
                    abandoned = true;
                }
            }
            if abandoned {
                inner.stats.abandoned += 1;
            }
        }

        if abandoned {
            error!(key = %self.key, "computation abandoned");
        }
        if let Some(done) = self.done.take() {
            done.send_replace(true);
        }
    }
}
