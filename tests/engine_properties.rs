//! Engine property tests.
//!
//! These tests drive a small toy language through the engine: `parse` reads
//! a file from an in-memory source map, `typecheck` depends on the parse of
//! the file and the typecheck of everything it imports.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use artifact_kernel::{
    rule_fn, ArtifactKey, CollaboratorError, Diagnostic, Engine, EngineConfig, Fingerprint,
    Freshness, NormalizedPath, Priority, RecordStatus, RequestMode, RuleContext,
    RuleDefinition, RuleKind, RuleOutput, RuleRegistry, SessionProvider, Subject, SubjectShape,
    Volatility, SESSION,
};
use artifact_kernel::rules::session_rule;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{Barrier, Semaphore};

const PARSE: RuleKind = RuleKind::new("parse");
const TYPECHECK: RuleKind = RuleKind::new("typecheck");

// ─────────────────────────────────────────────────────────────────────────────
// Test Helpers
// ─────────────────────────────────────────────────────────────────────────────

type Sources = Arc<Mutex<BTreeMap<NormalizedPath, String>>>;

#[derive(Debug, Serialize)]
struct Parsed {
    tokens: Vec<String>,
    imports: Vec<String>,
}

#[derive(Debug, Serialize)]
struct Checked {
    module: String,
    symbols: usize,
}

fn parse_rule(sources: Sources) -> RuleDefinition {
    RuleDefinition::new(
        PARSE,
        rule_fn(move |subject: Subject, _ctx: RuleContext| {
            let sources = Arc::clone(&sources);
            async move {
                let Some(path) = subject.path() else {
                    return RuleOutput::failed(Vec::new());
                };
                let Some(text) = sources.lock().get(path).cloned() else {
                    return RuleOutput::failed(vec![Diagnostic::error("parser", "file not found")
                        .at(path, Default::default())]);
                };
                if text.contains("syntax error") {
                    return RuleOutput::failed(vec![Diagnostic::error("parser", "syntax error")
                        .at(path, Default::default())]);
                }

                let parsed = Parsed {
                    tokens: text.split_whitespace().map(str::to_string).collect(),
                    imports: text
                        .lines()
                        .filter_map(|line| line.trim().strip_prefix("import "))
                        .map(|module| module.trim().to_string())
                        .collect(),
                };
                RuleOutput::fingerprinted(parsed)
            }
        }),
    )
    .priority(Priority::HIGH)
    .volatility(Volatility::Input)
}

fn typecheck_rule() -> RuleDefinition {
    RuleDefinition::new(
        TYPECHECK,
        rule_fn(|subject: Subject, ctx: RuleContext| async move {
            let parse = ctx.request(ArtifactKey::new(PARSE, subject.clone())).await;
            let Some(parsed) = parse.value_as::<Parsed>() else {
                return RuleOutput::failed(parse.diagnostics.to_vec());
            };

            let mut symbols = parsed.tokens.len();
            for module in &parsed.imports {
                let key = ArtifactKey::file(TYPECHECK, format!("{}.hs", module));
                match ctx.value::<Checked>(key).await {
                    Some(checked) => symbols += checked.symbols,
                    None => {
                        return RuleOutput::failed(vec![Diagnostic::error(
                            "typecheck",
                            format!("import {} failed", module),
                        )])
                    }
                }
            }

            let module = subject.path().map(|p| p.file_stem().to_string()).unwrap_or_default();
            RuleOutput::fingerprinted(Checked { module, symbols })
        }),
    )
}

struct Harness {
    engine: Engine,
    sources: Sources,
}

impl Harness {
    fn new(config: EngineConfig) -> Self {
        Self::with_rules(config, |_registry, _sources| {})
    }

    fn with_rules<F>(config: EngineConfig, extra: F) -> Self
    where
        F: FnOnce(&mut RuleRegistry, &Sources),
    {
        let sources: Sources = Arc::new(Mutex::new(BTreeMap::new()));
        let mut registry = RuleRegistry::new();
        registry.register(parse_rule(Arc::clone(&sources))).unwrap();
        registry.register(typecheck_rule()).unwrap();
        extra(&mut registry, &sources);
        Self {
            engine: Engine::new(registry, config),
            sources,
        }
    }

    fn write(&self, path: &str, text: &str) {
        self.sources.lock().insert(NormalizedPath::new(path), text.to_string());
    }

    fn edit(&self, path: &str, text: &str) {
        self.write(path, text);
        self.engine.invalidate([path]);
    }

    fn computations(&self, kind: RuleKind) -> u64 {
        self.engine.stats().computations_of(kind)
    }
}

fn quiet_config() -> EngineConfig {
    EngineConfig {
        workers: 2,
        refresh_stale_in_background: false,
        collaborator_timeout_ms: 1_000,
    }
}

async fn wait_for_status(engine: &Engine, key: &ArtifactKey, status: RecordStatus) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while engine.record(key).map(|r| r.status) != Some(status) {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("record never reached the expected status");
}

// ─────────────────────────────────────────────────────────────────────────────
// Idempotence and Early Cutoff
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_repeated_request_is_idempotent() {
    let h = Harness::new(quiet_config());
    h.write("A.hs", "module A\nx = 1");
    h.write("B.hs", "module B\nimport A\ny = x");
    let key = ArtifactKey::file(TYPECHECK, "B.hs");

    let first = h.engine.request(key.clone(), RequestMode::Fresh).await;
    let second = h.engine.request(key.clone(), RequestMode::Fresh).await;

    assert!(first.value.as_ref().unwrap().ptr_eq(second.value.as_ref().unwrap()));
    assert_eq!(first.diagnostics, second.diagnostics);
    assert_eq!(h.computations(TYPECHECK), 2); // A and B, once each
    assert_eq!(h.computations(PARSE), 2);
}

#[tokio::test]
async fn test_whitespace_edit_leaves_dependent_untouched() {
    let h = Harness::new(quiet_config());
    h.write("A.hs", "module A\nx = 1");
    h.write("B.hs", "module B\nimport A\ny = x");
    let b = ArtifactKey::file(TYPECHECK, "B.hs");
    let parse_a = ArtifactKey::file(PARSE, "A.hs");

    let before = h.engine.fresh(b.clone()).await;
    let changed_at = h.engine.record(&parse_a).unwrap().changed_at;

    h.edit("A.hs", "module A\n\n   x   =   1\n");
    let after = h.engine.fresh(b.clone()).await;

    assert_eq!(h.computations(PARSE), 3);
    assert_eq!(h.computations(TYPECHECK), 2);
    assert_eq!(h.engine.record(&parse_a).unwrap().changed_at, changed_at);
    assert!(before.value.unwrap().ptr_eq(after.value.as_ref().unwrap()));
    assert_eq!(after.freshness, Freshness::Current);
}

#[tokio::test]
async fn test_real_edit_propagates_to_dependents() {
    let h = Harness::new(quiet_config());
    h.write("A.hs", "module A\nx = 1");
    h.write("B.hs", "module B\nimport A\ny = x");
    let b = ArtifactKey::file(TYPECHECK, "B.hs");

    let before = h.engine.fresh(b.clone()).await;
    h.edit("A.hs", "module A\nx = 1\nz = 2");
    let after = h.engine.fresh(b.clone()).await;

    assert_eq!(h.computations(TYPECHECK), 4);
    let symbols = |r: &artifact_kernel::Response| r.value_as::<Checked>().unwrap().symbols;
    assert_eq!(symbols(&after), symbols(&before) + 3);
}

#[tokio::test]
async fn test_unrelated_edit_recomputes_nothing_downstream() {
    let h = Harness::new(quiet_config());
    h.write("A.hs", "module A\nx = 1");
    h.write("C.hs", "module C");
    let a = ArtifactKey::file(TYPECHECK, "A.hs");

    h.engine.fresh(a.clone()).await;
    h.edit("C.hs", "module C\nc = 3");
    h.engine.fresh(a.clone()).await;

    assert_eq!(h.computations(PARSE), 1);
    assert_eq!(h.computations(TYPECHECK), 1);
    // Both records are re-verified at the new revision without running.
    assert_eq!(h.engine.stats().clean_verifications, 2);
}

// ─────────────────────────────────────────────────────────────────────────────
// Failures and Stale Reads
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_failure_short_circuits_fresh_but_not_stale() {
    let h = Harness::new(quiet_config());
    h.write("A.hs", "module A\nx = 1");
    h.write("B.hs", "module B\nimport A");
    let parse_a = ArtifactKey::file(PARSE, "A.hs");
    let b = ArtifactKey::file(TYPECHECK, "B.hs");
    assert!(h.engine.fresh(b.clone()).await.is_ready());

    h.edit("A.hs", "module A\nsyntax error");
    let fresh = h.engine.fresh(b.clone()).await;
    assert!(!fresh.is_ready());
    assert_eq!(fresh.diagnostics[0].message, "import A failed");

    let parse = h.engine.fresh(parse_a.clone()).await;
    assert!(!parse.is_ready());
    assert_eq!(parse.diagnostics[0].message, "syntax error");
    assert_eq!(h.engine.record(&parse_a).unwrap().status, RecordStatus::Failed);

    let stale = h.engine.stale(&parse_a);
    assert!(stale.value_as::<Parsed>().is_some());
    assert_eq!(stale.freshness, Freshness::Outdated);
    assert!(stale.diagnostics.is_empty());

    let diagnostics = h.engine.diagnostics_for("A.hs");
    assert!(diagnostics.iter().any(|d| d.message == "syntax error"));
}

#[tokio::test]
async fn test_stale_read_never_waits_on_computation() {
    let gate = Arc::new(Semaphore::new(0));
    const SLOW: RuleKind = RuleKind::new("slow");

    let h = Harness::with_rules(quiet_config(), |registry, sources| {
        let gate = Arc::clone(&gate);
        let sources = Arc::clone(sources);
        registry
            .register(
                RuleDefinition::new(
                    SLOW,
                    rule_fn(move |subject: Subject, _ctx| {
                        let gate = Arc::clone(&gate);
                        let sources = Arc::clone(&sources);
                        async move {
                            let text = subject
                                .path()
                                .and_then(|p| sources.lock().get(p).cloned())
                                .unwrap_or_default();
                            gate.acquire().await.unwrap().forget();
                            RuleOutput::ready(text)
                        }
                    }),
                )
                .volatility(Volatility::Input),
            )
            .unwrap();
    });
    h.write("A.hs", "v1");
    let key = ArtifactKey::file(SLOW, "A.hs");

    // Nothing computed yet.
    let stale = h.engine.stale(&key);
    assert!(stale.value.is_none());
    assert_eq!(stale.freshness, Freshness::Outdated);

    let engine = h.engine.clone();
    let pending = tokio::spawn({
        let key = key.clone();
        async move { engine.fresh(key).await }
    });
    wait_for_status(&h.engine, &key, RecordStatus::Computing).await;
    assert!(h.engine.stale(&key).value.is_none());

    gate.add_permits(1);
    let first = pending.await.unwrap();
    assert_eq!(*first.value_as::<String>().unwrap(), "v1");
    let current = h.engine.stale(&key);
    assert_eq!(current.freshness, Freshness::Current);

    // A second computation is in flight: the previous value is served.
    h.edit("A.hs", "v2");
    let engine = h.engine.clone();
    let pending = tokio::spawn({
        let key = key.clone();
        async move { engine.fresh(key).await }
    });
    wait_for_status(&h.engine, &key, RecordStatus::Computing).await;
    let stale = h.engine.stale(&key);
    assert_eq!(*stale.value_as::<String>().unwrap(), "v1");
    assert_eq!(stale.freshness, Freshness::Outdated);

    gate.add_permits(1);
    let second = pending.await.unwrap();
    assert_eq!(*second.value_as::<String>().unwrap(), "v2");
}

#[tokio::test]
async fn test_stale_read_refreshes_in_background() {
    let config = EngineConfig {
        refresh_stale_in_background: true,
        ..quiet_config()
    };
    let h = Harness::new(config);
    h.write("A.hs", "module A");
    let key = ArtifactKey::file(PARSE, "A.hs");

    assert!(h.engine.stale(&key).value.is_none());
    wait_for_status(&h.engine, &key, RecordStatus::Ready).await;

    let stale = h.engine.stale(&key);
    assert!(stale.value_as::<Parsed>().is_some());
    assert_eq!(stale.freshness, Freshness::Current);
    assert_eq!(h.computations(PARSE), 1);
}

// ─────────────────────────────────────────────────────────────────────────────
// Always-Dirty Rules
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_always_dirty_runs_once_per_revision() {
    const ENVIRONMENT: RuleKind = RuleKind::new("environment");
    const FLAGS: RuleKind = RuleKind::new("flags");

    let h = Harness::with_rules(quiet_config(), |registry, _| {
        registry
            .register(
                RuleDefinition::new(
                    ENVIRONMENT,
                    rule_fn(|_subject, _ctx| async { RuleOutput::fingerprinted("ghc-9.4") }),
                )
                .shape(SubjectShape::NoFile)
                .volatility(Volatility::AlwaysDirty),
            )
            .unwrap();
        registry
            .register(
                RuleDefinition::new(
                    FLAGS,
                    rule_fn(|_subject, ctx: RuleContext| async move {
                        let env = ctx.value::<&'static str>(ArtifactKey::no_file(ENVIRONMENT)).await;
                        RuleOutput::ready(format!("-O2 ({})", env.map(|e| *e).unwrap_or("?")))
                    }),
                )
                .shape(SubjectShape::NoFile),
            )
            .unwrap();
    });
    let flags = ArtifactKey::no_file(FLAGS);

    h.engine.fresh(flags.clone()).await;
    h.engine.fresh(flags.clone()).await;
    h.engine.fresh(ArtifactKey::no_file(ENVIRONMENT)).await;
    assert_eq!(h.computations(ENVIRONMENT), 1);

    h.engine.invalidate(["unrelated.hs"]);
    h.engine.fresh(flags.clone()).await;
    h.engine.fresh(flags.clone()).await;

    assert_eq!(h.computations(ENVIRONMENT), 2);
    // Same fingerprint: the dependent is verified, not recomputed.
    assert_eq!(h.computations(FLAGS), 1);
}

struct CountingSessions {
    loads: AtomicUsize,
    flags: Mutex<String>,
}

#[async_trait]
impl SessionProvider for CountingSessions {
    type Session = String;

    async fn session_for(&self, path: &NormalizedPath) -> Result<String, CollaboratorError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if path.as_str().ends_with(".broken") {
            return Err(CollaboratorError::Io("cradle not found".to_string()));
        }
        Ok(self.flags.lock().clone())
    }

    fn fingerprint(&self, session: &String) -> Option<Fingerprint> {
        Fingerprint::of(session)
    }
}

#[tokio::test]
async fn test_session_rule_is_always_dirty_with_cutoff() {
    const COMPILE: RuleKind = RuleKind::new("compile");
    let provider = Arc::new(CountingSessions {
        loads: AtomicUsize::new(0),
        flags: Mutex::new("-Wall".to_string()),
    });

    let h = Harness::with_rules(quiet_config(), |registry, _| {
        registry.register(session_rule(Arc::clone(&provider))).unwrap();
        registry
            .register(RuleDefinition::new(
                COMPILE,
                rule_fn(|subject: Subject, ctx: RuleContext| async move {
                    match ctx.value::<String>(ArtifactKey::new(SESSION, subject)).await {
                        Some(flags) => RuleOutput::ready(format!("compiled with {}", flags)),
                        None => RuleOutput::failed(Vec::new()),
                    }
                }),
            ))
            .unwrap();
    });
    let compile = ArtifactKey::file(COMPILE, "A.hs");

    h.engine.fresh(compile.clone()).await;
    h.engine.invalidate(["A.hs"]);
    h.engine.fresh(compile.clone()).await;
    assert_eq!(provider.loads.load(Ordering::SeqCst), 2);
    assert_eq!(h.computations(COMPILE), 1);

    *provider.flags.lock() = "-Wall -Werror".to_string();
    h.engine.invalidate(["A.hs"]);
    let response = h.engine.fresh(compile.clone()).await;
    assert_eq!(*response.value_as::<String>().unwrap(), "compiled with -Wall -Werror");
    assert_eq!(h.computations(COMPILE), 2);

    let broken = h.engine.fresh(ArtifactKey::file(SESSION, "A.broken")).await;
    assert!(!broken.is_ready());
    assert_eq!(broken.diagnostics[0].message, "I/O error: cradle not found");
}

// ─────────────────────────────────────────────────────────────────────────────
// Concurrency, Cancellation and Cycles
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_concurrent_requests_share_one_computation() {
    let gate = Arc::new(Semaphore::new(0));
    let runs = Arc::new(AtomicUsize::new(0));
    const SLOW: RuleKind = RuleKind::new("slow");

    let h = Harness::with_rules(quiet_config(), |registry, _| {
        let gate = Arc::clone(&gate);
        let runs = Arc::clone(&runs);
        registry
            .register(RuleDefinition::new(
                SLOW,
                rule_fn(move |_subject, _ctx| {
                    let gate = Arc::clone(&gate);
                    let runs = Arc::clone(&runs);
                    async move {
                        runs.fetch_add(1, Ordering::SeqCst);
                        gate.acquire().await.unwrap().forget();
                        RuleOutput::ready(42u64)
                    }
                }),
            ))
            .unwrap();
    });
    let key = ArtifactKey::file(SLOW, "A.hs");

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let engine = h.engine.clone();
            let key = key.clone();
            tokio::spawn(async move { engine.fresh(key).await })
        })
        .collect();
    wait_for_status(&h.engine, &key, RecordStatus::Computing).await;
    gate.add_permits(1);

    for handle in handles {
        assert_eq!(*handle.await.unwrap().value_as::<u64>().unwrap(), 42);
    }
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_input_edited_mid_computation_is_discarded() {
    let gate = Arc::new(Semaphore::new(0));
    const LOAD: RuleKind = RuleKind::new("load");

    let h = Harness::with_rules(quiet_config(), |registry, sources| {
        let gate = Arc::clone(&gate);
        let sources = Arc::clone(sources);
        registry
            .register(
                RuleDefinition::new(
                    LOAD,
                    rule_fn(move |subject: Subject, _ctx| {
                        let gate = Arc::clone(&gate);
                        let sources = Arc::clone(&sources);
                        async move {
                            // Read before blocking, so a discarded run saw old text.
                            let text = subject
                                .path()
                                .and_then(|p| sources.lock().get(p).cloned())
                                .unwrap_or_default();
                            gate.acquire().await.unwrap().forget();
                            RuleOutput::ready(text)
                        }
                    }),
                )
                .volatility(Volatility::Input),
            )
            .unwrap();
    });
    h.write("A.hs", "old");
    let key = ArtifactKey::file(LOAD, "A.hs");

    let engine = h.engine.clone();
    let pending = tokio::spawn({
        let key = key.clone();
        async move { engine.fresh(key).await }
    });
    wait_for_status(&h.engine, &key, RecordStatus::Computing).await;
    tokio::time::timeout(Duration::from_secs(5), async {
        while h.computations(LOAD) == 0 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();

    h.edit("A.hs", "new");
    gate.add_permits(2);

    let response = pending.await.unwrap();
    assert_eq!(*response.value_as::<String>().unwrap(), "new");
    let stats = h.engine.stats();
    assert_eq!(stats.discarded_results, 1);
    assert_eq!(stats.computations_of(LOAD), 2);
}

#[tokio::test]
async fn test_derived_result_of_edited_subject_is_discarded() {
    let gate = Arc::new(Semaphore::new(0));
    const OUTLINE: RuleKind = RuleKind::new("outline");

    let h = Harness::with_rules(quiet_config(), |registry, sources| {
        let gate = Arc::clone(&gate);
        let sources = Arc::clone(sources);
        registry
            .register(RuleDefinition::new(
                OUTLINE,
                rule_fn(move |subject: Subject, _ctx| {
                    let gate = Arc::clone(&gate);
                    let sources = Arc::clone(&sources);
                    async move {
                        let text = subject
                            .path()
                            .and_then(|p| sources.lock().get(p).cloned())
                            .unwrap_or_default();
                        gate.acquire().await.unwrap().forget();
                        RuleOutput::ready(text)
                    }
                }),
            ))
            .unwrap();
    });
    h.write("A.hs", "old");
    let key = ArtifactKey::file(OUTLINE, "A.hs");

    let engine = h.engine.clone();
    let pending = tokio::spawn({
        let key = key.clone();
        async move { engine.fresh(key).await }
    });
    tokio::time::timeout(Duration::from_secs(5), async {
        while h.computations(OUTLINE) == 0 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();

    h.edit("A.hs", "new");
    let edited_at = h.engine.revision();
    gate.add_permits(2);

    let response = pending.await.unwrap();
    assert_eq!(*response.value_as::<String>().unwrap(), "new");
    assert_eq!(response.computed_at, Some(edited_at));
    let stats = h.engine.stats();
    assert_eq!(stats.discarded_results, 1);
    assert_eq!(stats.computations_of(OUTLINE), 2);
}

#[tokio::test]
async fn test_cyclic_rule_request_fails_instead_of_deadlocking() {
    const PING: RuleKind = RuleKind::new("ping");
    const PONG: RuleKind = RuleKind::new("pong");
    const SELF: RuleKind = RuleKind::new("self");

    fn bounce(target: RuleKind) -> impl artifact_kernel::Rule {
        rule_fn(move |subject: Subject, ctx: RuleContext| async move {
            let response = ctx.request(ArtifactKey::new(target, subject)).await;
            match response.value {
                Some(_) => RuleOutput::ready(()),
                None => RuleOutput::failed(response.diagnostics.to_vec()),
            }
        })
    }

    let h = Harness::with_rules(quiet_config(), |registry, _| {
        registry.register(RuleDefinition::new(PING, bounce(PONG))).unwrap();
        registry.register(RuleDefinition::new(PONG, bounce(PING))).unwrap();
        registry.register(RuleDefinition::new(SELF, bounce(SELF))).unwrap();
    });

    let response = tokio::time::timeout(
        Duration::from_secs(5),
        h.engine.fresh(ArtifactKey::file(PING, "A.hs")),
    )
    .await
    .expect("cyclic request deadlocked");
    assert!(!response.is_ready());
    assert!(response.diagnostics[0].message.contains("cyclic rule dependency"));

    let response = tokio::time::timeout(
        Duration::from_secs(5),
        h.engine.fresh(ArtifactKey::file(SELF, "A.hs")),
    )
    .await
    .expect("self request deadlocked");
    assert!(response.diagnostics[0].message.contains("cyclic rule dependency"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_fan_out_runs_sub_requests_concurrently() {
    const FAN: RuleKind = RuleKind::new("fan");
    const LEAF: RuleKind = RuleKind::new("leaf");
    let barrier = Arc::new(Barrier::new(2));

    let h = Harness::with_rules(quiet_config(), |registry, _| {
        let barrier = Arc::clone(&barrier);
        registry
            .register(RuleDefinition::new(
                LEAF,
                rule_fn(move |subject: Subject, _ctx| {
                    let barrier = Arc::clone(&barrier);
                    async move {
                        // Both leaves must be running at once to get past this.
                        barrier.wait().await;
                        RuleOutput::ready(subject.to_string())
                    }
                }),
            ))
            .unwrap();
        registry
            .register(
                RuleDefinition::new(
                    FAN,
                    rule_fn(|_subject, ctx: RuleContext| async move {
                        let responses = ctx
                            .request_many(vec![
                                ArtifactKey::file(LEAF, "A.hs"),
                                ArtifactKey::file(LEAF, "B.hs"),
                            ])
                            .await;
                        let names: Vec<String> = responses
                            .iter()
                            .filter_map(|r| r.value_as::<String>())
                            .map(|s| (*s).clone())
                            .collect();
                        RuleOutput::ready(names)
                    }),
                )
                .shape(SubjectShape::NoFile),
            )
            .unwrap();
    });

    let response = tokio::time::timeout(
        Duration::from_secs(5),
        h.engine.fresh(ArtifactKey::no_file(FAN)),
    )
    .await
    .expect("sub-requests were serialized");
    assert_eq!(
        *response.value_as::<Vec<String>>().unwrap(),
        vec!["A.hs".to_string(), "B.hs".to_string()]
    );
    assert_eq!(
        h.engine.record(&ArtifactKey::no_file(FAN)).unwrap().dependencies,
        vec![ArtifactKey::file(LEAF, "A.hs"), ArtifactKey::file(LEAF, "B.hs")]
    );
}

#[tokio::test(start_paused = true)]
async fn test_collaborator_timeout_becomes_failure() {
    const LOAD: RuleKind = RuleKind::new("load_interface");

    let h = Harness::with_rules(quiet_config(), |registry, _| {
        registry
            .register(RuleDefinition::new(
                LOAD,
                rule_fn(|subject: Subject, ctx: RuleContext| async move {
                    let key = ArtifactKey::new(LOAD, subject);
                    let loaded = ctx
                        .with_timeout(
                            "interface load",
                            Duration::from_millis(50),
                            tokio::time::sleep(Duration::from_secs(60)),
                        )
                        .await;
                    match loaded {
                        Ok(()) => RuleOutput::ready(()),
                        Err(err) => RuleOutput::failed(vec![err.into_diagnostic(&key)]),
                    }
                }),
            ))
            .unwrap();
    });

    let response = h.engine.fresh(ArtifactKey::file(LOAD, "A.hs")).await;
    assert!(!response.is_ready());
    assert_eq!(response.diagnostics[0].message, "interface load timed out after 50ms");
}

// ─────────────────────────────────────────────────────────────────────────────
// Contract Violations
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
#[should_panic(expected = "no rule registered for kind `missing`")]
async fn test_unregistered_kind_panics() {
    let h = Harness::new(quiet_config());
    h.engine.fresh(ArtifactKey::file(RuleKind::new("missing"), "A.hs")).await;
}

#[tokio::test]
#[should_panic(expected = "expects per-file subjects")]
async fn test_stale_read_with_wrong_subject_panics() {
    let h = Harness::new(quiet_config());
    h.engine.stale(&ArtifactKey::no_file(PARSE));
}

#[tokio::test]
#[should_panic(expected = "expects per-file subjects")]
async fn test_nested_contract_violation_reaches_caller() {
    const BAD: RuleKind = RuleKind::new("bad");
    const OUTER: RuleKind = RuleKind::new("outer");

    let h = Harness::with_rules(quiet_config(), |registry, _| {
        registry
            .register(RuleDefinition::new(
                BAD,
                rule_fn(|_subject, ctx: RuleContext| async move {
                    ctx.request(ArtifactKey::no_file(PARSE)).await;
                    RuleOutput::ready(())
                }),
            ))
            .unwrap();
        registry
            .register(RuleDefinition::new(
                OUTER,
                rule_fn(|_subject, ctx: RuleContext| async move {
                    ctx.request(ArtifactKey::file(BAD, "A.hs")).await;
                    RuleOutput::ready(())
                }),
            ))
            .unwrap();
    });

    h.engine.fresh(ArtifactKey::file(OUTER, "A.hs")).await;
}

#[tokio::test]
async fn test_panicking_rule_abandons_computation() {
    const BROKEN: RuleKind = RuleKind::new("broken");

    let h = Harness::with_rules(quiet_config(), |registry, _| {
        registry
            .register(RuleDefinition::new(
                BROKEN,
                rule_fn(|_subject, _ctx| async move {
                    if true {
                        panic!("rule bug");
                    }
                    RuleOutput::ready(())
                }),
            ))
            .unwrap();
    });

    let response = h.engine.fresh(ArtifactKey::file(BROKEN, "A.hs")).await;
    assert!(!response.is_ready());
    assert_eq!(response.diagnostics[0].message, "computation of broken(A.hs) was abandoned");
    assert_eq!(h.engine.stats().abandoned, 1);
}

#[test]
fn test_priority_hint() {
    let h = Harness::new(quiet_config());
    assert_eq!(h.engine.priority_hint(PARSE), Priority::HIGH);
    assert_eq!(h.engine.priority_hint(TYPECHECK), Priority::DEFAULT);
}
