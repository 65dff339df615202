//! # artifact-kernel
//!
//! Demand-driven incremental computation for language analysis services.
//!
//! The kernel answers one question:
//!
//! > Given the current sources, what is artifact `(kind, file)`, and what is
//! > the least work needed to know?
//!
//! ## Core Contract
//!
//! 1. Artifacts are computed on demand by registered rules and cached with
//!    the exact set of artifacts each computation read
//! 2. An input change invalidates only what could be affected
//! 3. A recomputation whose fingerprint is unchanged stops there (early cutoff)
//! 4. Interactive callers may read the last value without waiting
//!
//! ## Architecture
//!
//! ```text
//! QueryFrontEnd → Engine ─ fresh / stale ─→ ArtifactStore
//!                    ↓                          ↑
//!              RuleRegistry → Rule::compute → RuleContext::request
//!                    ↓
//!        graph rules (located imports → raw graph → cycles, topo order)
//! ```
//!
//! ## Determinism Guarantees
//!
//! - Keys iterate in `(kind, subject)` order
//! - Graph ids are allocated in depth-first order from the sorted roots
//! - Cycle members and diagnostics are sorted
//! - Fingerprints are xxh64 over canonical JSON

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod canonical;
pub mod config;
pub mod engine;
pub mod error;
pub mod graph;
pub mod query;
pub mod rules;
pub mod telemetry;
pub mod types;

// Re-exports
pub use canonical::{canonical_hash, canonical_hash_hex, to_canonical_bytes};
pub use config::{ConfigError, EngineConfig, GraphConfig};
pub use engine::{Engine, EngineStats, Freshness, RequestMode, Response, RuleContext};
pub use error::{CollaboratorError, ContractViolation};
pub use graph::{
    register_graph_rules, DependencyGraphBuilder, DependencyInformation, ImportLocator,
    LocateError, LocatedImport, ModuleName, NodeStatus, DEPENDENCY_INFORMATION, LOCATED_IMPORTS,
    RAW_DEPENDENCY_INFORMATION, TRANSITIVE_DEPENDENCIES, WORKSPACE_GRAPH,
};
pub use query::{NoBuffers, PositionMapping, QueryFrontEnd, TextBuffers, TextChange};
pub use rules::{
    rule_fn, Priority, RegistryError, Rule, RuleDefinition, RuleOutput, RuleRegistry,
    SessionProvider, SubjectShape, Volatility, SESSION,
};
pub use telemetry::{init_tracing, LogFormat, TelemetryError};
pub use types::{
    ArtifactKey, ArtifactRecord, ArtifactValue, Diagnostic, Diagnostics, Fingerprint,
    NormalizedPath, Position, Range, RecordStatus, Revision, RuleKind, Severity, Subject,
};

/// Version of the record layout and fingerprinting scheme.
///
/// Hosts persisting fingerprints across sessions must discard them when
/// this changes.
pub const ENGINE_SCHEMA_VERSION: &str = "artifact_kernel_v1";
