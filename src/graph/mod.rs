//! Module dependency graph.
//!
//! A pass walks imports depth-first from a root set, assigning dense ids
//! ([`FilePathId`]) on first sight, then analyses the finished raw graph:
//! Tarjan SCCs over parsed units give the import cycles, and a postorder
//! over the remaining units gives the dependencies-first order.
//!
//! Boot units (paths ending in [`GraphConfig::boot_suffix`]) are separate
//! nodes. Each real unit whose boot unit was discovered gets an ordering
//! edge to it, which never takes part in cycle detection.
//!
//! [`GraphConfig::boot_suffix`]: crate::config::GraphConfig::boot_suffix

pub mod builder;
pub mod cycles;
pub mod info;
pub mod rules;
pub mod types;

pub use builder::{DependencyGraphBuilder, ImportLocator, LocateError};
pub use cycles::{find_cycles, CycleError, CycleSite};
pub use info::{DependencyInformation, NodeStatus};
pub use rules::{
    register_graph_rules, DEPENDENCY_INFORMATION, LOCATED_IMPORTS, RAW_DEPENDENCY_INFORMATION,
    TRANSITIVE_DEPENDENCIES, WORKSPACE_GRAPH,
};
pub use types::{
    FilePathId, ImportTarget, LocatedImport, LocatedImports, ModuleLocation, ModuleName,
    PathIdMap, RawDependencyInformation, RawImport, ResolvedImport, TransitiveDependencies,
    UnitImports, UnitKind,
};
