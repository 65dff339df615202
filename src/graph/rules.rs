//! Engine rules exposing the dependency graph.
//!
//! | Kind | Subject | Value |
//! |------|---------|-------|
//! | [`LOCATED_IMPORTS`] | file | [`LocatedImports`](super::types::LocatedImports) |
//! | [`RAW_DEPENDENCY_INFORMATION`] | file | [`RawDependencyInformation`] |
//! | [`DEPENDENCY_INFORMATION`] | file | [`DependencyInformation`] |
//! | [`TRANSITIVE_DEPENDENCIES`] | file | [`TransitiveDependencies`] |
//! | [`WORKSPACE_GRAPH`] | no file | [`DependencyInformation`] |

use std::sync::Arc;

use crate::config::GraphConfig;
use crate::engine::RuleContext;
use crate::rules::{
    rule_fn, Priority, RegistryError, RuleDefinition, RuleOutput, RuleRegistry, SubjectShape,
    Volatility,
};
use crate::types::{ArtifactKey, RuleKind, Subject};

use super::builder::{DependencyGraphBuilder, ImportLocator, LocatedImportsRule};
use super::info::DependencyInformation;
use super::types::{RawDependencyInformation, TransitiveDependencies};

/// Imports of one file, resolved by the [`ImportLocator`].
pub const LOCATED_IMPORTS: RuleKind = RuleKind::new("located_imports");
/// Raw graph of one pass rooted at the subject file.
pub const RAW_DEPENDENCY_INFORMATION: RuleKind = RuleKind::new("raw_dependency_information");
/// Analysed graph rooted at the subject file; diagnostics are the cycles
/// reported in that file.
pub const DEPENDENCY_INFORMATION: RuleKind = RuleKind::new("dependency_information");
/// Transitive dependencies of the subject file; fails for error nodes.
pub const TRANSITIVE_DEPENDENCIES: RuleKind = RuleKind::new("transitive_dependencies");
/// Analysed graph of the configured workspace roots.
pub const WORKSPACE_GRAPH: RuleKind = RuleKind::new("workspace_graph");

/// Register the graph rules.
pub fn register_graph_rules(
    registry: &mut RuleRegistry,
    locator: Arc<dyn ImportLocator>,
    config: GraphConfig,
) -> Result<(), RegistryError> {
    let config = Arc::new(config);

    registry.register(
        RuleDefinition::new(LOCATED_IMPORTS, LocatedImportsRule { locator })
            .priority(Priority::HIGH)
            .volatility(Volatility::Input),
    )?;

    let raw_config = Arc::clone(&config);
    registry.register(RuleDefinition::new(
        RAW_DEPENDENCY_INFORMATION,
        rule_fn(move |subject: Subject, ctx: RuleContext| {
            let config = Arc::clone(&raw_config);
            async move {
                let Some(path) = subject.path() else {
                    return RuleOutput::failed(Vec::new());
                };
                let raw = DependencyGraphBuilder::new(&ctx, &config)
                    .build_raw([path.clone()])
                    .await;
                RuleOutput::fingerprinted(raw)
            }
        }),
    ))?;

    registry.register(RuleDefinition::new(
        DEPENDENCY_INFORMATION,
        rule_fn(|subject: Subject, ctx: RuleContext| async move {
            let Some(path) = subject.path() else {
                return RuleOutput::failed(Vec::new());
            };
            let response = ctx
                .request(ArtifactKey::new(RAW_DEPENDENCY_INFORMATION, subject.clone()))
                .await;
            let Some(raw) = response.value_as::<RawDependencyInformation>() else {
                return RuleOutput::failed(response.diagnostics.to_vec());
            };

            let info = DependencyInformation::from_raw((*raw).clone());
            let diagnostics = info.cycle_diagnostics_for(path);
            RuleOutput::fingerprinted(info).with_diagnostics(diagnostics)
        }),
    ))?;

    registry.register(RuleDefinition::new(
        TRANSITIVE_DEPENDENCIES,
        rule_fn(|subject: Subject, ctx: RuleContext| async move {
            let Some(path) = subject.path() else {
                return RuleOutput::failed(Vec::new());
            };
            let Some(info) = ctx
                .value::<DependencyInformation>(ArtifactKey::new(DEPENDENCY_INFORMATION, subject.clone()))
                .await
            else {
                return RuleOutput::failed(Vec::new());
            };

            match info.transitive_dependencies(path) {
                Some(modules) => RuleOutput::fingerprinted(TransitiveDependencies { modules }),
                None => RuleOutput::failed(Vec::new()),
            }
        }),
    ))?;

    let workspace_config = Arc::clone(&config);
    registry.register(
        RuleDefinition::new(
            WORKSPACE_GRAPH,
            rule_fn(move |_subject: Subject, ctx: RuleContext| {
                let config = Arc::clone(&workspace_config);
                async move {
                    let info = DependencyGraphBuilder::new(&ctx, &config)
                        .build(config.roots.clone())
                        .await;
                    let diagnostics = info.cycle_diagnostics();
                    RuleOutput::fingerprinted(info).with_diagnostics(diagnostics)
                }
            }),
        )
        .priority(Priority::LOW)
        .shape(SubjectShape::NoFile),
    )?;

    Ok(())
}
