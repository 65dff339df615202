//! Depth-first construction of the raw module graph.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::config::GraphConfig;
use crate::engine::RuleContext;
use crate::error::CollaboratorError;
use crate::rules::{Rule, RuleOutput};
use crate::types::{ArtifactKey, Diagnostic, NormalizedPath, Subject};

use super::info::DependencyInformation;
use super::rules::LOCATED_IMPORTS;
use super::types::{
    FilePathId, ImportTarget, LocatedImport, LocatedImports, ModuleLocation, PathIdMap,
    RawDependencyInformation, RawImport, ResolvedImport, UnitImports,
};

/// Why imports of a file could not be located.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LocateError {
    /// The file does not parse far enough to read its imports.
    #[error("imports could not be parsed ({} diagnostics)", .0.len())]
    Parse(Vec<Diagnostic>),

    /// The collaborator itself failed.
    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),
}

/// Finds and resolves the import statements of a file.
#[async_trait]
pub trait ImportLocator: Send + Sync + 'static {
    /// Imports of `path`, in source order.
    async fn locate(&self, path: &NormalizedPath) -> Result<Vec<LocatedImport>, LocateError>;
}

/// Rule computing [`LocatedImports`] through an [`ImportLocator`].
pub(crate) struct LocatedImportsRule {
    pub locator: Arc<dyn ImportLocator>,
}

#[async_trait]
impl Rule for LocatedImportsRule {
    async fn compute(&self, subject: &Subject, ctx: &RuleContext) -> RuleOutput {
        let key = ArtifactKey::new(LOCATED_IMPORTS, subject.clone());
        let Some(path) = subject.path() else {
            return RuleOutput::failed(Vec::new());
        };

        let located = ctx
            .with_default_timeout("import location", self.locator.locate(path))
            .await
            .map_err(LocateError::from)
            .and_then(|result| result);

        match located {
            Ok(imports) => RuleOutput::fingerprinted(LocatedImports { imports }),
            Err(LocateError::Parse(diagnostics)) => RuleOutput::failed(diagnostics),
            Err(LocateError::Collaborator(err)) => RuleOutput::failed(vec![err.into_diagnostic(&key)]),
        }
    }
}

struct Frame {
    id: FilePathId,
    parsed: bool,
    imports: Vec<LocatedImport>,
    next: usize,
    resolved: Vec<RawImport>,
}

/// One graph construction pass.
///
/// Ids are allocated in the order a recursive depth-first walk from the
/// sorted roots would first see each path; a path's id exists before its
/// imports are explored, so cyclic imports terminate.
pub struct DependencyGraphBuilder<'a> {
    ctx: &'a RuleContext,
    config: &'a GraphConfig,
    path_ids: PathIdMap,
    imports: Vec<UnitImports>,
}

impl<'a> DependencyGraphBuilder<'a> {
    /// Start a pass whose artifact requests go through `ctx`.
    pub fn new(ctx: &'a RuleContext, config: &'a GraphConfig) -> Self {
        Self {
            ctx,
            config,
            path_ids: PathIdMap::new(),
            imports: Vec::new(),
        }
    }

    /// Walk from `roots` and return the raw graph.
    pub async fn build_raw<I>(mut self, roots: I) -> RawDependencyInformation
    where
        I: IntoIterator<Item = NormalizedPath>,
    {
        let mut roots: Vec<NormalizedPath> = roots.into_iter().collect();
        roots.sort();
        roots.dedup();

        for root in roots {
            self.visit(root).await;
        }
        self.finish()
    }

    /// Walk from `roots` and analyse the result.
    pub async fn build<I>(self, roots: I) -> DependencyInformation
    where
        I: IntoIterator<Item = NormalizedPath>,
    {
        DependencyInformation::from_raw(self.build_raw(roots).await)
    }

    async fn visit(&mut self, root: NormalizedPath) {
        let (root_id, fresh) = self.allocate(&root);
        if !fresh {
            return;
        }

        let mut stack = vec![self.enter(root_id, &root).await];
        while let Some(frame) = stack.last_mut() {
            if frame.next >= frame.imports.len() {
                if frame.parsed {
                    let resolved = std::mem::take(&mut frame.resolved);
                    self.imports[frame.id.index()] = UnitImports::Resolved(resolved);
                }
                stack.pop();
                continue;
            }

            let import = frame.imports[frame.next].clone();
            frame.next += 1;

            let target = match &import.target {
                ImportTarget::Package(package) => ResolvedImport::Package(package.clone()),
                ImportTarget::Local(path) => {
                    let (id, fresh) = self.allocate(path);
                    if fresh {
                        let child = self.enter(id, path).await;
                        if let Some(parent) = stack.last_mut() {
                            parent.resolved.push(RawImport {
                                module: import.module,
                                range: import.range,
                                target: ResolvedImport::Local(id),
                            });
                        }
                        stack.push(child);
                        continue;
                    }
                    ResolvedImport::Local(id)
                }
            };
            frame.resolved.push(RawImport {
                module: import.module,
                range: import.range,
                target,
            });
        }
    }

    fn allocate(&mut self, path: &NormalizedPath) -> (FilePathId, bool) {
        let location = ModuleLocation::from_path(path, self.config);
        let (id, fresh) = self.path_ids.insert(location);
        if fresh {
            self.imports.push(UnitImports::ParseFailure);
        }
        (id, fresh)
    }

    /// Fetch the imports of a freshly allocated unit.
    ///
    /// Local imports not yet seen are requested together first, so the
    /// sequential walk below them finds their artifacts ready.
    async fn enter(&mut self, id: FilePathId, path: &NormalizedPath) -> Frame {
        let response = self
            .ctx
            .request(ArtifactKey::file(LOCATED_IMPORTS, path))
            .await;

        let Some(located) = response.value_as::<LocatedImports>() else {
            debug!(path = %path, "imports unavailable; unit marked as parse failure");
            return Frame {
                id,
                parsed: false,
                imports: Vec::new(),
                next: 0,
                resolved: Vec::new(),
            };
        };

        let unseen: Vec<ArtifactKey> = located
            .imports
            .iter()
            .filter_map(|import| match &import.target {
                ImportTarget::Local(target) if self.path_ids.id_of(target).is_none() => {
                    Some(ArtifactKey::file(LOCATED_IMPORTS, target))
                }
                _ => None,
            })
            .collect();
        if unseen.len() > 1 {
            self.ctx.request_many(unseen).await;
        }

        Frame {
            id,
            parsed: true,
            imports: located.imports.clone(),
            next: 0,
            resolved: Vec::new(),
        }
    }

    fn finish(self) -> RawDependencyInformation {
        let mut boot_map = std::collections::BTreeMap::new();
        for (index, location) in self.path_ids.locations().iter().enumerate() {
            if !location.is_boot() {
                continue;
            }
            let Some(real) = location.path.strip_suffix(&self.config.boot_suffix) else {
                continue;
            };
            if let Some(real_id) = self.path_ids.id_of(&real) {
                boot_map.insert(real_id, FilePathId(index as u32));
            }
        }

        RawDependencyInformation {
            path_ids: self.path_ids,
            imports: self.imports,
            boot_map,
        }
    }
}
