//! Graph artifacts: ids, locations, imports.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::GraphConfig;
use crate::types::{NormalizedPath, Range};

/// Dense id of a unit within one graph construction pass.
///
/// Ids are allocated in discovery order and are meaningless across passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FilePathId(pub u32);

impl FilePathId {
    /// Index into per-pass vectors.
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for FilePathId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Module name as written in import statements.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModuleName(String);

impl ModuleName {
    /// Create a module name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Get the name as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModuleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ModuleName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Normal unit or boot stand-in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum UnitKind {
    /// A full compilation unit.
    Normal,
    /// A forward-declaration stand-in.
    Boot,
}

/// Where a unit lives and what it is called.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ModuleLocation {
    /// Source path.
    pub path: NormalizedPath,
    /// Module name derived from the path.
    pub module: ModuleName,
    /// Normal or boot.
    pub kind: UnitKind,
}

impl ModuleLocation {
    /// Derive a location from a path.
    ///
    /// Paths ending in the configured boot suffix are boot units; the
    /// module name is the file stem with that suffix removed, so
    /// `src/B.hs-boot` is the boot unit of module `B`.
    pub fn from_path(path: &NormalizedPath, config: &GraphConfig) -> Self {
        let (real, kind) = match path.strip_suffix(&config.boot_suffix) {
            Some(real) => (real, UnitKind::Boot),
            None => (path.clone(), UnitKind::Normal),
        };
        Self {
            path: path.clone(),
            module: ModuleName::new(real.file_stem()),
            kind,
        }
    }

    /// Whether this is a boot unit.
    pub fn is_boot(&self) -> bool {
        self.kind == UnitKind::Boot
    }
}

/// Import target as reported by the import locator.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ImportTarget {
    /// A unit in the workspace.
    Local(NormalizedPath),
    /// A module from an external package.
    Package(String),
}

/// One import statement of a unit, resolved to a target.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LocatedImport {
    /// Imported module.
    pub module: ModuleName,
    /// Location of the import statement.
    pub range: Range,
    /// Where the module was found.
    pub target: ImportTarget,
}

impl LocatedImport {
    /// Import of a workspace unit.
    pub fn local(module: impl Into<ModuleName>, range: Range, path: impl Into<NormalizedPath>) -> Self {
        Self {
            module: module.into(),
            range,
            target: ImportTarget::Local(path.into()),
        }
    }

    /// Import from an external package.
    pub fn package(module: impl Into<ModuleName>, range: Range, package: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            range,
            target: ImportTarget::Package(package.into()),
        }
    }
}

/// Value of the located-imports artifact.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LocatedImports {
    /// Imports in source order.
    pub imports: Vec<LocatedImport>,
}

/// Resolved target within one pass.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ResolvedImport {
    /// A unit of this pass.
    Local(FilePathId),
    /// External package.
    Package(String),
}

/// One import edge in the raw graph.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RawImport {
    /// Imported module.
    pub module: ModuleName,
    /// Location of the import statement in the importing unit.
    pub range: Range,
    /// Resolved target.
    pub target: ResolvedImport,
}

impl RawImport {
    /// The local target, if any.
    pub fn local(&self) -> Option<FilePathId> {
        match self.target {
            ResolvedImport::Local(id) => Some(id),
            ResolvedImport::Package(_) => None,
        }
    }
}

/// Imports of one unit, or the marker that they could not be determined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnitImports {
    /// The located-imports artifact failed.
    ParseFailure,
    /// Imports in source order.
    Resolved(Vec<RawImport>),
}

impl UnitImports {
    /// Whether imports were determined.
    pub fn is_resolved(&self) -> bool {
        matches!(self, UnitImports::Resolved(_))
    }

    /// The imports, empty on parse failure.
    pub fn imports(&self) -> &[RawImport] {
        match self {
            UnitImports::ParseFailure => &[],
            UnitImports::Resolved(imports) => imports,
        }
    }
}

/// Bidirectional path/id map of one pass.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PathIdMap {
    locations: Vec<ModuleLocation>,
    ids: BTreeMap<NormalizedPath, FilePathId>,
}

impl PathIdMap {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Id of `location.path`, allocating one on first sight.
    ///
    /// Returns the id and whether it was newly allocated.
    pub fn insert(&mut self, location: ModuleLocation) -> (FilePathId, bool) {
        if let Some(id) = self.ids.get(&location.path) {
            return (*id, false);
        }
        let id = FilePathId(self.locations.len() as u32);
        self.ids.insert(location.path.clone(), id);
        self.locations.push(location);
        (id, true)
    }

    /// Id of a path seen in this pass.
    pub fn id_of(&self, path: &NormalizedPath) -> Option<FilePathId> {
        self.ids.get(path).copied()
    }

    /// Location of an id.
    pub fn location(&self, id: FilePathId) -> Option<&ModuleLocation> {
        self.locations.get(id.index())
    }

    /// All locations in id order.
    pub fn locations(&self) -> &[ModuleLocation] {
        &self.locations
    }

    /// Number of units.
    pub fn len(&self) -> usize {
        self.locations.len()
    }

    /// Whether the map is empty.
    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }
}

/// Output of one graph construction pass, before analysis.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RawDependencyInformation {
    /// Units of the pass.
    pub path_ids: PathIdMap,
    /// Imports per unit, indexed by id.
    pub imports: Vec<UnitImports>,
    /// Real unit id to the id of its boot unit.
    pub boot_map: BTreeMap<FilePathId, FilePathId>,
}

impl RawDependencyInformation {
    /// Number of units.
    pub fn len(&self) -> usize {
        self.path_ids.len()
    }

    /// Whether the pass found no units.
    pub fn is_empty(&self) -> bool {
        self.path_ids.is_empty()
    }

    /// Imports of a unit.
    pub fn imports_of(&self, id: FilePathId) -> Option<&UnitImports> {
        self.imports.get(id.index())
    }
}

/// Value of the transitive-dependencies artifact.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TransitiveDependencies {
    /// Units the subject depends on, dependencies first.
    pub modules: Vec<NormalizedPath>,
}
