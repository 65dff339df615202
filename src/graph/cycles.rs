//! Import cycle detection.
//!
//! Runs Tarjan's algorithm over the import edges between successfully
//! parsed units. A boot unit is a node of its own, so an import of
//! `B.hs-boot` never closes a cycle through `B.hs`.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::types::{Diagnostic, NormalizedPath, Range};

use super::types::{FilePathId, ModuleName, RawDependencyInformation};

const SOURCE: &str = "dependency-graph";
const UNVISITED: usize = usize::MAX;

/// One import statement inside a cycle.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct CycleSite {
    /// Importing unit.
    pub importer: FilePathId,
    /// Path of the importing unit.
    pub path: NormalizedPath,
    /// Imported module.
    pub module: ModuleName,
    /// Location of the import statement.
    pub range: Range,
}

/// A strongly connected group of units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleError {
    /// Module names of the members, sorted.
    pub members: Vec<ModuleName>,
    /// Member ids, sorted.
    pub units: Vec<FilePathId>,
    /// Every import statement between members.
    pub sites: Vec<CycleSite>,
}

impl CycleError {
    /// Human-readable description naming every member.
    pub fn message(&self) -> String {
        let names: Vec<&str> = self.members.iter().map(ModuleName::as_str).collect();
        format!("Cyclic module dependency between {}", names.join(", "))
    }

    /// One diagnostic per cyclic import statement.
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        let message = self.message();
        self.sites
            .iter()
            .map(|site| Diagnostic::error(SOURCE, message.clone()).at(&site.path, site.range))
            .collect()
    }

    /// Diagnostics for the import statements located in `path`.
    pub fn diagnostics_in(&self, path: &NormalizedPath) -> Vec<Diagnostic> {
        let message = self.message();
        self.sites
            .iter()
            .filter(|site| &site.path == path)
            .map(|site| Diagnostic::error(SOURCE, message.clone()).at(&site.path, site.range))
            .collect()
    }

    /// Whether `id` is a member.
    pub fn contains(&self, id: FilePathId) -> bool {
        self.units.binary_search(&id).is_ok()
    }
}

/// Find every import cycle of a finished pass.
pub fn find_cycles(raw: &RawDependencyInformation) -> Vec<CycleError> {
    let n = raw.len();
    let parsed: Vec<bool> = (0..n)
        .map(|i| raw.imports.get(i).map_or(false, |u| u.is_resolved()))
        .collect();

    let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut self_loop = vec![false; n];
    for (from, unit) in raw.imports.iter().enumerate() {
        if !parsed[from] {
            continue;
        }
        let targets: BTreeSet<usize> = unit
            .imports()
            .iter()
            .filter_map(|import| import.local())
            .map(|id| id.index())
            .filter(|&to| to < n && parsed[to])
            .collect();
        self_loop[from] = targets.contains(&from);
        adjacency[from] = targets.into_iter().collect();
    }

    let mut cycles: Vec<CycleError> = strongly_connected_components(&adjacency)
        .into_iter()
        .filter(|component| component.len() > 1 || self_loop[component[0]])
        .map(|component| cycle_error(raw, &component))
        .collect();
    cycles.sort_by(|a, b| a.units.cmp(&b.units));
    cycles
}

fn cycle_error(raw: &RawDependencyInformation, component: &[usize]) -> CycleError {
    let units: Vec<FilePathId> = component.iter().map(|&i| FilePathId(i as u32)).collect();

    let mut sites = Vec::new();
    let mut imported_as: BTreeMap<FilePathId, ModuleName> = BTreeMap::new();
    for &importer in &units {
        let (Some(location), Some(unit)) = (raw.path_ids.location(importer), raw.imports_of(importer))
        else {
            continue;
        };
        for import in unit.imports() {
            let Some(target) = import.local() else {
                continue;
            };
            if units.binary_search(&target).is_ok() {
                imported_as
                    .entry(target)
                    .or_insert_with(|| import.module.clone());
                sites.push(CycleSite {
                    importer,
                    path: location.path.clone(),
                    module: import.module.clone(),
                    range: import.range,
                });
            }
        }
    }
    sites.sort();

    CycleError {
        members: member_names(raw, &units, &imported_as),
        units,
        sites,
    }
}

/// One name per unit: the module name it is imported by, or the path when
/// two units would otherwise share a name.
fn member_names(
    raw: &RawDependencyInformation,
    units: &[FilePathId],
    imported_as: &BTreeMap<FilePathId, ModuleName>,
) -> Vec<ModuleName> {
    let named: Vec<(ModuleName, &NormalizedPath)> = units
        .iter()
        .filter_map(|&id| {
            let location = raw.path_ids.location(id)?;
            let name = imported_as
                .get(&id)
                .cloned()
                .unwrap_or_else(|| location.module.clone());
            Some((name, &location.path))
        })
        .collect();

    let mut members: Vec<ModuleName> = named
        .iter()
        .map(|(name, path)| {
            if named.iter().filter(|(other, _)| other == name).count() > 1 {
                ModuleName::new(path.as_str())
            } else {
                name.clone()
            }
        })
        .collect();
    members.sort();
    members
}

/// Tarjan's strongly connected components, iteratively.
///
/// Each component is sorted; components come out in reverse topological
/// order of the condensation.
pub(crate) fn strongly_connected_components(adjacency: &[Vec<usize>]) -> Vec<Vec<usize>> {
    let n = adjacency.len();
    let mut index = vec![UNVISITED; n];
    let mut low = vec![0usize; n];
    let mut on_stack = vec![false; n];
    let mut stack: Vec<usize> = Vec::new();
    let mut frames: Vec<(usize, usize)> = Vec::new();
    let mut next = 0usize;
    let mut components = Vec::new();

    for root in 0..n {
        if index[root] != UNVISITED {
            continue;
        }
        index[root] = next;
        low[root] = next;
        next += 1;
        stack.push(root);
        on_stack[root] = true;
        frames.push((root, 0));

        while let Some(frame) = frames.last_mut() {
            let v = frame.0;
            if frame.1 < adjacency[v].len() {
                let w = adjacency[v][frame.1];
                frame.1 += 1;
                if index[w] == UNVISITED {
                    index[w] = next;
                    low[w] = next;
                    next += 1;
                    stack.push(w);
                    on_stack[w] = true;
                    frames.push((w, 0));
                } else if on_stack[w] {
                    low[v] = low[v].min(index[w]);
                }
                continue;
            }

            frames.pop();
            if let Some(&(parent, _)) = frames.last() {
                low[parent] = low[parent].min(low[v]);
            }
            if low[v] == index[v] {
                let mut component = Vec::new();
                while let Some(w) = stack.pop() {
                    on_stack[w] = false;
                    component.push(w);
                    if w == v {
                        break;
                    }
                }
                component.sort_unstable();
                components.push(component);
            }
        }
    }
    components
}
