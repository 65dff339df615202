//! Analysed dependency graph.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::types::{Diagnostic, NormalizedPath};

use super::cycles::{find_cycles, CycleError};
use super::types::{FilePathId, ModuleLocation, PathIdMap, RawDependencyInformation, UnitImports};

/// Status of a unit in the analysed graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum NodeStatus {
    /// Imports resolved and not part of a cycle.
    Reachable,
    /// Imports could not be determined.
    ParseError,
    /// Member of an import cycle.
    PartOfCycle,
}

impl NodeStatus {
    /// Whether the unit is an error node.
    pub fn is_error(&self) -> bool {
        !matches!(self, NodeStatus::Reachable)
    }
}

/// A raw graph plus cycle analysis and a topological order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DependencyInformation {
    path_ids: PathIdMap,
    imports: Vec<UnitImports>,
    boot_map: BTreeMap<FilePathId, FilePathId>,
    status: Vec<NodeStatus>,
    cycles: Vec<CycleError>,
    /// Non-cycle units, dependencies first.
    order: Vec<FilePathId>,
    #[serde(skip)]
    position: Vec<Option<usize>>,
}

impl DependencyInformation {
    /// Analyse a finished pass.
    pub fn from_raw(raw: RawDependencyInformation) -> Self {
        let n = raw.len();
        let cycles = find_cycles(&raw);

        let mut status: Vec<NodeStatus> = (0..n)
            .map(|i| match raw.imports.get(i) {
                Some(UnitImports::Resolved(_)) => NodeStatus::Reachable,
                _ => NodeStatus::ParseError,
            })
            .collect();
        for cycle in &cycles {
            for unit in &cycle.units {
                status[unit.index()] = NodeStatus::PartOfCycle;
            }
        }

        let successors = successor_lists(&raw);
        let excluded: Vec<bool> = status.iter().map(|s| *s == NodeStatus::PartOfCycle).collect();
        let order = postorder(&successors, &excluded);

        let mut position = vec![None; n];
        for (i, &node) in order.iter().enumerate() {
            position[node] = Some(i);
        }

        Self {
            path_ids: raw.path_ids,
            imports: raw.imports,
            boot_map: raw.boot_map,
            status,
            cycles,
            order: order.into_iter().map(|i| FilePathId(i as u32)).collect(),
            position,
        }
    }

    /// Id of a unit of this pass.
    pub fn id_of(&self, path: &NormalizedPath) -> Option<FilePathId> {
        self.path_ids.id_of(path)
    }

    /// Location of a unit.
    pub fn location(&self, id: FilePathId) -> Option<&ModuleLocation> {
        self.path_ids.location(id)
    }

    /// Status of a unit.
    pub fn status_of(&self, path: &NormalizedPath) -> Option<NodeStatus> {
        self.id_of(path).map(|id| self.status[id.index()])
    }

    /// Cycles found in the pass.
    pub fn cycles(&self) -> &[CycleError] {
        &self.cycles
    }

    /// Cycle diagnostics located in `path`, one per cyclic import statement.
    pub fn cycle_diagnostics_for(&self, path: &NormalizedPath) -> Vec<Diagnostic> {
        self.cycles
            .iter()
            .flat_map(|cycle| cycle.diagnostics_in(path))
            .collect()
    }

    /// Every cycle diagnostic of the pass.
    pub fn cycle_diagnostics(&self) -> Vec<Diagnostic> {
        self.cycles.iter().flat_map(CycleError::diagnostics).collect()
    }

    /// Units `path` depends on, dependencies first.
    ///
    /// Follows import and boot edges. Cycle members are left out. Returns
    /// `None` if `path` is unknown or is itself an error node.
    pub fn transitive_dependencies(&self, path: &NormalizedPath) -> Option<Vec<NormalizedPath>> {
        let start = self.id_of(path)?;
        if self.status[start.index()].is_error() {
            return None;
        }

        let n = self.path_ids.len();
        let mut seen = vec![false; n];
        let mut stack = vec![start.index()];
        seen[start.index()] = true;
        while let Some(v) = stack.pop() {
            for w in self.successors(v) {
                if !seen[w] {
                    seen[w] = true;
                    stack.push(w);
                }
            }
        }

        let mut reached: Vec<(usize, usize)> = (0..n)
            .filter(|&i| seen[i] && i != start.index())
            .filter_map(|i| self.position[i].map(|p| (p, i)))
            .collect();
        reached.sort_unstable();

        Some(
            reached
                .into_iter()
                .filter_map(|(_, i)| self.path_ids.location(FilePathId(i as u32)))
                .map(|location| location.path.clone())
                .collect(),
        )
    }

    /// Every unit discovered from the pass roots, in id order.
    pub fn reachable_modules(&self) -> Vec<NormalizedPath> {
        self.path_ids
            .locations()
            .iter()
            .map(|location| location.path.clone())
            .collect()
    }

    /// Units that import `path` directly.
    pub fn importers_of(&self, path: &NormalizedPath) -> Vec<NormalizedPath> {
        let Some(target) = self.id_of(path) else {
            return Vec::new();
        };
        self.imports
            .iter()
            .enumerate()
            .filter(|(_, unit)| unit.imports().iter().any(|i| i.local() == Some(target)))
            .filter_map(|(i, _)| self.path_ids.location(FilePathId(i as u32)))
            .map(|location| location.path.clone())
            .collect()
    }

    /// Boot unit of a real unit, if both were discovered.
    pub fn boot_of(&self, path: &NormalizedPath) -> Option<&NormalizedPath> {
        let id = self.id_of(path)?;
        let boot = self.boot_map.get(&id)?;
        self.path_ids.location(*boot).map(|location| &location.path)
    }

    /// Non-cycle units, dependencies first.
    pub fn topological_order(&self) -> Vec<NormalizedPath> {
        self.order
            .iter()
            .filter_map(|id| self.path_ids.location(*id))
            .map(|location| location.path.clone())
            .collect()
    }

    fn successors(&self, v: usize) -> impl Iterator<Item = usize> + '_ {
        let imports = self
            .imports
            .get(v)
            .map(UnitImports::imports)
            .unwrap_or(&[])
            .iter()
            .filter_map(|import| import.local())
            .map(|id| id.index());
        let boot = self.boot_map.get(&FilePathId(v as u32)).map(|id| id.index());
        imports.chain(boot)
    }
}

/// Import and boot successors per node.
fn successor_lists(raw: &RawDependencyInformation) -> Vec<Vec<usize>> {
    let n = raw.len();
    let mut successors: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (v, unit) in raw.imports.iter().enumerate().take(n) {
        for import in unit.imports() {
            if let Some(id) = import.local() {
                successors[v].push(id.index());
            }
        }
    }
    for (real, boot) in &raw.boot_map {
        if real.index() < n {
            successors[real.index()].push(boot.index());
        }
    }
    for list in &mut successors {
        list.retain(|&w| w < n);
        list.sort_unstable();
        list.dedup();
    }
    successors
}

/// Depth-first postorder over non-excluded nodes, roots in id order.
fn postorder(successors: &[Vec<usize>], excluded: &[bool]) -> Vec<usize> {
    let n = successors.len();
    let mut visited = vec![false; n];
    let mut order = Vec::with_capacity(n);
    let mut frames: Vec<(usize, usize)> = Vec::new();

    for root in 0..n {
        if excluded[root] || visited[root] {
            continue;
        }
        visited[root] = true;
        frames.push((root, 0));

        while let Some(frame) = frames.last_mut() {
            let v = frame.0;
            if frame.1 < successors[v].len() {
                let w = successors[v][frame.1];
                frame.1 += 1;
                if !excluded[w] && !visited[w] {
                    visited[w] = true;
                    frames.push((w, 0));
                }
                continue;
            }
            order.push(v);
            frames.pop();
        }
    }
    order
}
