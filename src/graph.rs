//! Component B: the call-graph builder.
//!
//! Produces the directed call graph restricted to compiled source files,
//! as an index-based CSR graph rather than a `HashMap<Node, HashSet<Node>>`
//! (see the re-architecture note in SPEC_FULL.md §9). Optionally prunes
//! `static` functions unreachable from any `global` function.
//!
//! Grounded on `examples/original_source/scripts/null-deref/preplan.py`
//! (`build_function_graph`, `prune_static_functions`).

use crate::ident::{FunctionId, FunctionTable};
use crate::project_map::{Linkage, ProjectMap, SourceFileInfo};
use fnv::{FnvHashMap, FnvHashSet};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A directed graph over `FunctionId`s stored in compressed-sparse-row
/// form: `starts[i]..starts[i + 1]` indexes into `edges` for node `i`.
#[derive(Debug, Clone, Default)]
pub struct Csr {
    starts: Vec<u32>,
    edges: Vec<FunctionId>,
}

impl Csr {
    fn build(n: usize, mut adjacency: Vec<Vec<FunctionId>>) -> Csr {
        adjacency.resize(n, Vec::new());
        let mut starts = Vec::with_capacity(n + 1);
        let mut edges = Vec::new();
        starts.push(0);
        for succs in &adjacency {
            edges.extend_from_slice(succs);
            starts.push(edges.len() as u32);
        }
        Csr { starts, edges }
    }

    pub fn successors(&self, node: FunctionId) -> &[FunctionId] {
        let i = node.index();
        let start = self.starts[i] as usize;
        let end = self.starts[i + 1] as usize;
        &self.edges[start..end]
    }

    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }
}

/// The call graph: forward and reverse adjacency over a shared
/// `FunctionTable`.
pub struct CallGraph {
    pub functions: FunctionTable,
    pub forward: Csr,
    pub reverse: Csr,
}

impl CallGraph {
    /// Builds the call graph restricted to compiled source files, and
    /// optionally prunes functions not reachable from any `global` function.
    pub fn build(km: &ProjectMap, prune_statics: bool) -> CallGraph {
        log::info!("building function graph");
        let mut functions = FunctionTable::new();
        let mut adjacency: FnvHashMap<FunctionId, Vec<FunctionId>> = FnvHashMap::default();
        let mut linkage: FnvHashMap<FunctionId, Linkage> = FnvHashMap::default();

        for (name, file, info) in km.iter_functions() {
            if !km.is_compiled(file) {
                continue;
            }
            let id = functions.get_or_insert(name, file);
            linkage.insert(id, info.linkage.unwrap_or(Linkage::Unknown));
            let succs = adjacency.entry(id).or_default();

            for (callee_name, callee_files) in &info.calls {
                for callee_file in callee_files {
                    if !km.is_compiled(callee_file) {
                        continue;
                    }
                    let callee_id = functions.get_or_insert(callee_name, callee_file);
                    succs.push(callee_id);
                }
            }
        }

        log::info!("function graph has {} nodes", functions.len());

        let (functions, adjacency) = if prune_statics {
            prune_static_functions(functions, adjacency, &linkage)
        } else {
            (functions, adjacency)
        };

        let n = functions.len();
        let forward_adj: Vec<Vec<FunctionId>> = (0..n)
            .map(|i| adjacency.get(&FunctionId(i as u32)).cloned().unwrap_or_default())
            .collect();

        let mut reverse_adj: Vec<Vec<FunctionId>> = vec![Vec::new(); n];
        for (caller, succs) in forward_adj.iter().enumerate() {
            for &callee in succs {
                reverse_adj[callee.index()].push(FunctionId(caller as u32));
            }
        }

        let forward = Csr::build(n, forward_adj);
        let reverse = Csr::build(n, reverse_adj);

        CallGraph {
            functions,
            forward,
            reverse,
        }
    }

    pub fn num_nodes(&self) -> usize {
        self.functions.len()
    }

    pub fn num_edges(&self) -> usize {
        self.forward.num_edges()
    }

    /// Serializes the pruned graph plus the candidate-object-file table the
    /// planner needs, so `plan --attempts N` can rerun without re-parsing
    /// the (often multi-megabyte) project map, per `SPEC_FULL.md` §6's
    /// `preplan` artifact.
    pub fn to_preplan(&self, km: &ProjectMap) -> Preplan {
        let functions = self
            .functions
            .iter()
            .map(|id| PreplanFunction {
                name: self.functions.name(id).to_string(),
                source_file: self.functions.source_file(id).to_string(),
            })
            .collect();

        let edges = (0..self.num_nodes())
            .map(|i| self.forward.successors(FunctionId(i as u32)).iter().map(|f| f.0).collect())
            .collect();

        let mut source_files = BTreeMap::new();
        for id in self.functions.iter() {
            let file = self.functions.source_file(id);
            source_files
                .entry(file.to_string())
                .or_insert_with(|| km.candidate_object_files(file).to_vec());
        }

        Preplan { functions, edges, source_files }
    }

    /// Reconstructs a `CallGraph` from a `Preplan`, e.g. one loaded back
    /// from disk by the `plan` subcommand.
    pub fn from_preplan(preplan: &Preplan) -> CallGraph {
        let mut functions = FunctionTable::new();
        for node in &preplan.functions {
            functions.get_or_insert(&node.name, &node.source_file);
        }

        let n = functions.len();
        let forward_adj: Vec<Vec<FunctionId>> =
            preplan.edges.iter().map(|succs| succs.iter().map(|&i| FunctionId(i)).collect()).collect();

        let mut reverse_adj: Vec<Vec<FunctionId>> = vec![Vec::new(); n];
        for (caller, succs) in forward_adj.iter().enumerate() {
            for &callee in succs {
                reverse_adj[callee.index()].push(FunctionId(caller as u32));
            }
        }

        let forward = Csr::build(n, forward_adj);
        let reverse = Csr::build(n, reverse_adj);

        CallGraph { functions, forward, reverse }
    }
}

/// One node of a serialized `Preplan`: a function's identity, by position
/// (the position is its `FunctionId`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreplanFunction {
    pub name: String,
    #[serde(rename = "source file")]
    pub source_file: String,
}

/// The on-disk form of a pruned call graph, plus the candidate
/// object-file table for each source file it references — enough to
/// reconstruct both the graph and a minimal `ProjectMap` for unit
/// assignment without re-parsing the full project map.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Preplan {
    pub functions: Vec<PreplanFunction>,
    pub edges: Vec<Vec<u32>>,
    #[serde(rename = "source files")]
    pub source_files: BTreeMap<String, Vec<String>>,
}

impl Preplan {
    pub fn load(path: &std::path::Path) -> Result<Preplan, crate::error::MapError> {
        let text = std::fs::read_to_string(path)
            .map_err(|source| crate::error::MapError::Io { path: path.to_path_buf(), source })?;
        serde_json::from_str(&text).map_err(|source| crate::error::MapError::Json { path: path.to_path_buf(), source })
    }

    pub fn save(&self, path: &std::path::Path) -> Result<(), crate::error::MapError> {
        log::info!("saving preplan to {}", path.display());
        let text = serde_json::to_string_pretty(self)
            .map_err(|source| crate::error::MapError::Json { path: path.to_path_buf(), source })?;
        std::fs::write(path, text).map_err(|source| crate::error::MapError::Io { path: path.to_path_buf(), source })
    }

    /// Builds a minimal `ProjectMap` carrying only the `source files`
    /// candidate-object-file table — sufficient for `unit_assign::assign`,
    /// which never reads `functions` or `object files` directly.
    pub fn to_project_map(&self) -> ProjectMap {
        ProjectMap {
            functions: BTreeMap::new(),
            source_files: self
                .source_files
                .iter()
                .map(|(file, compiled_to)| (file.clone(), SourceFileInfo { compiled_to: compiled_to.clone() }))
                .collect(),
            object_files: BTreeMap::new(),
        }
    }
}

/// Forward reachability from all `global` nodes, keeping only reached
/// nodes and their induced edges. Renumbers `FunctionId`s to stay dense.
fn prune_static_functions(
    functions: FunctionTable,
    adjacency: FnvHashMap<FunctionId, Vec<FunctionId>>,
    linkage: &FnvHashMap<FunctionId, Linkage>,
) -> (FunctionTable, FnvHashMap<FunctionId, Vec<FunctionId>>) {
    log::info!("pruning static functions not called by global functions");

    let mut marked: FnvHashSet<FunctionId> = FnvHashSet::default();
    let mut stack = Vec::new();

    for id in functions.iter() {
        if linkage.get(&id) == Some(&Linkage::Global) {
            stack.push(id);
        }
    }

    while let Some(node) = stack.pop() {
        if !marked.insert(node) {
            continue;
        }
        if let Some(succs) = adjacency.get(&node) {
            for &succ in succs {
                if !marked.contains(&succ) {
                    stack.push(succ);
                }
            }
        }
    }

    let mut new_functions = FunctionTable::new();
    let mut remap: FnvHashMap<FunctionId, FunctionId> = FnvHashMap::default();

    for id in functions.iter() {
        if marked.contains(&id) {
            let new_id = new_functions.get_or_insert(functions.name(id), functions.source_file(id));
            remap.insert(id, new_id);
        }
    }

    let mut new_adjacency: FnvHashMap<FunctionId, Vec<FunctionId>> = FnvHashMap::default();
    for id in functions.iter() {
        if let Some(&new_id) = remap.get(&id) {
            let succs = adjacency
                .get(&id)
                .into_iter()
                .flatten()
                .filter_map(|callee| remap.get(callee).copied())
                .collect();
            new_adjacency.insert(new_id, succs);
        }
    }

    log::info!("pruned function graph has {} nodes", new_functions.len());
    (new_functions, new_adjacency)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn km_with_cycle() -> ProjectMap {
        let json = r#"
        {
            "functions": {
                "f1": {"a.c": {"calls": {"f2": ["a.c"]}, "type": "global"}},
                "f2": {"a.c": {"calls": {"f1": ["a.c"]}, "type": "global"}}
            },
            "source files": {"a.c": {"compiled to": ["a.o"]}},
            "object files": {"a.o": {"compiled from": ["a.c"]}}
        }"#;
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn self_edges_and_cycles_are_preserved() {
        let km = km_with_cycle();
        let graph = CallGraph::build(&km, false);
        assert_eq!(graph.num_nodes(), 2);
        assert_eq!(graph.num_edges(), 2);
    }

    #[test]
    fn pruning_drops_unreachable_statics() {
        let json = r#"
        {
            "functions": {
                "f1": {"a.c": {"type": "global"}},
                "dead": {"a.c": {"type": "static"}}
            },
            "source files": {"a.c": {"compiled to": ["a.o"]}},
            "object files": {"a.o": {"compiled from": ["a.c"]}}
        }"#;
        let km: ProjectMap = serde_json::from_str(json).unwrap();
        let graph = CallGraph::build(&km, true);
        assert_eq!(graph.num_nodes(), 1);
        assert_eq!(graph.functions.name(FunctionId(0)), "f1");
    }

    #[test]
    fn uncompiled_source_files_are_invisible() {
        let json = r#"
        {
            "functions": {"f1": {"a.c": {}}},
            "source files": {"a.c": {}},
            "object files": {}
        }"#;
        let km: ProjectMap = serde_json::from_str(json).unwrap();
        let graph = CallGraph::build(&km, false);
        assert_eq!(graph.num_nodes(), 0);
    }

    #[test]
    fn preplan_round_trips_nodes_and_edges() {
        let km = km_with_cycle();
        let graph = CallGraph::build(&km, false);
        let preplan = graph.to_preplan(&km);
        assert_eq!(preplan.functions.len(), 2);
        assert_eq!(preplan.source_files["a.c"], vec!["a.o".to_string()]);

        let rebuilt = CallGraph::from_preplan(&preplan);
        assert_eq!(rebuilt.num_nodes(), graph.num_nodes());
        assert_eq!(rebuilt.num_edges(), graph.num_edges());

        let reconstructed_map = preplan.to_project_map();
        assert_eq!(reconstructed_map.candidate_object_files("a.c"), &["a.o".to_string()]);
    }
}
