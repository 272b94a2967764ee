//! Component C: the unit assigner.
//!
//! Assigns each function to exactly one candidate object file, trying to
//! minimize the cross-unit edges that later cause cycles to be dropped.
//! Grounded on `examples/original_source/scripts/null-deref/plan.py`
//! (`assign_functions_to_object_files`), combining that module's dependency-
//! count minimization with the size-heavy bucketing tie-break from the
//! repository's other `plan.py` copy, per SPEC_FULL.md §4.C.

use crate::graph::CallGraph;
use crate::ident::{FunctionId, Interner, Sym};
use crate::project_map::ProjectMap;
use fnv::{FnvHashMap, FnvHashSet};
use std::path::Path;

const DEFAULT_EXECUTABLE_SENTINEL: &str = "a.out";

/// The result of unit assignment: a function→object-file map plus the
/// "depends on" adjacency needed to order units afterward (component D).
pub struct UnitAssignment {
    pub object_files: Interner,
    pub function_to_unit: Vec<Sym>,
    /// `dependents[u]` = the set of units that (transitively, as of the
    /// point they were recorded) depend on `u`. Used directly as the
    /// successor function for ordering units; see module docs.
    pub dependents: FnvHashMap<Sym, FnvHashSet<Sym>>,
}

fn filtered_candidates<'a>(candidates: &'a [String]) -> Vec<&'a str> {
    let filtered: Vec<&str> = candidates
        .iter()
        .map(String::as_str)
        .filter(|c| Path::new(c).file_name().and_then(|f| f.to_str()) != Some(DEFAULT_EXECUTABLE_SENTINEL))
        .collect();
    if filtered.is_empty() {
        candidates.iter().map(String::as_str).collect()
    } else {
        filtered
    }
}

/// Transitively collects the units depending on `start` into `out`,
/// following the `dependents` adjacency built so far.
fn collect_depending(
    dependents: &FnvHashMap<Sym, FnvHashSet<Sym>>,
    start: Sym,
    out: &mut FnvHashSet<Sym>,
) {
    let mut stack = vec![start];
    while let Some(unit) = stack.pop() {
        if !out.insert(unit) {
            continue;
        }
        if let Some(next) = dependents.get(&unit) {
            for &d in next {
                stack.push(d);
            }
        }
    }
}

pub fn assign(graph: &CallGraph, km: &ProjectMap, seed: u64) -> UnitAssignment {
    log::info!("assigning functions to object files");

    let n = graph.num_nodes();
    let order = crate::toposort::reverse_postorder(
        n,
        |i| {
            graph
                .reverse
                .successors(FunctionId(i as u32))
                .iter()
                .map(|id| id.index())
                .collect()
        },
        seed,
    );

    let mut object_files = Interner::new();
    let mut function_to_unit: Vec<Option<Sym>> = vec![None; n];
    let mut dependents: FnvHashMap<Sym, FnvHashSet<Sym>> = FnvHashMap::default();
    let mut unit_size: FnvHashMap<Sym, usize> = FnvHashMap::default();

    for v in order {
        let fid = FunctionId(v as u32);
        let source_file = graph.functions.source_file(fid);
        let candidates_owned = km.candidate_object_files(source_file).to_vec();
        let candidates = filtered_candidates(&candidates_owned);

        let immediate_callers: Vec<Sym> = graph
            .reverse
            .successors(fid)
            .iter()
            .filter_map(|&caller| function_to_unit[caller.index()])
            .collect();

        let mut depending_object_files: FnvHashSet<Sym> = FnvHashSet::default();
        for &caller_unit in &immediate_callers {
            collect_depending(&dependents, caller_unit, &mut depending_object_files);
        }

        let candidate_syms: Vec<Sym> = candidates.iter().map(|c| object_files.intern(c)).collect();

        let mut best_dep_num = usize::MAX;
        let mut best: Vec<(Sym, usize, &str)> = Vec::new();
        for (&sym, &path) in candidate_syms.iter().zip(candidates.iter()) {
            let dep_num = depending_object_files
                .iter()
                .filter(|&&depending| {
                    depending != sym
                        && dependents
                            .get(&depending)
                            .map(|set| set.contains(&sym))
                            .unwrap_or(false)
                })
                .count();
            if dep_num < best_dep_num {
                best_dep_num = dep_num;
                best.clear();
            }
            if dep_num == best_dep_num {
                let size = unit_size.get(&sym).copied().unwrap_or(0);
                best.push((sym, size, path));
            }
        }

        best.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.2.cmp(b.2)));
        let selected = best[0].0;

        let selected_dependents = dependents.entry(selected).or_default();
        for &caller_unit in &immediate_callers {
            selected_dependents.insert(caller_unit);
        }

        for &callee in graph.forward.successors(fid) {
            if let Some(callee_unit) = function_to_unit[callee.index()] {
                dependents.entry(callee_unit).or_default().insert(selected);
            }
        }

        function_to_unit[v] = Some(selected);
        *unit_size.entry(selected).or_insert(0) += 1;
    }

    log::info!(
        "assigned {} functions to {} object files",
        n,
        object_files.len()
    );

    UnitAssignment {
        object_files,
        function_to_unit: function_to_unit.into_iter().map(|u| u.unwrap()).collect(),
        dependents,
    }
}
