//! Component E: the plan emitter, plus the `Plan` data model of SPEC_FULL.md
//! §3/§6 and the top-level `build_plan` entry point that ties components
//! B, C, D together and chooses the best of several randomized attempts.
//!
//! Grounded on `examples/original_source/scripts/null-deref/plan.py`
//! (`order_functions_within_object_files`, `assemble_plan`, `make_plan`,
//! `save_plan`; unit assignment itself is `unit_assign.rs`).

use crate::executor::Executor;
use crate::graph::CallGraph;
use crate::ident::{FunctionId, Sym};
use crate::project_map::ProjectMap;
use crate::unit_assign::{self, UnitAssignment};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CalledFunction {
    pub name: String,
    #[serde(rename = "object file")]
    pub object_file: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlanFunction {
    pub name: String,
    #[serde(rename = "called functions")]
    pub called_functions: Vec<CalledFunction>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UnitPlan {
    #[serde(rename = "object file")]
    pub object_file: String,
    pub functions: Vec<PlanFunction>,
}

/// An ordered sequence of unit records; see SPEC_FULL.md §3 "Plan".
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct Plan {
    pub units: Vec<UnitPlan>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlanStats {
    pub dropped: usize,
    pub calls: usize,
    #[serde(rename = "object files")]
    pub object_files: usize,
    pub functions: usize,
}

impl Plan {
    pub fn load(path: &Path) -> Result<Plan, crate::error::MapError> {
        let text = std::fs::read_to_string(path).map_err(|source| crate::error::MapError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let units: Vec<UnitPlan> =
            serde_json::from_str(&text).map_err(|source| crate::error::MapError::Json {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Plan { units })
    }

    pub fn save(&self, path: &Path) -> Result<(), crate::error::MapError> {
        log::info!("saving plan to {}", path.display());
        let text =
            serde_json::to_string_pretty(&self.units).map_err(|source| crate::error::MapError::Json {
                path: path.to_path_buf(),
                source,
            })?;
        std::fs::write(path, text).map_err(|source| crate::error::MapError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn num_functions(&self) -> usize {
        self.units.iter().map(|u| u.functions.len()).sum()
    }
}

/// Orders the functions within a single unit, using the within-unit reverse
/// call graph (callee→caller edges), exactly as
/// `order_functions_within_object_files` does: a function is emitted only
/// after everything it calls within the same unit.
fn order_unit_functions(graph: &CallGraph, members: &[FunctionId], seed: u64) -> Vec<FunctionId> {
    use std::collections::HashMap;
    let local_index: HashMap<FunctionId, usize> =
        members.iter().enumerate().map(|(i, &f)| (f, i)).collect();

    let successors = |i: usize| -> Vec<usize> {
        let f = members[i];
        graph
            .reverse
            .successors(f)
            .iter()
            .filter_map(|caller| local_index.get(caller).copied())
            .collect()
    };

    let local_order = crate::toposort::reverse_postorder(members.len(), successors, seed);
    local_order.into_iter().map(|i| members[i]).collect()
}

/// Runs components C, D and E once for a given seed, returning the
/// assembled plan and its quality statistics.
pub fn make_plan(graph: &CallGraph, km: &ProjectMap, seed: u64) -> (Plan, PlanStats) {
    let assignment: UnitAssignment = unit_assign::assign(graph, km, seed);
    let num_units = assignment.object_files.len();

    log::info!("ordering object files");
    let unit_order = crate::toposort::reverse_postorder(
        num_units,
        |i| {
            assignment
                .dependents
                .get(&Sym::from_index(i))
                .map(|set| set.iter().map(|s| s.index()).collect())
                .unwrap_or_default()
        },
        seed,
    );

    log::info!("ordering functions within each object file");
    let mut members_by_unit: Vec<Vec<FunctionId>> = vec![Vec::new(); num_units];
    for (idx, &unit) in assignment.function_to_unit.iter().enumerate() {
        members_by_unit[unit.index()].push(FunctionId(idx as u32));
    }

    let unit_function_order: Vec<Vec<FunctionId>> = members_by_unit
        .iter()
        .map(|members| order_unit_functions(graph, members, seed))
        .collect();

    log::info!("assembling plan");
    let mut units = Vec::with_capacity(num_units);
    let mut processed = vec![false; graph.num_nodes()];
    let mut dropped = 0usize;
    let mut calls = 0usize;

    for &unit_index in &unit_order {
        let object_file = assignment.object_files.resolve(Sym::from_index(unit_index)).to_string();
        let mut functions = Vec::with_capacity(unit_function_order[unit_index].len());

        for &fid in &unit_function_order[unit_index] {
            let mut called_functions = Vec::new();
            for &callee in graph.forward.successors(fid) {
                calls += 1;
                if processed[callee.index()] {
                    let callee_unit = assignment.function_to_unit[callee.index()];
                    called_functions.push(CalledFunction {
                        name: graph.functions.name(callee).to_string(),
                        object_file: assignment.object_files.resolve(callee_unit).to_string(),
                    });
                } else {
                    dropped += 1;
                }
            }
            functions.push(PlanFunction {
                name: graph.functions.name(fid).to_string(),
                called_functions,
            });
            processed[fid.index()] = true;
        }

        units.push(UnitPlan { object_file, functions });
    }

    let stats = PlanStats {
        dropped,
        calls,
        object_files: num_units,
        functions: graph.num_nodes(),
    };

    log::info!(
        "plan assembled: {} units, {} functions, {}/{} calls dropped",
        num_units,
        stats.functions,
        dropped,
        calls
    );

    (Plan { units }, stats)
}

/// Tries `attempts` independently seeded plans concurrently on the shared
/// worker pool and keeps the one with the fewest dropped calls, matching the
/// `--attempts` loop in the source `plan.py` `main()`.
pub fn build_plan(graph: Arc<CallGraph>, km: Arc<ProjectMap>, attempts: usize, base_seed: u64) -> (Plan, PlanStats) {
    let attempts = attempts.max(1);

    if attempts == 1 {
        return make_plan(&graph, &km, base_seed);
    }

    let executor = Executor::new(attempts);
    let promises: Vec<_> = (0..attempts)
        .map(|attempt| {
            let seed = base_seed.wrapping_add(attempt as u64);
            let graph = graph.clone();
            let km = km.clone();
            executor.exec(1, move || make_plan(&graph, &km, seed))
        })
        .collect();

    let mut results: Vec<(Plan, PlanStats)> = promises.into_iter().map(|p| p.wait()).collect();
    results.sort_by_key(|(_, stats)| stats.dropped);
    log::info!(
        "kept best of {} attempts: {} calls dropped",
        attempts,
        results[0].1.dropped
    );
    results.remove(0)
}
