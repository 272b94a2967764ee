//! Component I: the incremental fixpoint controller.
//!
//! No direct original-source equivalent — `run.py` drives the analyzer
//! exactly once over the whole plan. `SPEC_FULL.md` §4.I generalizes that
//! single pass into a generation loop that re-analyses only the functions
//! whose callees changed, with an append-only changelog making the whole
//! thing resumable after a crash or timeout.

use crate::driver::{self, DriverConfig, Outcome};
use crate::error::DriverError;
use crate::plan::{Plan, UnitPlan};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write as _};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// A function's status as of the most recently completed generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Unknown,
    New,
    Stale,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangelogRecord {
    #[serde(rename = "gen")]
    pub generation: u32,
    #[serde(rename = "file index")]
    pub unit_index: usize,
    #[serde(rename = "object file")]
    pub object_file: String,
    pub functions: BTreeMap<String, Status>,
    pub skipped: bool,
}

/// Per-function status, keyed the same way the plan keys functions: by
/// `(unit_index, name)` since a function record only carries its own name
/// within a unit and statuses don't need to cross unit boundaries to be
/// looked up by callers (the plan's "surviving calls" already name the
/// callee's unit).
#[derive(Debug, Default)]
pub struct GenerationState {
    pub generation: u32,
    pub resume_unit_index: usize,
    status: BTreeMap<(usize, String), Status>,
}

impl GenerationState {
    fn status_of(&self, unit_index: usize, name: &str) -> Status {
        self.status.get(&(unit_index, name.to_string())).copied().unwrap_or(Status::Unknown)
    }

    fn set_status(&mut self, unit_index: usize, name: &str, status: Status) {
        self.status.insert((unit_index, name.to_string()), status);
    }

    /// Tallies how many functions ended up in each status, for the
    /// end-of-run summary line required by `SPEC_FULL.md` §7.
    pub fn status_counts(&self) -> BTreeMap<Status, usize> {
        let mut counts = BTreeMap::new();
        for &status in self.status.values() {
            *counts.entry(status).or_insert(0) += 1;
        }
        counts
    }
}

/// Per-unit outcome tally for the end-of-run summary line required by
/// `SPEC_FULL.md` §7, plus the total elapsed wall-clock time of the run.
#[derive(Debug, Default, Clone, Copy)]
pub struct OutcomeTally {
    pub successes: usize,
    pub skipped: usize,
    pub failures: usize,
    pub errors: usize,
    pub timeouts: usize,
}

/// Reads the changelog and reconstructs `GenerationState` by replaying every
/// record in order; the last record determines the resume point.
pub fn load_changelog(path: &Path) -> Result<GenerationState, DriverError> {
    let mut state = GenerationState::default();
    if !path.exists() {
        return Ok(state);
    }

    let file = std::fs::File::open(path).map_err(|source| DriverError::Io { path: path.to_path_buf(), source })?;
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|source| DriverError::Io { path: path.to_path_buf(), source })?;
        if line.trim().is_empty() {
            continue;
        }
        let record: ChangelogRecord = serde_json::from_str(&line)
            .map_err(|_| DriverError::Io { path: path.to_path_buf(), source: std::io::Error::new(std::io::ErrorKind::InvalidData, "malformed changelog line") })?;
        for (name, status) in &record.functions {
            state.set_status(record.unit_index, name, *status);
        }
        state.generation = record.generation;
        state.resume_unit_index = record.unit_index + 1;
    }
    Ok(state)
}

fn append_changelog(path: &Path, record: &ChangelogRecord) -> Result<(), DriverError> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| DriverError::Io { path: path.to_path_buf(), source })?;
    let line = serde_json::to_string(record).expect("changelog record always serializes");
    writeln!(file, "{line}").map_err(|source| DriverError::Io { path: path.to_path_buf(), source })?;
    file.flush().map_err(|source| DriverError::Io { path: path.to_path_buf(), source })
}

/// Builds the filtered unit-plan view containing only the selected
/// functions, preserving their relative order, per `SPEC_FULL.md` §4.I
/// step 3.
fn build_unit_plan_view(unit: &UnitPlan, selected: &[String]) -> UnitPlan {
    let selected: std::collections::HashSet<&str> = selected.iter().map(String::as_str).collect();
    UnitPlan {
        object_file: unit.object_file.clone(),
        functions: unit
            .functions
            .iter()
            .filter(|f| selected.contains(f.name.as_str()))
            .cloned()
            .collect(),
    }
}

/// Runs the controller to completion: generations `1..=max_generations`, or
/// until a whole generation selects nothing anywhere in the plan.
pub fn run(
    plan: &Plan,
    driver_config: &DriverConfig,
    changelog_path: &Path,
    max_generations: u32,
    resume_from: Option<usize>,
) -> Result<(GenerationState, OutcomeTally, Duration), DriverError> {
    let run_start = Instant::now();
    let mut tally = OutcomeTally::default();
    let mut state = load_changelog(changelog_path)?;
    let mut object_file_to_index: BTreeMap<&str, usize> = BTreeMap::new();
    for (i, unit) in plan.units.iter().enumerate() {
        object_file_to_index.insert(unit.object_file.as_str(), i);
    }

    let start_generation = if state.generation == 0 { 1 } else { state.generation };
    let start_unit = resume_from.unwrap_or(state.resume_unit_index);

    for generation in start_generation..=max_generations {
        log::info!("starting generation {generation}");
        let mut any_new = false;
        let first_unit = if generation == start_generation { start_unit } else { 0 };

        for (unit_index, unit) in plan.units.iter().enumerate() {
            if unit_index < first_unit {
                continue;
            }

            let selected = select_with_cross_unit_lookup(plan, &object_file_to_index, unit_index, &state);

            if selected.is_empty() {
                tally.skipped += 1;
                append_changelog(
                    changelog_path,
                    &ChangelogRecord {
                        generation,
                        unit_index,
                        object_file: unit.object_file.clone(),
                        functions: BTreeMap::new(),
                        skipped: true,
                    },
                )?;
                continue;
            }

            let view = build_unit_plan_view(unit, &selected);
            let plan_path = PathBuf::from(format!("object_file_plan_{unit_index}.txt"));
            let result = driver::invoke(&view, &plan_path, driver_config)?;
            match result.outcome {
                Outcome::Success => tally.successes += 1,
                Outcome::Failure => tally.failures += 1,
                Outcome::Error => tally.errors += 1,
                Outcome::TimedOut => tally.timeouts += 1,
            }

            let mut statuses = BTreeMap::new();
            for name in &selected {
                let status = classify_function(&result.outcome, driver_config, &unit.object_file, name);
                state.set_status(unit_index, name, status);
                if status == Status::New {
                    any_new = true;
                }
                statuses.insert((*name).to_string(), status);
            }

            append_changelog(
                changelog_path,
                &ChangelogRecord {
                    generation,
                    unit_index,
                    object_file: unit.object_file.clone(),
                    functions: statuses,
                    skipped: false,
                },
            )?;
        }

        state.generation = generation;
        if !any_new {
            log::info!("fixpoint reached at generation {generation}");
            break;
        }
    }

    Ok((state, tally, run_start.elapsed()))
}

fn select_with_cross_unit_lookup(
    plan: &Plan,
    object_file_to_index: &BTreeMap<&str, usize>,
    unit_index: usize,
    state: &GenerationState,
) -> Vec<String> {
    let unit = &plan.units[unit_index];
    let mut selected = std::collections::HashSet::new();

    for function in &unit.functions {
        let status = state.status_of(unit_index, &function.name);
        if matches!(status, Status::Unknown | Status::Error) {
            selected.insert(function.name.clone());
            continue;
        }
        for called in &function.called_functions {
            if let Some(&callee_unit) = object_file_to_index.get(called.object_file.as_str()) {
                if state.status_of(callee_unit, &called.name) == Status::New {
                    selected.insert(function.name.clone());
                    break;
                }
            }
        }
    }

    let mut changed = true;
    while changed {
        changed = false;
        for function in &unit.functions {
            if selected.contains(&function.name) {
                continue;
            }
            for called in &function.called_functions {
                if called.object_file == unit.object_file && selected.contains(&called.name) {
                    selected.insert(function.name.clone());
                    changed = true;
                    break;
                }
            }
        }
    }

    unit.functions
        .iter()
        .map(|f| f.name.clone())
        .filter(|name| selected.contains(name))
        .collect()
}

/// Compares the freshly written annotation file against the previous
/// generation's, byte-for-byte, to classify a selected function's status.
fn classify_function(outcome: &Outcome, config: &DriverConfig, object_file: &str, name: &str) -> Status {
    if matches!(outcome, Outcome::TimedOut | Outcome::Error) {
        return Status::Error;
    }

    let new_path = config.write_annotations_dir.join(object_file).join("functions").join(format!("{name}.txt"));
    let old_path = config.read_annotations_dir.join(object_file).join("functions").join(format!("{name}.txt"));

    let Ok(new_bytes) = std::fs::read(&new_path) else {
        return Status::Error;
    };

    match std::fs::read(&old_path) {
        Ok(old_bytes) if old_bytes == new_bytes => Status::Stale,
        _ => {
            let dest_dir = old_path.parent().unwrap();
            let _ = std::fs::create_dir_all(dest_dir);
            let _ = std::fs::rename(&new_path, &old_path);
            Status::New
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resume_point_is_the_record_after_the_last_completed_unit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("changelog.jsonl");
        append_changelog(
            &path,
            &ChangelogRecord { generation: 1, unit_index: 0, object_file: "a.o".to_string(), functions: BTreeMap::new(), skipped: true },
        )
        .unwrap();
        append_changelog(
            &path,
            &ChangelogRecord {
                generation: 1,
                unit_index: 1,
                object_file: "b.o".to_string(),
                functions: [("f".to_string(), Status::New)].into_iter().collect(),
                skipped: false,
            },
        )
        .unwrap();

        let state = load_changelog(&path).unwrap();
        assert_eq!(state.generation, 1);
        assert_eq!(state.resume_unit_index, 2);
        assert_eq!(state.status_of(1, "f"), Status::New);
        assert_eq!(state.status_counts().get(&Status::New), Some(&1));
    }

    #[test]
    fn missing_changelog_yields_a_fresh_state() {
        let state = load_changelog(Path::new("/nonexistent/changelog.jsonl")).unwrap();
        assert_eq!(state.generation, 0);
        assert_eq!(state.resume_unit_index, 0);
    }
}
