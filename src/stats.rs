//! Component K: stats reporting.
//!
//! Grounded on `examples/original_source/scripts/null-deref/stats.py`
//! (`get_plan_stats`, `get_annotations_stats`, `main`): the same summary
//! lines, in the same order, logged at `info` level instead of printed.
//! Unlike the source, the annotation database here is keyed by source file
//! rather than carrying a redundant `"object file"` field per record, so
//! object files are resolved by walking the plan (`codec::object_file_index`)
//! instead of guessing a source file's first project-map candidate.

use crate::codec::{AnnotationDatabase, ParamView};
use crate::plan::Plan;
use crate::project_map::ProjectMap;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Default)]
pub struct PlanStats {
    pub object_files: BTreeSet<String>,
    pub functions: usize,
    pub dependencies: usize,
}

pub fn plan_stats(plan: &Plan) -> PlanStats {
    let mut stats = PlanStats::default();
    for unit in &plan.units {
        stats.object_files.insert(unit.object_file.clone());
        stats.functions += unit.functions.len();
        stats.dependencies += unit.functions.iter().map(|f| f.called_functions.len()).sum::<usize>();
    }
    stats
}

#[derive(Debug, Default)]
pub struct AnnotationStats {
    pub object_files: BTreeSet<String>,
    pub functions: usize,
    pub functions_with_pointers: BTreeSet<(String, String)>,
    pub functions_returning_pointers: BTreeSet<(String, String)>,
    pub parameters: usize,
    pub pointers: usize,
    pub may_not_return_null: usize,
    pub no_deref: usize,
    pub may_deref: usize,
    pub must_deref: usize,
}

pub fn annotation_stats(
    object_files: &BTreeMap<(String, String), String>,
    annotations: &AnnotationDatabase,
) -> AnnotationStats {
    let mut stats = AnnotationStats::default();

    for (name, source_files) in annotations {
        for (source_file, record) in source_files {
            stats.functions += 1;
            if let Some(object_file) = object_files.get(&(name.clone(), source_file.clone())) {
                stats.object_files.insert(object_file.clone());
            }

            if record.returns_pointer {
                stats.functions_returning_pointers.insert((name.clone(), source_file.clone()));
                if record.may_return_null != Some(true) {
                    stats.may_not_return_null += 1;
                }
            }

            for param in &record.params {
                stats.parameters += 1;
                if let ParamView::Pointer { may_deref, must_deref } = param.view() {
                    stats.pointers += 1;
                    stats.functions_with_pointers.insert((name.clone(), source_file.clone()));
                    if must_deref {
                        stats.must_deref += 1;
                    } else if may_deref {
                        stats.may_deref += 1;
                    } else {
                        stats.no_deref += 1;
                    }
                }
            }
        }
    }

    stats
}

/// Logs the full stats report, per `main`'s sequence of `print` calls.
pub fn report(plan: &Plan, km: &ProjectMap, annotations: &AnnotationDatabase) {
    let plan_stats = plan_stats(plan);
    let object_files = crate::codec::object_file_index(km, plan);
    let annotation_stats = annotation_stats(&object_files, annotations);

    log::info!(
        "analysed {} functions in {} files out of {} functions in {} files",
        annotation_stats.functions,
        annotation_stats.object_files.len(),
        plan_stats.functions,
        plan_stats.object_files.len(),
    );
    log::info!("{} functions have pointer parameters", annotation_stats.functions_with_pointers.len());
    log::info!("{} functions return a pointer", annotation_stats.functions_returning_pointers.len());

    if plan_stats.object_files.is_empty() {
        log::info!("plan has no object files");
        return;
    }
    log::info!(
        "average number of functions in a file: {:.2}",
        plan_stats.functions as f64 / plan_stats.object_files.len() as f64
    );

    let mut by_size: Vec<&crate::plan::UnitPlan> = plan.units.iter().collect();
    by_size.sort_by_key(|u| std::cmp::Reverse(u.functions.len()));

    let median_index = by_size.len() / 2;
    if let Some(median_unit) = by_size.get(median_index) {
        log::info!("median number of functions in a file: {}", median_unit.functions.len());
    }

    let top_ten: Vec<&&crate::plan::UnitPlan> = by_size.iter().take(10).collect();
    let top_ten_total: usize = top_ten.iter().map(|u| u.functions.len()).sum();
    log::info!("10 largest files contain {top_ten_total} functions");
    for unit in &top_ten {
        log::info!("  {} - {} functions", unit.object_file, unit.functions.len());
    }

    log::info!("total number of dependencies in plan: {}", plan_stats.dependencies);

    log::info!(
        "{} out of {} returned pointers may not be NULL",
        annotation_stats.may_not_return_null,
        annotation_stats.functions_returning_pointers.len()
    );
    log::info!("{} out of {} parameters are pointers", annotation_stats.pointers, annotation_stats.parameters);
    log::info!("{} pointer parameters always cause NULL dereference when NULL", annotation_stats.must_deref);
    log::info!("{} pointer parameters may cause NULL dereference when NULL", annotation_stats.may_deref);
    log::info!("{} pointer parameters can not cause NULL dereference when NULL", annotation_stats.no_deref);

    let bad_files: Vec<&String> = plan_stats.object_files.difference(&annotation_stats.object_files).collect();
    if !bad_files.is_empty() {
        log::info!("files that could not be analysed:");
        let mut num_functions: std::collections::BTreeMap<&str, usize> = std::collections::BTreeMap::new();
        for unit in &plan.units {
            num_functions.insert(unit.object_file.as_str(), unit.functions.len());
        }
        let mut sorted_bad = bad_files;
        sorted_bad.sort_by_key(|f| std::cmp::Reverse(num_functions.get(f.as_str()).copied().unwrap_or(0)));
        for file in sorted_bad {
            log::info!("  {} - {} functions", file, num_functions.get(file.as_str()).copied().unwrap_or(0));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{AnnotationRecord, Param};
    use crate::plan::{CalledFunction, PlanFunction, UnitPlan};
    use std::collections::BTreeMap;

    fn sample_plan() -> Plan {
        Plan {
            units: vec![UnitPlan {
                object_file: "a.o".to_string(),
                functions: vec![PlanFunction {
                    name: "f".to_string(),
                    called_functions: vec![CalledFunction { name: "g".to_string(), object_file: "a.o".to_string() }],
                }],
            }],
        }
    }

    #[test]
    fn plan_stats_counts_files_functions_and_dependencies() {
        let stats = plan_stats(&sample_plan());
        assert_eq!(stats.object_files.len(), 1);
        assert_eq!(stats.functions, 1);
        assert_eq!(stats.dependencies, 1);
    }

    #[test]
    fn annotation_stats_tallies_deref_categories() {
        let record = AnnotationRecord {
            signature: "void f(int *p, int *q)".to_string(),
            params: vec![Param::pointer("p", true, true), Param::pointer("q", false, false)],
            returns_pointer: false,
            returns_signed: false,
            may_return_null: None,
            may_return_errptr: None,
            may_return_negative: None,
            may_return_positive: None,
        };
        let mut files = BTreeMap::new();
        files.insert("a.c".to_string(), record);
        let mut db = AnnotationDatabase::new();
        db.insert("f".to_string(), files);

        let km: ProjectMap = serde_json::from_str(
            r#"{"functions": {"f": {"a.c": {}}}, "source files": {"a.c": {"compiled to": ["a.o"]}}, "object files": {"a.o": {"compiled from": ["a.c"]}}}"#,
        )
        .unwrap();
        let plan = sample_plan();
        let object_files = crate::codec::object_file_index(&km, &plan);

        let stats = annotation_stats(&object_files, &db);
        assert_eq!(stats.must_deref, 1);
        assert_eq!(stats.no_deref, 1);
        assert_eq!(stats.pointers, 2);
        assert_eq!(stats.object_files.len(), 1);
    }
}
