//! End-to-end scenarios from `SPEC_FULL.md` §8, run against the planner and
//! join components directly. The driver/fixpoint scenarios that require
//! invoking the external analyzer (S1, S5) are exercised at the level that
//! doesn't need a live subprocess: plan shape for S1, changelog resume
//! semantics for S5.

use nullderef_planner::codec::{AnnotationDatabase, AnnotationRecord, Param, ParamView};
use nullderef_planner::fixpoint::{load_changelog, ChangelogRecord, Status};
use nullderef_planner::graph::CallGraph;
use nullderef_planner::join::join;
use nullderef_planner::plan::make_plan;
use nullderef_planner::project_map::ProjectMap;
use std::collections::BTreeMap;

fn km(json: &str) -> ProjectMap {
    serde_json::from_str(json).unwrap()
}

/// S1 — two-function chain, single unit. The plan must order `f2` (the
/// callee) before `f1` (the caller) within `a.o`, and cover both nodes
/// exactly once (property 1).
#[test]
fn s1_two_function_chain_orders_callee_before_caller() {
    let map = km(
        r#"{
        "functions": {
            "f1": {"a.c": {"calls": {"f2": ["a.c"]}}},
            "f2": {"a.c": {}}
        },
        "source files": {"a.c": {"compiled to": ["a.o"]}},
        "object files": {"a.o": {"compiled from": ["a.c"]}}
    }"#,
    );
    let graph = CallGraph::build(&map, false);
    let (plan, stats) = make_plan(&graph, &map, 0);

    assert_eq!(stats.dropped, 0);
    assert_eq!(plan.units.len(), 1);
    let names: Vec<&str> = plan.units[0].functions.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["f2", "f1"]);
}

/// S2 — a same-file cycle drops exactly the back edge, regardless of which
/// way the cycle is broken.
#[test]
fn s2_cycle_drops_exactly_one_edge() {
    let map = km(
        r#"{
        "functions": {
            "f1": {"a.c": {"calls": {"f2": ["a.c"]}}},
            "f2": {"a.c": {"calls": {"f1": ["a.c"]}}}
        },
        "source files": {"a.c": {"compiled to": ["a.o"]}},
        "object files": {"a.o": {"compiled from": ["a.c"]}}
    }"#,
    );
    let graph = CallGraph::build(&map, false);
    let (plan, stats) = make_plan(&graph, &map, 7);

    assert_eq!(stats.calls, 2);
    assert_eq!(stats.dropped, 1);
    let names: Vec<&str> = plan.units[0].functions.iter().map(|f| f.name.as_str()).collect();
    assert!(names == vec!["f1", "f2"] || names == vec!["f2", "f1"]);
}

/// S3 — a call across object files orders the callee's unit first and drops
/// nothing.
#[test]
fn s3_cross_unit_call_orders_callee_unit_first() {
    let map = km(
        r#"{
        "functions": {
            "f1": {"a.c": {"calls": {"f2": ["b.c"]}}},
            "f2": {"b.c": {}}
        },
        "source files": {
            "a.c": {"compiled to": ["a.o"]},
            "b.c": {"compiled to": ["b.o"]}
        },
        "object files": {
            "a.o": {"compiled from": ["a.c"]},
            "b.o": {"compiled from": ["b.c"]}
        }
    }"#,
    );
    let graph = CallGraph::build(&map, false);
    let (plan, stats) = make_plan(&graph, &map, 3);

    assert_eq!(stats.dropped, 0);
    let unit_order: Vec<&str> = plan.units.iter().map(|u| u.object_file.as_str()).collect();
    let b_index = unit_order.iter().position(|&u| u == "b.o").unwrap();
    let a_index = unit_order.iter().position(|&u| u == "a.o").unwrap();
    assert!(b_index < a_index, "expected b.o before a.o, got {unit_order:?}");
}

/// S4 — a source file compiled into both a real object file and the `a.out`
/// executable sentinel is assigned to the real object file.
#[test]
fn s4_prefers_real_object_file_over_a_out_sentinel() {
    let map = km(
        r#"{
        "functions": {"f1": {"a.c": {}}},
        "source files": {"a.c": {"compiled to": ["x.o", "a.out"]}},
        "object files": {"x.o": {"compiled from": ["a.c"]}}
    }"#,
    );
    let graph = CallGraph::build(&map, false);
    let (plan, _) = make_plan(&graph, &map, 0);

    assert_eq!(plan.units.len(), 1);
    assert_eq!(plan.units[0].object_file, "x.o");
}

/// S5 — resuming from a changelog truncated mid-generation picks up at the
/// record after the last completed unit, with prior statuses intact.
#[test]
fn s5_resume_after_crash_recovers_progress_and_statuses() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("changelog.jsonl");

    let records = vec![
        ChangelogRecord {
            generation: 1,
            unit_index: 0,
            object_file: "a.o".to_string(),
            functions: [("f1".to_string(), Status::New)].into_iter().collect(),
            skipped: false,
        },
        ChangelogRecord {
            generation: 1,
            unit_index: 1,
            object_file: "b.o".to_string(),
            functions: BTreeMap::new(),
            skipped: true,
        },
        ChangelogRecord {
            generation: 1,
            unit_index: 2,
            object_file: "c.o".to_string(),
            functions: [("f3".to_string(), Status::Error)].into_iter().collect(),
            skipped: false,
        },
    ];

    let text: String = records
        .iter()
        .map(|r| format!("{}\n", serde_json::to_string(r).unwrap()))
        .collect();
    std::fs::write(&path, text).unwrap();

    let state = load_changelog(&path).unwrap();
    assert_eq!(state.generation, 1);
    assert_eq!(state.resume_unit_index, 3);

    let counts = state.status_counts();
    assert_eq!(counts.get(&Status::New), Some(&1));
    assert_eq!(counts.get(&Status::Error), Some(&1));
}

/// S6 — joining a weaker and a stronger annotation for the same pointer
/// param keeps the stronger (`MustDeref`) classification and tallies it as
/// `B-strictly-better`.
#[test]
fn s6_join_prefers_must_deref_over_may_deref() {
    let a = db_with("f", "a.c", Param::pointer("p", true, false));
    let b = db_with("f", "a.c", Param::pointer("p", true, true));

    let (joined, stats, mismatches) = join(&a, &b);

    assert!(mismatches.is_empty());
    assert_eq!(stats.b_strictly_better, 1);
    match joined["f"]["a.c"].params[0].view() {
        ParamView::Pointer { may_deref, must_deref } => assert!(may_deref && must_deref),
        ParamView::NonPointer => panic!("expected a pointer param"),
    }
}

fn db_with(name: &str, source_file: &str, param: Param) -> AnnotationDatabase {
    let record = AnnotationRecord {
        signature: format!("void {name}({} *p)", "int"),
        params: vec![param],
        returns_pointer: false,
        returns_signed: false,
        may_return_null: None,
        may_return_errptr: None,
        may_return_negative: None,
        may_return_positive: None,
    };
    let mut files = BTreeMap::new();
    files.insert(source_file.to_string(), record);
    let mut db = AnnotationDatabase::new();
    db.insert(name.to_string(), files);
    db
}
