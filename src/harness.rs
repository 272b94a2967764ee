//! Component O: the fixture-based regression test harness.
//!
//! Grounded on `examples/original_source/null_deref_tests/run.py`
//! (`run_test`, `main`): same fixture layout (`test.c`, `annotations/`,
//! `plan.txt`, `expected/`), same `diff -r expected actual` pass/fail
//! criterion, same pass/fail summary. The source invokes the real external
//! analyzer via `subprocess.check_call`; this harness takes an `analyzer`
//! callback instead, so the crate's own tests can drive it with a
//! deterministic in-process stub rather than shelling out.

use std::path::{Path, PathBuf};

pub type AnalyzerFn<'a> = dyn Fn(&Path, &Path, &Path, &str) -> std::io::Result<()> + 'a;

#[derive(Debug, Clone)]
pub struct TestOutcome {
    pub name: String,
    pub passed: bool,
    pub diffs: Vec<String>,
}

/// Recursively compares two directory trees by relative path and byte
/// content, returning a human-readable mismatch per difference. Empty
/// means identical, mirroring `diff -r`'s exit code.
pub fn diff_dirs(expected: &Path, actual: &Path) -> Vec<String> {
    let mut diffs = Vec::new();
    diff_dirs_into(expected, actual, Path::new(""), &mut diffs);
    diffs
}

fn diff_dirs_into(expected_root: &Path, actual_root: &Path, rel: &Path, diffs: &mut Vec<String>) {
    let expected_dir = expected_root.join(rel);
    let actual_dir = actual_root.join(rel);

    let list = |dir: &Path| -> std::collections::BTreeSet<String> {
        std::fs::read_dir(dir)
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .map(|e| e.file_name().to_string_lossy().into_owned())
                    .collect()
            })
            .unwrap_or_default()
    };

    let expected_names = list(&expected_dir);
    let actual_names = list(&actual_dir);

    for name in expected_names.difference(&actual_names) {
        diffs.push(format!("Only in {}: {}", expected_dir.display(), name));
    }
    for name in actual_names.difference(&expected_names) {
        diffs.push(format!("Only in {}: {}", actual_dir.display(), name));
    }

    for name in expected_names.intersection(&actual_names) {
        let expected_path = expected_dir.join(name);
        let actual_path = actual_dir.join(name);
        if expected_path.is_dir() {
            diff_dirs_into(expected_root, actual_root, &rel.join(name), diffs);
        } else {
            match (std::fs::read(&expected_path), std::fs::read(&actual_path)) {
                (Ok(e), Ok(a)) if e == a => {}
                _ => diffs.push(format!("Files {} and {} differ", expected_path.display(), actual_path.display())),
            }
        }
    }
}

/// Runs a single fixture test: clears any stale `annotations/` directory,
/// invokes `analyzer`, then diffs `expected/` against the directory the
/// original places the per-function annotation output in
/// (`annotations/test.c/functions`), per `run_test`.
pub fn run_test(test_dir: &Path, entry_function: &str, analyzer: &AnalyzerFn) -> TestOutcome {
    let name = test_dir.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    log::info!("running test {name}");

    let source = test_dir.join("test.c");
    let annotations = test_dir.join("annotations");
    let plan = test_dir.join("plan.txt");
    let expected = test_dir.join("expected");
    let actual = annotations.join("test.c").join("functions");

    if annotations.exists() {
        let _ = std::fs::remove_dir_all(&annotations);
    }

    let diffs = match analyzer(&source, &annotations, &plan, entry_function) {
        Ok(()) => diff_dirs(&expected, &actual),
        Err(e) => vec![format!("analyzer invocation failed: {e}")],
    };

    let passed = diffs.is_empty();
    log::info!("test {name} {}", if passed { "passed" } else { "failed" });
    TestOutcome { name, passed, diffs }
}

/// Discovers and runs every fixture under `root`, or just `names` if
/// non-empty, logging a pass/fail summary at the end, per `main`.
pub fn run_all(root: &Path, names: &[String], entry_function: &str, analyzer: &AnalyzerFn) -> Vec<TestOutcome> {
    let mut names: Vec<String> = if names.is_empty() {
        std::fs::read_dir(root)
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .filter(|e| e.path().is_dir())
                    .map(|e| e.file_name().to_string_lossy().into_owned())
                    .collect()
            })
            .unwrap_or_default()
    } else {
        names.to_vec()
    };
    names.sort();

    let outcomes: Vec<TestOutcome> = names.iter().map(|name| run_test(&root.join(name), entry_function, analyzer)).collect();

    let passed = outcomes.iter().filter(|o| o.passed).count();
    let failed = outcomes.len() - passed;
    log::info!("summary:");
    for outcome in &outcomes {
        log::info!("  {} - {}", outcome.name, if outcome.passed { "passed" } else { "failed" });
    }
    log::info!("total: {passed} passed, {failed} failed");

    outcomes
}

fn write_file(path: &Path, contents: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, contents)
}

/// A deterministic stand-in for the external analyzer, used only by this
/// crate's own tests: writes one annotation file per plan function,
/// content derived from the function name, so fixtures are self-contained
/// and reproducible without ever invoking `scripts/cpa.sh`.
pub fn stub_analyzer(_source: &Path, annotations_dir: &Path, plan_path: &Path, _entry_function: &str) -> std::io::Result<()> {
    let plan_text = std::fs::read_to_string(plan_path)?;
    for line in plan_text.lines() {
        if let Some(name) = line.strip_prefix("Function ") {
            let path = annotations_dir.join("test.c").join("functions").join(format!("{name}.txt"));
            write_file(&path, &format!("Function {name}\nvoid {name}(void)\nReturns Other\n"))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(path: &Path, contents: &str) {
        write_file(path, contents).unwrap();
    }

    #[test]
    fn identical_trees_produce_no_diffs() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join("expected/functions/f1.txt"), "same\n");
        write(&dir.path().join("actual/functions/f1.txt"), "same\n");
        let diffs = diff_dirs(&dir.path().join("expected"), &dir.path().join("actual"));
        assert!(diffs.is_empty());
    }

    #[test]
    fn differing_file_content_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join("expected/functions/f1.txt"), "a\n");
        write(&dir.path().join("actual/functions/f1.txt"), "b\n");
        let diffs = diff_dirs(&dir.path().join("expected"), &dir.path().join("actual"));
        assert_eq!(diffs.len(), 1);
    }

    #[test]
    fn missing_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join("expected/functions/f1.txt"), "a\n");
        std::fs::create_dir_all(dir.path().join("actual/functions")).unwrap();
        let diffs = diff_dirs(&dir.path().join("expected"), &dir.path().join("actual"));
        assert_eq!(diffs.len(), 1);
    }

    #[test]
    fn run_test_passes_when_stub_output_matches_expected() {
        let dir = tempfile::tempdir().unwrap();
        let test_dir = dir.path().join("t1");
        write(&test_dir.join("test.c"), "int f1(void) { return 0; }\n");
        write(&test_dir.join("plan.txt"), "File test.o\nFunction f1\n");
        write(&test_dir.join("expected/f1.txt"), "Function f1\nvoid f1(void)\nReturns Other\n");

        let outcome = run_test(&test_dir, "f1", &stub_analyzer);
        assert!(outcome.passed, "diffs: {:?}", outcome.diffs);
    }

    #[test]
    fn run_all_reports_failures() {
        let dir = tempfile::tempdir().unwrap();
        let test_dir = dir.path().join("t1");
        write(&test_dir.join("test.c"), "int f1(void) { return 0; }\n");
        write(&test_dir.join("plan.txt"), "File test.o\nFunction f1\n");
        write(&test_dir.join("expected/f1.txt"), "mismatch\n");

        let outcomes = run_all(dir.path(), &[], "f1", &stub_analyzer);
        assert_eq!(outcomes.len(), 1);
        assert!(!outcomes[0].passed);
    }
}
