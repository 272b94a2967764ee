//! Component L: the annotation explorer REPL.
//!
//! Grounded on `examples/original_source/scripts/null-deref/explorer.py`
//! (`build_model`, `show_annotation`, `main`'s command loop): the three
//! indices (by function, by object file, by source file), the return/param
//! descriptions, and the `-f`/`-o`/`-s`/`-h`/`-q` command set are kept
//! exactly. As in `stats.rs`, the object file is resolved by walking the
//! plan (`codec::object_file_index`) rather than read off a redundant field
//! on the record or guessed from the project map's first candidate.

use crate::codec::{AnnotationDatabase, AnnotationRecord, ParamView, ReturnView};
use crate::plan::Plan;
use crate::project_map::ProjectMap;
use std::collections::BTreeMap;
use std::io::{BufRead, Write};

#[derive(Debug, Clone)]
pub struct AnnotationEntry {
    pub name: String,
    pub source_file: String,
    pub object_file: String,
    pub record: AnnotationRecord,
}

#[derive(Debug, Default)]
pub struct ExplorerModel {
    pub by_function: BTreeMap<String, Vec<AnnotationEntry>>,
    pub by_object_file: BTreeMap<String, Vec<AnnotationEntry>>,
    pub by_source_file: BTreeMap<String, Vec<AnnotationEntry>>,
}

/// Indexes the annotation database three ways, each bucket sorted by
/// function name, per `build_model`.
pub fn build_model(km: &ProjectMap, plan: &Plan, annotations: &AnnotationDatabase) -> ExplorerModel {
    log::info!("indexing annotations");
    let mut model = ExplorerModel::default();
    let object_files = crate::codec::object_file_index(km, plan);

    for (name, source_files) in annotations {
        for (source_file, record) in source_files {
            let object_file = object_files
                .get(&(name.clone(), source_file.clone()))
                .cloned()
                .unwrap_or_else(|| "?".to_string());

            let entry = AnnotationEntry {
                name: name.clone(),
                source_file: source_file.clone(),
                object_file: object_file.clone(),
                record: record.clone(),
            };

            model.by_function.entry(name.clone()).or_default().push(entry.clone());
            model.by_object_file.entry(object_file).or_default().push(entry.clone());
            model.by_source_file.entry(source_file.clone()).or_default().push(entry);
        }
    }

    for bucket in model.by_function.values_mut() {
        bucket.sort_by(|a, b| a.name.cmp(&b.name));
    }
    for bucket in model.by_object_file.values_mut() {
        bucket.sort_by(|a, b| a.name.cmp(&b.name));
    }
    for bucket in model.by_source_file.values_mut() {
        bucket.sort_by(|a, b| a.name.cmp(&b.name));
    }

    model
}

fn return_description(record: &AnnotationRecord) -> &'static str {
    match record.returns() {
        ReturnView::Signed { may_return_negative, may_return_positive } => match (may_return_negative, may_return_positive) {
            (true, true) => "any signed",
            (true, false) => "signed <= 0",
            (false, true) => "signed >= 0",
            (false, false) => "signed == 0",
        },
        ReturnView::Pointer { may_return_null, may_return_errptr } => match (may_return_null, may_return_errptr) {
            (true, true) => "any pointer",
            (true, false) => "valid pointer or NULL",
            (false, true) => "valid pointer or ERR_PTR",
            (false, false) => "valid pointer",
        },
        ReturnView::Other => "other",
    }
}

fn param_description(view: ParamView) -> &'static str {
    match view {
        ParamView::Pointer { must_deref: true, .. } => "must deref pointer",
        ParamView::Pointer { may_deref: true, .. } => "may deref pointer",
        ParamView::Pointer { .. } => "no deref pointer",
        ParamView::NonPointer => "other",
    }
}

/// Formats one annotation entry, per `show_annotation`.
pub fn format_annotation(entry: &AnnotationEntry) -> String {
    let mut out = String::new();
    out.push_str(&format!("Function name: {}\n", entry.name));
    out.push_str(&format!("Signature: {}\n", entry.record.signature));
    out.push_str(&format!("Object file: {}\n", entry.object_file));
    out.push_str(&format!("Source file: {}\n", entry.source_file));
    out.push_str(&format!("Return annotation: {}\n", return_description(&entry.record)));

    if !entry.record.params.is_empty() {
        out.push_str("Parameter annotations:\n");
        for param in &entry.record.params {
            out.push_str(&format!("  {}: {}\n", param.name, param_description(param.view())));
        }
    }

    out
}

/// Formats a whole bucket, per `show_annotations`.
pub fn format_annotations(entries: &[AnnotationEntry]) -> String {
    let mut out = String::new();
    out.push_str(&format!("Found {} annotation{}\n", entries.len(), if entries.len() == 1 { "" } else { "s" }));
    for entry in entries {
        out.push('\n');
        out.push_str(&format_annotation(entry));
    }
    out
}

const HELP: &str = "  -f <function>    Show function info\n\
  -o <object file> Show object file info\n\
  -s <function>    Show source file info\n\
  -h               Show this help\n\
  -q               Quit\n";

/// Runs the REPL to completion, reading commands from `input` and writing
/// output to `output`, per `main`'s command loop.
pub fn run(model: &ExplorerModel, input: impl BufRead, mut output: impl Write) -> std::io::Result<()> {
    writeln!(output, "Ready to process commands:")?;
    write!(output, "{HELP}")?;
    writeln!(output)?;

    let empty: Vec<AnnotationEntry> = Vec::new();

    for line in input.lines() {
        let line = line?;
        write!(output, "> {line}\n")?;
        let line = line.trim();

        if line.is_empty() {
            continue;
        }
        if line == "-q" {
            break;
        }
        if line == "-h" {
            write!(output, "{HELP}")?;
            continue;
        }
        if let Some(name) = line.strip_prefix("-f") {
            let entries = model.by_function.get(name.trim()).unwrap_or(&empty);
            write!(output, "{}", format_annotations(entries))?;
        } else if let Some(name) = line.strip_prefix("-o") {
            let entries = model.by_object_file.get(name.trim()).unwrap_or(&empty);
            write!(output, "{}", format_annotations(entries))?;
        } else if let Some(name) = line.strip_prefix("-s") {
            let entries = model.by_source_file.get(name.trim()).unwrap_or(&empty);
            write!(output, "{}", format_annotations(entries))?;
        } else {
            writeln!(output, "Invalid command.")?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Param;
    use crate::plan::{PlanFunction, UnitPlan};
    use assert_matches::assert_matches;
    use std::collections::BTreeMap as Map;

    fn sample_plan() -> Plan {
        Plan {
            units: vec![UnitPlan {
                object_file: "a.o".to_string(),
                functions: vec![PlanFunction { name: "foo".to_string(), called_functions: vec![] }],
            }],
        }
    }

    fn sample() -> (ProjectMap, AnnotationDatabase) {
        let mut record = AnnotationRecord {
            signature: "int *foo(int *p)".to_string(),
            params: vec![Param::pointer("p", true, true)],
            returns_pointer: false,
            returns_signed: false,
            may_return_null: None,
            may_return_errptr: None,
            may_return_negative: None,
            may_return_positive: None,
        };
        record.set_returns(ReturnView::Pointer { may_return_null: true, may_return_errptr: false });

        let mut files = Map::new();
        files.insert("a.c".to_string(), record);
        let mut db = AnnotationDatabase::new();
        db.insert("foo".to_string(), files);

        let km: ProjectMap = serde_json::from_str(
            r#"{"functions": {"foo": {"a.c": {}}}, "source files": {"a.c": {"compiled to": ["a.o"]}}, "object files": {"a.o": {"compiled from": ["a.c"]}}}"#,
        )
        .unwrap();

        (km, db)
    }

    #[test]
    fn model_indexes_by_all_three_keys() {
        let (km, db) = sample();
        let model = build_model(&km, &sample_plan(), &db);
        assert_eq!(model.by_function["foo"].len(), 1);
        assert_eq!(model.by_object_file["a.o"].len(), 1);
        assert_eq!(model.by_source_file["a.c"].len(), 1);
        let entry = &model.by_function["foo"][0];
        assert_matches!(entry.record.params[0].view(), ParamView::Pointer { may_deref: true, must_deref: true });
        assert_matches!(entry.record.returns(), ReturnView::Pointer { may_return_null: true, may_return_errptr: false });
    }

    #[test]
    fn return_description_matches_pointer_with_null_but_not_errptr() {
        let (km, db) = sample();
        let model = build_model(&km, &sample_plan(), &db);
        let entry = &model.by_function["foo"][0];
        assert_eq!(return_description(&entry.record), "valid pointer or NULL");
    }

    #[test]
    fn repl_dispatches_function_query_and_quits() {
        let (km, db) = sample();
        let model = build_model(&km, &sample_plan(), &db);
        let input = b"-f foo\n-q\n".as_slice();
        let mut output = Vec::new();
        run(&model, input, &mut output).unwrap();
        let text = String::from_utf8(output).unwrap();
        assert!(text.contains("Found 1 annotation"));
        assert!(text.contains("must deref pointer"));
    }

    #[test]
    fn unknown_command_reports_invalid() {
        let (km, db) = sample();
        let model = build_model(&km, &sample_plan(), &db);
        let input = b"-z bogus\n".as_slice();
        let mut output = Vec::new();
        run(&model, input, &mut output).unwrap();
        assert!(String::from_utf8(output).unwrap().contains("Invalid command."));
    }
}
