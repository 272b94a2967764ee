//! Component F: the annotation record codec.
//!
//! Grounded on `examples/original_source/scripts/null-deref/collect.py`
//! (the `Function`/`Param`/`Returns` line grammar and the dict shape
//! `save_annotations` writes). The text grammar is the contract with the
//! external analyzer and is preserved exactly; parameters and return shape
//! keep the original's flat optional-field JSON shape so the annotation
//! database round-trips byte-for-byte with anything downstream that reads
//! it, while `ParamView`/`ReturnView` give the rest of the crate a typed
//! `enum` to match on instead of juggling the raw booleans.

use crate::error::CodecError;
use crate::plan::Plan;
use crate::project_map::ProjectMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamView {
    NonPointer,
    Pointer { may_deref: bool, must_deref: bool },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    #[serde(rename = "is pointer")]
    pub is_pointer: bool,
    #[serde(rename = "may deref", skip_serializing_if = "Option::is_none", default)]
    pub may_deref: Option<bool>,
    #[serde(rename = "must deref", skip_serializing_if = "Option::is_none", default)]
    pub must_deref: Option<bool>,
}

impl Param {
    pub fn non_pointer(name: impl Into<String>) -> Param {
        Param { name: name.into(), is_pointer: false, may_deref: None, must_deref: None }
    }

    pub fn pointer(name: impl Into<String>, may_deref: bool, must_deref: bool) -> Param {
        Param {
            name: name.into(),
            is_pointer: true,
            may_deref: Some(may_deref),
            must_deref: Some(must_deref),
        }
    }

    pub fn view(&self) -> ParamView {
        if self.is_pointer {
            ParamView::Pointer {
                may_deref: self.may_deref.unwrap_or(false),
                must_deref: self.must_deref.unwrap_or(false),
            }
        } else {
            ParamView::NonPointer
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnView {
    Pointer { may_return_null: bool, may_return_errptr: bool },
    Signed { may_return_negative: bool, may_return_positive: bool },
    Other,
}

/// A single function's annotation, as read from or written to a
/// `functions/<name>.txt` file, and the same shape the collected JSON
/// database stores it in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotationRecord {
    pub signature: String,
    pub params: Vec<Param>,
    #[serde(rename = "returns pointer", default)]
    pub returns_pointer: bool,
    #[serde(rename = "returns signed", default)]
    pub returns_signed: bool,
    #[serde(rename = "may return null", skip_serializing_if = "Option::is_none", default)]
    pub may_return_null: Option<bool>,
    #[serde(rename = "may return errptr", skip_serializing_if = "Option::is_none", default)]
    pub may_return_errptr: Option<bool>,
    #[serde(rename = "may return negative", skip_serializing_if = "Option::is_none", default)]
    pub may_return_negative: Option<bool>,
    #[serde(rename = "may return positive", skip_serializing_if = "Option::is_none", default)]
    pub may_return_positive: Option<bool>,
}

impl AnnotationRecord {
    pub fn returns(&self) -> ReturnView {
        if self.returns_pointer {
            ReturnView::Pointer {
                may_return_null: self.may_return_null.unwrap_or(false),
                may_return_errptr: self.may_return_errptr.unwrap_or(false),
            }
        } else if self.returns_signed {
            ReturnView::Signed {
                may_return_negative: self.may_return_negative.unwrap_or(false),
                may_return_positive: self.may_return_positive.unwrap_or(false),
            }
        } else {
            ReturnView::Other
        }
    }

    fn set_returns(&mut self, view: ReturnView) {
        self.returns_pointer = false;
        self.returns_signed = false;
        self.may_return_null = None;
        self.may_return_errptr = None;
        self.may_return_negative = None;
        self.may_return_positive = None;
        match view {
            ReturnView::Pointer { may_return_null, may_return_errptr } => {
                self.returns_pointer = true;
                self.may_return_null = Some(may_return_null);
                self.may_return_errptr = Some(may_return_errptr);
            }
            ReturnView::Signed { may_return_negative, may_return_positive } => {
                self.returns_signed = true;
                self.may_return_negative = Some(may_return_negative);
                self.may_return_positive = Some(may_return_positive);
            }
            ReturnView::Other => {}
        }
    }
}

/// `name -> source_file -> record`, matching the JSON shape `collect`
/// writes and `join`/`aspects`/`stats`/`explore` all read.
pub type AnnotationDatabase = BTreeMap<String, BTreeMap<String, AnnotationRecord>>;

/// Resolves the source file a function record in `object_file`'s unit
/// belongs to, by intersecting the function's project-map entries with the
/// object file's compiled-from set. Ambiguous or absent resolution is a hard
/// error — see the decision recorded in `SPEC_FULL.md` §11.
pub fn resolve_source_file(km: &ProjectMap, name: &str, object_file: &str) -> Result<String, CodecError> {
    let compiled_from = km
        .object_files
        .get(object_file)
        .map(|info| info.compiled_from.as_slice())
        .unwrap_or(&[]);

    let candidates: Vec<String> = km
        .functions
        .get(name)
        .map(|files| {
            files
                .keys()
                .filter(|f| compiled_from.iter().any(|c| c == *f))
                .cloned()
                .collect()
        })
        .unwrap_or_default();

    match candidates.as_slice() {
        [single] => Ok(single.clone()),
        _ => Err(CodecError::AmbiguousSourceFile {
            name: name.to_string(),
            candidates,
        }),
    }
}

/// Parses every `Function` block out of an annotation file's text.
pub fn parse_records(path: &Path, text: &str) -> Result<Vec<(String, AnnotationRecord)>, CodecError> {
    let mut records = Vec::new();
    let lines: Vec<&str> = text.lines().collect();
    let mut i = 0;

    let err = |line: usize, message: String| CodecError::Parse {
        path: path.to_path_buf(),
        line: line + 1,
        message,
    };

    while i < lines.len() {
        let line = lines[i];
        if line.trim().is_empty() {
            i += 1;
            continue;
        }
        let mut parts = line.split_whitespace();
        match parts.next() {
            Some("Function") => {
                let name = parts
                    .next()
                    .ok_or_else(|| err(i, "Function line missing a name".to_string()))?
                    .to_string();
                i += 1;
                let signature = lines
                    .get(i)
                    .ok_or_else(|| err(i, "missing signature line after Function".to_string()))?
                    .trim()
                    .to_string();
                i += 1;

                let mut record = AnnotationRecord {
                    signature,
                    params: Vec::new(),
                    returns_pointer: false,
                    returns_signed: false,
                    may_return_null: None,
                    may_return_errptr: None,
                    may_return_negative: None,
                    may_return_positive: None,
                };
                let mut saw_returns = false;

                while i < lines.len() {
                    let line = lines[i];
                    if line.trim().is_empty() {
                        i += 1;
                        continue;
                    }
                    let mut parts = line.split_whitespace();
                    match parts.next() {
                        Some("Param") => {
                            let param_name = parts
                                .next()
                                .ok_or_else(|| err(i, "Param line missing a name".to_string()))?
                                .to_string();
                            let kind_tok = parts
                                .next()
                                .ok_or_else(|| err(i, "Param line missing Pointer/NonPointer".to_string()))?;
                            let param = match kind_tok {
                                "NonPointer" => Param::non_pointer(param_name),
                                "Pointer" => {
                                    let deref_tok = parts.next().ok_or_else(|| {
                                        err(i, "Pointer param missing deref classification".to_string())
                                    })?;
                                    let (may, must) = match deref_tok {
                                        "MustDeref" => (true, true),
                                        "MayDeref" => (true, false),
                                        "NoDeref" => (false, false),
                                        other => {
                                            return Err(err(i, format!("unknown deref classification {other:?}")))
                                        }
                                    };
                                    Param::pointer(param_name, may, must)
                                }
                                other => return Err(err(i, format!("unknown param kind {other:?}"))),
                            };
                            record.params.push(param);
                            i += 1;
                        }
                        Some("Returns") => {
                            let shape = parts
                                .next()
                                .ok_or_else(|| err(i, "Returns line missing a shape".to_string()))?;
                            let view = match shape {
                                "Pointer" => {
                                    let null_tok =
                                        parts.next().ok_or_else(|| err(i, "Returns Pointer missing null flag".to_string()))?;
                                    let err_tok =
                                        parts.next().ok_or_else(|| err(i, "Returns Pointer missing error flag".to_string()))?;
                                    ReturnView::Pointer {
                                        may_return_null: null_tok == "MayBeNull",
                                        may_return_errptr: err_tok == "MayBeError",
                                    }
                                }
                                "Signed" => {
                                    let neg_tok = parts
                                        .next()
                                        .ok_or_else(|| err(i, "Returns Signed missing negative flag".to_string()))?;
                                    let pos_tok = parts
                                        .next()
                                        .ok_or_else(|| err(i, "Returns Signed missing positive flag".to_string()))?;
                                    ReturnView::Signed {
                                        may_return_negative: neg_tok == "MayBeNegative",
                                        may_return_positive: pos_tok == "MayBePositive",
                                    }
                                }
                                "Other" => ReturnView::Other,
                                other => return Err(err(i, format!("unknown return shape {other:?}"))),
                            };
                            record.set_returns(view);
                            saw_returns = true;
                            i += 1;
                        }
                        Some("Function") => break,
                        other => return Err(err(i, format!("unexpected line {other:?}"))),
                    }
                }

                if !saw_returns {
                    return Err(err(i, format!("function {name:?} has no Returns line")));
                }
                records.push((name, record));
            }
            other => return Err(err(i, format!("expected Function, found {other:?}"))),
        }
    }

    Ok(records)
}

/// Reads and parses an annotation file, requiring it to contain exactly one
/// `Function` block (the shape the driver writes per function).
pub fn read_record(path: &Path) -> Result<AnnotationRecord, CodecError> {
    let text = std::fs::read_to_string(path).map_err(|source| CodecError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut records = parse_records(path, &text)?;
    if records.len() != 1 {
        return Err(CodecError::Parse {
            path: path.to_path_buf(),
            line: 1,
            message: format!("expected exactly one Function block, found {}", records.len()),
        });
    }
    Ok(records.remove(0).1)
}

/// Serializes a single record back into the line grammar `parse_records`
/// accepts, for the codec round-trip property.
pub fn serialize_record(name: &str, record: &AnnotationRecord) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Function {name}");
    let _ = writeln!(out, "{}", record.signature);
    for param in &record.params {
        match param.view() {
            ParamView::NonPointer => {
                let _ = writeln!(out, "Param {} NonPointer", param.name);
            }
            ParamView::Pointer { may_deref, must_deref } => {
                let tok = match (must_deref, may_deref) {
                    (true, _) => "MustDeref",
                    (false, true) => "MayDeref",
                    (false, false) => "NoDeref",
                };
                let _ = writeln!(out, "Param {} Pointer {}", param.name, tok);
            }
        }
    }
    match record.returns() {
        ReturnView::Pointer { may_return_null, may_return_errptr } => {
            let _ = writeln!(
                out,
                "Returns Pointer {} {}",
                if may_return_null { "MayBeNull" } else { "NotNull" },
                if may_return_errptr { "MayBeError" } else { "NotError" },
            );
        }
        ReturnView::Signed { may_return_negative, may_return_positive } => {
            let _ = writeln!(
                out,
                "Returns Signed {} {}",
                if may_return_negative { "MayBeNegative" } else { "NotNegative" },
                if may_return_positive { "MayBePositive" } else { "NotPositive" },
            );
        }
        ReturnView::Other => {
            let _ = writeln!(out, "Returns Other");
        }
    }
    out
}

/// Builds a `(function name, source file) -> object file` index by walking
/// `plan` the same way `collect_annotations` does. Used by components that
/// need to map an already-collected annotation back to the unit it was
/// assigned to (`stats`, `explore`) instead of guessing the first of a
/// source file's possibly several project-map candidates — SPEC_FULL.md
/// §4.C and scenario S4 exist precisely because that guess can be wrong.
/// Functions whose source file can't be uniquely resolved are left out of
/// the index rather than aborting, since this is a best-effort lookup for
/// reporting, not the hard-erroring `collect` path.
pub fn object_file_index(km: &ProjectMap, plan: &Plan) -> BTreeMap<(String, String), String> {
    let mut index = BTreeMap::new();
    for unit in &plan.units {
        for function in &unit.functions {
            if let Ok(source_file) = resolve_source_file(km, &function.name, &unit.object_file) {
                index.insert((function.name.clone(), source_file), unit.object_file.clone());
            }
        }
    }
    index
}

/// Walks every unit and function named in `plan`, reading whatever
/// `functions/<name>.txt` file the driver produced under
/// `annotations_dir/<object_file>/`, and assembles the annotation
/// database. Missing files (functions the analyzer never reached) are
/// silently skipped, exactly as `collect_annotations` does; a malformed
/// file that does exist is a hard `CodecError`.
pub fn collect_annotations(km: &ProjectMap, plan: &Plan, annotations_dir: &Path) -> Result<AnnotationDatabase, CodecError> {
    log::info!("collecting annotations from {}", annotations_dir.display());
    let mut annotations = AnnotationDatabase::new();

    for unit in &plan.units {
        for function in &unit.functions {
            let path = annotations_dir.join(&unit.object_file).join("functions").join(format!("{}.txt", function.name));
            if !path.exists() {
                continue;
            }

            let record = read_record(&path)?;
            let source_file = resolve_source_file(km, &function.name, &unit.object_file)?;
            annotations.entry(function.name.clone()).or_default().insert(source_file, record);
        }
    }

    Ok(annotations)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> AnnotationRecord {
        let mut record = AnnotationRecord {
            signature: "int *foo(int *p, int n)".to_string(),
            params: vec![Param::pointer("p", true, true), Param::non_pointer("n")],
            returns_pointer: false,
            returns_signed: false,
            may_return_null: None,
            may_return_errptr: None,
            may_return_negative: None,
            may_return_positive: None,
        };
        record.set_returns(ReturnView::Pointer { may_return_null: true, may_return_errptr: false });
        record
    }

    #[test]
    fn round_trips_through_serialize_and_parse() {
        let record = sample_record();
        let text = serialize_record("foo", &record);
        let parsed = parse_records(Path::new("test.txt"), &text).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].0, "foo");
        assert_eq!(parsed[0].1, record);
    }

    #[test]
    fn no_deref_and_may_deref_are_distinguished() {
        let text = "Function f\nvoid f(int *p)\nParam p Pointer NoDeref\nReturns Other\n";
        let parsed = parse_records(Path::new("t.txt"), text).unwrap();
        match parsed[0].1.params[0].view() {
            ParamView::Pointer { may_deref, must_deref } => assert!(!may_deref && !must_deref),
            _ => panic!("expected pointer param"),
        }
    }

    #[test]
    fn malformed_line_reports_path_and_line_number() {
        let text = "Function f\nvoid f()\nParam\nReturns Other\n";
        let err = parse_records(Path::new("bad.txt"), text).unwrap_err();
        match err {
            CodecError::Parse { line, .. } => assert_eq!(line, 3),
            other => panic!("expected Parse error, got {other:?}"),
        }
    }

    #[test]
    fn signed_return_round_trips() {
        let mut record = AnnotationRecord {
            signature: "int bar(void)".to_string(),
            params: vec![],
            returns_pointer: false,
            returns_signed: false,
            may_return_null: None,
            may_return_errptr: None,
            may_return_negative: None,
            may_return_positive: None,
        };
        record.set_returns(ReturnView::Signed { may_return_negative: false, may_return_positive: true });
        let text = serialize_record("bar", &record);
        let parsed = parse_records(Path::new("t.txt"), &text).unwrap();
        assert_eq!(parsed[0].1, record);
    }

    #[test]
    fn json_shape_matches_the_original_flat_dict() {
        let record = sample_record();
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["returns pointer"], true);
        assert_eq!(json["may return null"], true);
        assert!(json.get("may return negative").is_none());
    }

    fn km(json: &str) -> ProjectMap {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn resolves_unique_source_file() {
        let map = km(
            r#"{
            "functions": {"f1": {"a.c": {}}},
            "source files": {"a.c": {"compiled to": ["a.o"]}},
            "object files": {"a.o": {"compiled from": ["a.c"]}}
        }"#,
        );
        assert_eq!(resolve_source_file(&map, "f1", "a.o").unwrap(), "a.c");
    }

    #[test]
    fn ambiguous_or_absent_source_file_is_a_hard_error() {
        let map = km(
            r#"{
            "functions": {"f1": {"a.c": {}, "b.c": {}}},
            "source files": {},
            "object files": {"u.o": {"compiled from": ["a.c", "b.c"]}}
        }"#,
        );
        assert!(resolve_source_file(&map, "f1", "u.o").is_err());

        let empty = km(r#"{"functions": {}, "source files": {}, "object files": {}}"#);
        assert!(resolve_source_file(&empty, "missing", "u.o").is_err());
    }

    #[test]
    fn collect_skips_missing_files_and_parses_present_ones() {
        use crate::plan::{CalledFunction, PlanFunction, UnitPlan};

        let map = km(
            r#"{
            "functions": {"f1": {"a.c": {}}, "f2": {"a.c": {}}},
            "source files": {"a.c": {"compiled to": ["a.o"]}},
            "object files": {"a.o": {"compiled from": ["a.c"]}}
        }"#,
        );
        let plan = Plan {
            units: vec![UnitPlan {
                object_file: "a.o".to_string(),
                functions: vec![
                    PlanFunction { name: "f1".to_string(), called_functions: vec![] },
                    PlanFunction {
                        name: "f2".to_string(),
                        called_functions: vec![CalledFunction { name: "f1".to_string(), object_file: "a.o".to_string() }],
                    },
                ],
            }],
        };

        let dir = tempfile::tempdir().unwrap();
        let functions_dir = dir.path().join("a.o").join("functions");
        std::fs::create_dir_all(&functions_dir).unwrap();
        std::fs::write(functions_dir.join("f1.txt"), "Function f1\nvoid f1(void)\nReturns Other\n").unwrap();

        let annotations = collect_annotations(&map, &plan, dir.path()).unwrap();
        assert_eq!(annotations.len(), 1);
        assert!(annotations.contains_key("f1"));
        assert!(!annotations.contains_key("f2"));
    }
}
