//! Component J: the aspect emitter.
//!
//! Grounded on `examples/original_source/scripts/null-deref/aspects.py`
//! (`get_functions`, `get_calling_drivers`, `report_drivers`,
//! `write_aspects`), kept field-for-field: the representative-source-file
//! tie-break, the `nondet_functions` return-type table, and the
//! `NULLDEREFCHECKTYPE` templating are all preserved.

use crate::codec::{AnnotationDatabase, ParamView};
use crate::error::DriverError;
use crate::project_map::ProjectMap;
use lazy_static::lazy_static;
use std::collections::{BTreeMap, BTreeSet};
use std::io::Write as _;
use std::path::Path;

lazy_static! {
    static ref NONDET_FUNCTIONS: BTreeMap<&'static str, &'static str> = [
        ("char", "__VERIFIER_nondet_char"),
        ("int", "__VERIFIER_nondet_int"),
        ("float", "__VERIFIER_nondet_float"),
        ("long", "__VERIFIER_nondet_long"),
        ("size_t", "__VERIFIER_nondet_size_t"),
        ("loff_t", "__VERIFIER_nondet_loff_t"),
        ("u32", "__VERIFIER_nondet_u32"),
        ("u16", "__VERIFIER_nondet_u16"),
        ("u8", "__VERIFIER_nondet_u8"),
        ("unsigned char", "__VERIFIER_nondet_uchar"),
        ("unsigned int", "__VERIFIER_nondet_uint"),
        ("unsigned short", "__VERIFIER_nondet_ushort"),
        ("unsigned", "__VERIFIER_nondet_unsigned"),
        ("unsigned long", "__VERIFIER_nondet_ulong"),
        ("unsigned long long", "__VERIFIER_nondet_ulonglong"),
    ]
    .into_iter()
    .collect();
}

#[derive(Debug, Clone)]
pub struct AspectFunction {
    pub source_file: String,
    pub called_files: BTreeSet<String>,
    pub aspect: Option<String>,
}

fn return_type_from_signature(signature: &str, name: &str) -> Option<String> {
    let pattern = format!(r"^(.*){}\(.*\)$", regex::escape(name));
    let re = regex::Regex::new(&pattern).ok()?;
    let caps = re.captures(signature)?;
    Some(caps.get(1)?.as_str().trim().to_string())
}

fn return_statement_lines(ret_type: &str) -> Vec<String> {
    if ret_type.contains('*') {
        vec!["  return external_allocated_data();".to_string()]
    } else if let Some(struct_name) = ret_type.strip_prefix("struct ") {
        vec![
            format!("  struct {struct_name} *retp = external_allocated_data();"),
            "  return *retp;".to_string(),
        ]
    } else if let Some(&nondet) = NONDET_FUNCTIONS.get(ret_type) {
        vec![format!("  return {nondet}();")]
    } else if ret_type != "void" {
        vec![format!("  return ({ret_type}) __VERIFIER_nondet_ulonglong();")]
    } else {
        Vec::new()
    }
}

/// Builds the per-function aspect bodies, per `get_functions`: picks the
/// lexicographically smallest source file among a function's duplicates as
/// the representative entry, skips functions with no pointer parameters or
/// no `must_deref` parameter, and fabricates a type-appropriate return
/// statement for the advice body.
pub fn collect_functions(km: &ProjectMap, annotations: &AnnotationDatabase) -> BTreeMap<String, AspectFunction> {
    let mut functions = BTreeMap::new();

    for (name, source_files) in annotations {
        let Some((source_file, annotation)) = source_files.iter().next() else {
            continue;
        };

        if !annotation.params.iter().any(|p| p.is_pointer) {
            continue;
        }

        let Some(km_entries) = km.functions.get(name) else {
            log::info!("{name} not found in project map");
            continue;
        };

        let mut called_files = BTreeSet::new();
        let function_info = km_entries.get(source_file).or_else(|| km_entries.values().next());
        if let Some(info) = function_info {
            for files in info.called_in.values() {
                called_files.extend(files.iter().cloned());
            }
        }

        let mut aspect_lines: Vec<String> = annotation
            .params
            .iter()
            .enumerate()
            .filter_map(|(index, param)| match param.view() {
                ParamView::Pointer { must_deref: true, .. } => {
                    Some(format!("  null_deref_NULLDEREFCHECKTYPE_check($arg{});", index + 1))
                }
                _ => None,
            })
            .collect();

        let mut aspect = None;
        if !aspect_lines.is_empty() {
            if let Some(ret_type) = return_type_from_signature(&annotation.signature, name) {
                aspect_lines.extend(return_statement_lines(&ret_type));
                let signature = format!("{ret_type} {name}(..)");
                aspect = Some(format!("around: call({})\n{{\n{}\n}}\n\n", signature, aspect_lines.join("\n")));
            }
        }

        functions.insert(
            name.clone(),
            AspectFunction { source_file: source_file.clone(), called_files, aspect },
        );
    }

    functions
}

/// Groups functions by the `drivers/` (excluding `drivers/base/`) files
/// that call them, per `get_calling_drivers`.
pub fn calling_drivers(functions: &BTreeMap<String, AspectFunction>) -> BTreeMap<String, Vec<String>> {
    let mut drivers: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, function) in functions {
        for called_file in &function.called_files {
            if called_file.starts_with("drivers/") && !called_file.starts_with("drivers/base/") {
                drivers.entry(called_file.clone()).or_default().push(name.clone());
            }
        }
    }
    drivers
}

fn filter_aspected(drivers: &BTreeMap<String, Vec<String>>, functions: &BTreeMap<String, AspectFunction>) -> BTreeMap<String, Vec<String>> {
    let mut filtered = BTreeMap::new();
    for (driver, names) in drivers {
        let kept: Vec<String> = names
            .iter()
            .filter(|name| functions.get(*name).map(|f| f.aspect.is_some()).unwrap_or(false))
            .cloned()
            .collect();
        if !kept.is_empty() {
            filtered.insert(driver.clone(), kept);
        }
    }
    filtered
}

/// Logs calling-driver statistics at `info` level, per `report_drivers`.
pub fn report_drivers(drivers: &BTreeMap<String, Vec<String>>, functions: &BTreeMap<String, AspectFunction>, only_aspected: bool) {
    let description = if only_aspected { "functions with aspects" } else { "all functions with pointer arguments" };
    log::info!("looking at drivers that call {description}");

    let drivers = if only_aspected { filter_aspected(drivers, functions) } else { drivers.clone() };

    let total_calls: usize = drivers.values().map(Vec::len).sum();
    log::info!("total number of drivers: {}", drivers.len());
    log::info!("total number of calls: {total_calls}");

    let mut by_count: Vec<(&String, &Vec<String>)> = drivers.iter().collect();
    by_count.sort_by_key(|(_, names)| std::cmp::Reverse(names.len()));

    for (driver, names) in by_count {
        log::info!("  {driver}: {} calls", names.len());
        let mut sorted_names = names.clone();
        sorted_names.sort();
        for name in sorted_names {
            log::info!("    {name}");
        }
    }
}

/// Writes one aspect file, `check_type` being `"assert"` or `"assume"`.
pub fn write_aspects(functions: &BTreeMap<String, AspectFunction>, path: &Path, check_type: &str) -> Result<(), DriverError> {
    log::info!("writing aspect file {} using check type '{check_type}'", path.display());

    let mut out = String::new();
    out.push_str("before: file (\"$this\")\n{\n");
    out.push_str(&format!("#include <null_deref_{check_type}.h>\n"));
    out.push_str("}\n\n");

    for (_, function) in functions {
        if let Some(aspect) = &function.aspect {
            out.push_str(&aspect.replace("NULLDEREFCHECKTYPE", check_type));
        }
    }

    let mut file = std::fs::File::create(path).map_err(|source| DriverError::Io { path: path.to_path_buf(), source })?;
    file.write_all(out.as_bytes()).map_err(|source| DriverError::Io { path: path.to_path_buf(), source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{AnnotationRecord, Param};
    use crate::project_map::{FunctionInfo, Linkage, ObjectFileInfo, SourceFileInfo};
    use std::collections::BTreeMap as Map;

    fn sample_km() -> ProjectMap {
        let mut called_in = Map::new();
        called_in.insert("caller".to_string(), vec!["drivers/net/foo.c".to_string(), "drivers/base/bar.c".to_string()]);
        let info = FunctionInfo { calls: Map::new(), called_in, linkage: Some(Linkage::Global) };
        let mut files = Map::new();
        files.insert("a.c".to_string(), info);
        let mut functions = Map::new();
        functions.insert("foo".to_string(), files);

        ProjectMap {
            functions,
            source_files: [("a.c".to_string(), SourceFileInfo { compiled_to: vec!["a.o".to_string()] })].into_iter().collect(),
            object_files: [("a.o".to_string(), ObjectFileInfo { compiled_from: vec!["a.c".to_string()] })].into_iter().collect(),
        }
    }

    fn sample_annotations() -> AnnotationDatabase {
        let record = AnnotationRecord {
            signature: "int *foo(int *p)".to_string(),
            params: vec![Param::pointer("p", true, true)],
            returns_pointer: true,
            returns_signed: false,
            may_return_null: Some(true),
            may_return_errptr: Some(false),
            may_return_negative: None,
            may_return_positive: None,
        };
        let mut files = Map::new();
        files.insert("a.c".to_string(), record);
        let mut db = AnnotationDatabase::new();
        db.insert("foo".to_string(), files);
        db
    }

    #[test]
    fn must_deref_pointer_param_gets_an_aspect() {
        let km = sample_km();
        let annotations = sample_annotations();
        let functions = collect_functions(&km, &annotations);
        let foo = &functions["foo"];
        assert!(foo.aspect.is_some());
        assert!(foo.aspect.as_ref().unwrap().contains("null_deref_NULLDEREFCHECKTYPE_check($arg1)"));
        assert!(foo.aspect.as_ref().unwrap().contains("return external_allocated_data();"));
    }

    #[test]
    fn driver_base_is_excluded_but_other_drivers_are_kept() {
        let km = sample_km();
        let annotations = sample_annotations();
        let functions = collect_functions(&km, &annotations);
        let drivers = calling_drivers(&functions);
        assert!(drivers.contains_key("drivers/net/foo.c"));
        assert!(!drivers.contains_key("drivers/base/bar.c"));
    }

    #[test]
    fn non_pointer_only_functions_are_skipped() {
        let mut annotations = sample_annotations();
        annotations.get_mut("foo").unwrap().get_mut("a.c").unwrap().params[0] = Param::non_pointer("p");
        let km = sample_km();
        let functions = collect_functions(&km, &annotations);
        assert!(!functions.contains_key("foo"));
    }

    #[test]
    fn return_statement_picks_nondet_table_entry() {
        assert_eq!(return_statement_lines("int"), vec!["  return __VERIFIER_nondet_int();".to_string()]);
        assert_eq!(return_statement_lines("void"), Vec::<String>::new());
    }
}
