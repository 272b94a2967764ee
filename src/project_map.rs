//! Component A: the project-map loader.
//!
//! Reads the external cross-reference index produced by the project's own
//! kartographer tooling: three top-level maps (`functions`, `source files`,
//! `object files`). This module only fixes the documented subset of fields
//! the planner consumes; unknown fields are tolerated for forward
//! compatibility, and `serde`'s derive parses the document in a single pass
//! with no intermediate `serde_json::Value` tree.
//!
//! Grounded on `examples/original_source/scripts/null-deref/preplan.py`
//! (`load_km`, `build_function_graph`).

use crate::error::MapError;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::io::BufReader;
use std::path::Path;

/// Linkage tag on a function, as carried by the project map's `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Linkage {
    Global,
    Static,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FunctionInfo {
    #[serde(default, rename = "calls")]
    pub calls: BTreeMap<String, Vec<String>>,
    #[serde(default, rename = "called in")]
    pub called_in: BTreeMap<String, Vec<String>>,
    #[serde(rename = "type")]
    pub linkage: Option<Linkage>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SourceFileInfo {
    #[serde(default, rename = "compiled to")]
    pub compiled_to: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ObjectFileInfo {
    #[serde(default, rename = "compiled from")]
    pub compiled_from: Vec<String>,
}

/// The project map: `functions[name][source_file]`, `source files[path]`,
/// `object files[path]`.
#[derive(Debug, Clone, Deserialize)]
pub struct ProjectMap {
    pub functions: BTreeMap<String, BTreeMap<String, FunctionInfo>>,
    #[serde(rename = "source files")]
    pub source_files: BTreeMap<String, SourceFileInfo>,
    #[serde(rename = "object files", default)]
    pub object_files: BTreeMap<String, ObjectFileInfo>,
}

impl ProjectMap {
    /// Loads and parses a project map from disk in a single streaming pass.
    pub fn load(path: &Path) -> Result<ProjectMap, MapError> {
        log::info!("loading project information from {}", path.display());
        let file = std::fs::File::open(path).map_err(|source| MapError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let reader = BufReader::new(file);
        let map: ProjectMap = serde_json::from_reader(reader).map_err(|source| MapError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(map)
    }

    /// Whether a source file is visible to the planner (has a non-empty
    /// compiled-to set).
    pub fn is_compiled(&self, source_file: &str) -> bool {
        self.source_files
            .get(source_file)
            .map(|info| !info.compiled_to.is_empty())
            .unwrap_or(false)
    }

    /// Iterates every `(name, source_file, &FunctionInfo)` triple in the map.
    pub fn iter_functions(&self) -> impl Iterator<Item = (&str, &str, &FunctionInfo)> {
        self.functions.iter().flat_map(|(name, files)| {
            files
                .iter()
                .map(move |(file, info)| (name.as_str(), file.as_str(), info))
        })
    }

    pub fn candidate_object_files(&self, source_file: &str) -> &[String] {
        self.source_files
            .get(source_file)
            .map(|info| info.compiled_to.as_slice())
            .unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ProjectMap {
        let json = r#"
        {
            "functions": {
                "f1": {"a.c": {"calls": {"f2": ["a.c"]}, "type": "global"}},
                "f2": {"a.c": {"type": "static"}}
            },
            "source files": {
                "a.c": {"compiled to": ["a.o"]}
            },
            "object files": {
                "a.o": {"compiled from": ["a.c"]}
            }
        }"#;
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn parses_minimal_document() {
        let km = sample();
        assert_eq!(km.functions.len(), 2);
        assert!(km.is_compiled("a.c"));
        assert!(!km.is_compiled("missing.c"));
    }

    #[test]
    fn tolerates_unknown_fields() {
        let json = r#"
        {
            "functions": {},
            "source files": {},
            "object files": {},
            "some future field": 42
        }"#;
        let km: ProjectMap = serde_json::from_str(json).unwrap();
        assert!(km.functions.is_empty());
    }

    #[test]
    fn missing_required_field_is_malformed() {
        let json = r#"{"functions": {}}"#;
        let err = serde_json::from_str::<ProjectMap>(json).unwrap_err();
        assert!(err.to_string().contains("source files") || err.is_data());
    }
}
