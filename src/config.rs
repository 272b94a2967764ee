//! Layered runtime configuration: defaults, then an optional TOML file,
//! then CLI flags. Shape mirrors the teacher's `DbOptions`: a small,
//! `Default`-able bag of knobs constant for the lifetime of a run.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Toml {
        path: std::path::PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Options that affect planning and driving, constant for the lifetime of a
/// run. Analogous to the teacher's `DbOptions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Restrict the call graph to the forward-reachable closure from
    /// `global` functions before planning. See SPEC_FULL.md §11 Q2.
    pub prune_statics: bool,
    /// Number of randomized plan-rearrangement attempts to try by default.
    pub attempts: usize,
    /// Maximum number of fixpoint generations to run by default.
    pub generations: u32,
    /// Analyzer heap cap, in megabytes.
    pub heap_mb: u32,
    /// Analyzer CPU-time cap, in seconds.
    pub cpu_time_secs: u64,
    /// Externally enforced wall-clock timeout per unit, in seconds.
    pub wall_clock_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            prune_statics: true,
            attempts: 1,
            generations: 20,
            heap_mb: 2048,
            cpu_time_secs: 900,
            wall_clock_timeout_secs: 1200,
        }
    }
}

impl Config {
    /// Loads defaults, optionally overlaid with a TOML file.
    pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
        let mut config = Config::default();
        if let Some(path) = path {
            let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            config = toml::from_str(&text).map_err(|source| ConfigError::Toml {
                path: path.to_path_buf(),
                source,
            })?;
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_newer_two_stage_pipeline() {
        let config = Config::default();
        assert!(config.prune_statics);
        assert_eq!(config.attempts, 1);
    }

    #[test]
    fn overlay_from_toml_overrides_only_named_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "attempts = 5\n").unwrap();
        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.attempts, 5);
        assert!(config.prune_statics);
    }
}
