//! Error taxonomy, per `SPEC_FULL.md` §7.
//!
//! Library code always returns one of the concrete error enums below; only
//! `main.rs` and the CLI glue reach for `anyhow` to add top-level context.

use std::path::PathBuf;
use thiserror::Error;

/// The project map, a plan, or an annotation record file fails a schema or
/// grammar check. Fatal for the current tool invocation.
#[derive(Debug, Error)]
pub enum MapError {
    #[error("{path}: {message}")]
    Malformed { path: PathBuf, message: String },
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path} as JSON: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors raised while planning (unit assignment, ordering, emission).
#[derive(Debug, Error)]
pub enum PlanError {
    #[error(transparent)]
    Map(#[from] MapError),
    #[error("function {name:?} in {source_file:?} has no candidate object files")]
    NoCandidates { name: String, source_file: String },
}

/// Errors raised by the annotation record codec (component F).
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("{path}:{line}: {message}")]
    Parse {
        path: PathBuf,
        line: usize,
        message: String,
    },
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(
        "function {name:?} has no unique source file among the unit's compiled-from set \
         (matches: {candidates:?})"
    )]
    AmbiguousSourceFile {
        name: String,
        candidates: Vec<String>,
    },
}

/// A subprocess invocation of the external analyzer failed to complete
/// normally. Recorded per-unit; never fatal to the overall run.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("analyzer exited with status {status:?}")]
    NonZeroExit { status: Option<i32> },
    #[error("analyzer wall-clock timeout of {0:?} exceeded")]
    Timeout(std::time::Duration),
    #[error("failed to spawn analyzer: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("failed to prepare {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Two annotation databases disagree on a function's parameter shape.
/// Soft error: the caller keeps the first database's record and tallies it.
#[derive(Debug, Error)]
#[error("parameter mismatch joining {name:?} in {source_file:?}")]
pub struct JoinMismatch {
    pub name: String,
    pub source_file: String,
}

/// Startup misconfiguration: missing source tree, unwritable annotation
/// root, failed atomic rename. Always fatal.
#[derive(Debug, Error)]
pub enum FilesystemError {
    #[error("path does not exist: {0}")]
    NotFound(PathBuf),
    #[error("failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to rename {from} to {to}: {source}")]
    Rename {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Top-level error returned from CLI subcommand handlers.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Map(#[from] MapError),
    #[error(transparent)]
    Plan(#[from] PlanError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Driver(#[from] DriverError),
    #[error(transparent)]
    Filesystem(#[from] FilesystemError),
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),
    #[error("{0}")]
    Other(String),
}
