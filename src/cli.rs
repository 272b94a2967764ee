//! Component M: the CLI front-end.
//!
//! `clap`-derive subcommands mirroring `SPEC_FULL.md` §6's CLI surface,
//! in the derive idiom used across the broader example corpus (see e.g.
//! `iepathos-debtmap`'s `src/cli.rs`).

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "nullderef-planner")]
#[command(about = "Call-graph planner and incremental fixpoint driver for null-dereference annotation analysis")]
#[command(version)]
pub struct Cli {
    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    pub verbosity: u8,

    /// Optional TOML config file, layered under explicit CLI flags
    #[arg(long = "config", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build the pruned call graph and candidate object-file table
    Preplan {
        /// Path to the project map JSON
        project_map: PathBuf,
        /// Path to write the preplan JSON
        preplan_out: PathBuf,
    },

    /// Choose the best plan across N randomized attempts
    Plan {
        /// Path to a preplan JSON (from `preplan`) or a raw project map
        preplan_or_map: PathBuf,
        /// Path to write the plan JSON
        plan_out: PathBuf,
        /// Number of randomized rearrangement attempts to try; falls back to
        /// the config file's `attempts`, defaulting to 1
        #[arg(long)]
        attempts: Option<usize>,
        /// Base seed for the first attempt; later attempts derive from it
        #[arg(long, default_value = "0")]
        seed: u64,
    },

    /// Run the incremental fixpoint controller
    Run {
        analyzer_root: PathBuf,
        sources_root: PathBuf,
        plan: PathBuf,
        annotations: PathBuf,
        workdir: PathBuf,
        #[arg(long)]
        debug: bool,
        /// Analyzer heap cap in megabytes; falls back to the config file
        #[arg(long)]
        heap: Option<u32>,
        /// Analyzer CPU-time cap in seconds; falls back to the config file
        #[arg(long)]
        time: Option<u64>,
        /// Wall-clock timeout per unit in seconds; falls back to the config file
        #[arg(long)]
        timeout: Option<u64>,
        #[arg(long = "from-file")]
        from_file: Option<usize>,
        /// Maximum fixpoint generations to run; falls back to the config file
        #[arg(long)]
        generations: Option<u32>,
    },

    /// Walk the plan, parse per-function records, emit the annotation database
    Collect {
        project_map: PathBuf,
        plan: PathBuf,
        annotations_dir: PathBuf,
        annotations_json: PathBuf,
    },

    /// Merge two annotation databases
    Join {
        a: PathBuf,
        b: PathBuf,
        out: PathBuf,
    },

    /// Report counts over a plan and an annotation database
    Stats {
        project_map: PathBuf,
        plan: PathBuf,
        annotations: PathBuf,
    },

    /// Emit assert/assume instrumentation aspects
    Aspects {
        project_map: PathBuf,
        annotations: PathBuf,
        assert_out: PathBuf,
        assume_out: Option<PathBuf>,
    },

    /// Interactive annotation explorer REPL
    Explore {
        /// Needed, with `plan`, to resolve each annotation's object file for
        /// the `-o` index
        project_map: PathBuf,
        /// Needed to resolve each annotation's object file the same way
        /// `collect` assigned it, rather than guessing a source file's first
        /// project-map candidate
        plan: PathBuf,
        annotations_json: PathBuf,
        /// Read commands from a file instead of stdin
        #[arg(long)]
        cmds: Option<PathBuf>,
    },

    /// Run the fixture-based regression test harness
    Harness {
        /// Directory of named fixtures, each with test.c/annotations/expected
        fixtures: PathBuf,
        /// Names of the fixtures to run; all of them by default
        names: Vec<String>,
    },
}
