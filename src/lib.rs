//! Call-graph planner and incremental fixpoint driver for a whole-project
//! null-dereference annotation analysis. See `SPEC_FULL.md` for the full
//! component breakdown; each module's doc comment names the component it
//! implements.

pub mod aspects;
pub mod cli;
pub mod codec;
pub mod config;
pub mod driver;
pub mod error;
pub mod executor;
pub mod fixpoint;
pub mod graph;
pub mod harness;
pub mod ident;
pub mod join;
pub mod plan;
pub mod project_map;
pub mod stats;
pub mod toposort;
pub mod unit_assign;

pub mod explorer;
