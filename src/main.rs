//! Component M/N: binary entry point, logging init, and subcommand dispatch.
//!
//! Thin adapters only — each handler parses its arguments into the
//! relevant component's API and reports the summary line `SPEC_FULL.md` §7
//! specifies. `anyhow` is used only here, to add top-level context; every
//! library module returns a concrete typed `Result`.

use clap::Parser;
use nullderef_planner::cli::{Cli, Commands};
use nullderef_planner::error::{self, CliError, MapError};
use nullderef_planner::graph::{CallGraph, Preplan};
use nullderef_planner::project_map::ProjectMap;
use nullderef_planner::{aspects, codec, config, driver, explorer, fixpoint, harness, join, plan, stats};
use std::path::Path;
use std::sync::Arc;

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => log::LevelFilter::Info,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::new().filter_level(level).format_timestamp_millis().init();
}

/// Loads a graph either from a `preplan` artifact or by building it fresh
/// from a raw project map, per the `plan <preplan_or_map>` CLI contract.
fn load_graph_and_map(path: &Path, prune_statics: bool) -> Result<(CallGraph, ProjectMap), CliError> {
    let text = std::fs::read_to_string(path).map_err(|source| MapError::Io { path: path.to_path_buf(), source })?;

    if let Ok(preplan) = serde_json::from_str::<Preplan>(&text) {
        let km = preplan.to_project_map();
        let graph = CallGraph::from_preplan(&preplan);
        return Ok((graph, km));
    }

    let km: ProjectMap =
        serde_json::from_str(&text).map_err(|source| MapError::Json { path: path.to_path_buf(), source })?;
    let graph = CallGraph::build(&km, prune_statics);
    Ok((graph, km))
}

fn run_preplan(project_map: &Path, preplan_out: &Path, cfg: &config::Config) -> Result<(), CliError> {
    let km = ProjectMap::load(project_map)?;
    let graph = CallGraph::build(&km, cfg.prune_statics);
    graph.to_preplan(&km).save(preplan_out)?;
    log::info!("preplan: {} functions, {} edges", graph.num_nodes(), graph.num_edges());
    Ok(())
}

fn run_plan(
    preplan_or_map: &Path,
    plan_out: &Path,
    attempts: Option<usize>,
    seed: u64,
    cfg: &config::Config,
) -> Result<(), CliError> {
    let (graph, km) = load_graph_and_map(preplan_or_map, cfg.prune_statics)?;
    let (plan, stats) = plan::build_plan(Arc::new(graph), Arc::new(km), attempts.unwrap_or(cfg.attempts), seed);
    plan.save(plan_out)?;
    log::info!(
        "plan: {} object files, {} functions, {}/{} calls dropped",
        stats.object_files,
        stats.functions,
        stats.dropped,
        stats.calls
    );
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn run_run(
    analyzer_root: &Path,
    sources_root: &Path,
    plan_path: &Path,
    annotations: &Path,
    workdir: &Path,
    debug: bool,
    heap: Option<u32>,
    time: Option<u64>,
    timeout: Option<u64>,
    from_file: Option<usize>,
    generations: Option<u32>,
    cfg: &config::Config,
) -> Result<(), CliError> {
    let plan = plan::Plan::load(plan_path)?;
    std::fs::create_dir_all(workdir).map_err(|source| error::DriverError::Io { path: workdir.to_path_buf(), source })?;
    let changelog_path = workdir.join("changelog.jsonl");

    // The analyzer writes into a staging directory distinct from the
    // canonical annotations dir; the controller atomically renames into the
    // canonical location once a function's output is classified (§5).
    let driver_config = driver::DriverConfig {
        analyzer_root: analyzer_root.to_path_buf(),
        sources_root: sources_root.to_path_buf(),
        read_annotations_dir: annotations.to_path_buf(),
        write_annotations_dir: workdir.join("staging"),
        heap_mb: heap.unwrap_or(cfg.heap_mb),
        cpu_time_secs: time.unwrap_or(cfg.cpu_time_secs),
        wall_clock_timeout: std::time::Duration::from_secs(timeout.unwrap_or(cfg.wall_clock_timeout_secs)),
        debug,
    };

    let (state, tally, elapsed) = fixpoint::run(
        &plan,
        &driver_config,
        &changelog_path,
        generations.unwrap_or(cfg.generations),
        from_file,
    )?;

    log::info!(
        "run summary: {} successes, {} skipped, {} failures, {} errors, {} timeouts, elapsed {:?} (generation {})",
        tally.successes,
        tally.skipped,
        tally.failures,
        tally.errors,
        tally.timeouts,
        elapsed,
        state.generation,
    );
    Ok(())
}

fn run_collect(project_map: &Path, plan_path: &Path, annotations_dir: &Path, annotations_json: &Path) -> Result<(), CliError> {
    let km = ProjectMap::load(project_map)?;
    let plan = plan::Plan::load(plan_path)?;
    let annotations = codec::collect_annotations(&km, &plan, annotations_dir)?;
    let text = serde_json::to_string_pretty(&annotations)
        .map_err(|source| MapError::Json { path: annotations_json.to_path_buf(), source })?;
    std::fs::write(annotations_json, text).map_err(|source| MapError::Io { path: annotations_json.to_path_buf(), source })?;
    log::info!("collected annotations for {} functions", annotations.len());
    Ok(())
}

fn load_annotations(path: &Path) -> Result<codec::AnnotationDatabase, CliError> {
    let text = std::fs::read_to_string(path).map_err(|source| MapError::Io { path: path.to_path_buf(), source })?;
    serde_json::from_str(&text)
        .map_err(|source| CliError::from(MapError::Json { path: path.to_path_buf(), source }))
}

fn save_annotations(path: &Path, db: &codec::AnnotationDatabase) -> Result<(), CliError> {
    let text = serde_json::to_string_pretty(db).map_err(|source| MapError::Json { path: path.to_path_buf(), source })?;
    std::fs::write(path, text).map_err(|source| CliError::from(MapError::Io { path: path.to_path_buf(), source }))
}

fn run_join(a: &Path, b: &Path, out: &Path) -> Result<(), CliError> {
    let a = load_annotations(a)?;
    let b = load_annotations(b)?;
    let (joined, _stats, _mismatches) = join::join(&a, &b);
    save_annotations(out, &joined)
}

fn run_stats(project_map: &Path, plan_path: &Path, annotations: &Path) -> Result<(), CliError> {
    let km = ProjectMap::load(project_map)?;
    let plan = plan::Plan::load(plan_path)?;
    let annotations = load_annotations(annotations)?;
    stats::report(&plan, &km, &annotations);
    Ok(())
}

fn run_aspects(project_map: &Path, annotations: &Path, assert_out: &Path, assume_out: Option<&Path>) -> Result<(), CliError> {
    let km = ProjectMap::load(project_map)?;
    let annotations = load_annotations(annotations)?;
    let functions = aspects::collect_functions(&km, &annotations);
    let drivers = aspects::calling_drivers(&functions);
    aspects::report_drivers(&drivers, &functions, true);
    aspects::report_drivers(&drivers, &functions, false);

    aspects::write_aspects(&functions, assert_out, "assert")?;
    if let Some(assume_out) = assume_out {
        aspects::write_aspects(&functions, assume_out, "assume")?;
    }
    Ok(())
}

fn run_explore(project_map: &Path, plan_path: &Path, annotations_json: &Path, cmds: Option<&Path>) -> Result<(), CliError> {
    let km = ProjectMap::load(project_map)?;
    let plan = plan::Plan::load(plan_path)?;
    let annotations = load_annotations(annotations_json)?;
    let model = explorer::build_model(&km, &plan, &annotations);

    let stdout = std::io::stdout();
    match cmds {
        Some(path) => {
            let file =
                std::fs::File::open(path).map_err(|source| MapError::Io { path: path.to_path_buf(), source })?;
            explorer::run(&model, std::io::BufReader::new(file), stdout.lock())
        }
        None => explorer::run(&model, std::io::stdin().lock(), stdout.lock()),
    }
    .map_err(|e| CliError::Other(e.to_string()))
}

fn run_harness(fixtures: &Path, names: &[String]) -> Result<(), CliError> {
    let outcomes = harness::run_all(fixtures, names, "f1", &harness::stub_analyzer);
    let failed = outcomes.iter().filter(|o| !o.passed).count();
    if failed > 0 {
        return Err(CliError::Other(format!("{failed} fixture(s) failed")));
    }
    Ok(())
}

fn dispatch(cli: &Cli, cfg: &config::Config) -> Result<(), CliError> {
    match &cli.command {
        Commands::Preplan { project_map, preplan_out } => run_preplan(project_map, preplan_out, cfg),
        Commands::Plan { preplan_or_map, plan_out, attempts, seed } => {
            run_plan(preplan_or_map, plan_out, *attempts, *seed, cfg)
        }
        Commands::Run {
            analyzer_root,
            sources_root,
            plan,
            annotations,
            workdir,
            debug,
            heap,
            time,
            timeout,
            from_file,
            generations,
        } => run_run(
            analyzer_root,
            sources_root,
            plan,
            annotations,
            workdir,
            *debug,
            *heap,
            *time,
            *timeout,
            *from_file,
            *generations,
            cfg,
        ),
        Commands::Collect { project_map, plan, annotations_dir, annotations_json } => {
            run_collect(project_map, plan, annotations_dir, annotations_json)
        }
        Commands::Join { a, b, out } => run_join(a, b, out),
        Commands::Stats { project_map, plan, annotations } => run_stats(project_map, plan, annotations),
        Commands::Aspects { project_map, annotations, assert_out, assume_out } => {
            run_aspects(project_map, annotations, assert_out, assume_out.as_deref())
        }
        Commands::Explore { project_map, plan, annotations_json, cmds } => {
            run_explore(project_map, plan, annotations_json, cmds.as_deref())
        }
        Commands::Harness { fixtures, names } => run_harness(fixtures, names),
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbosity);

    let config = config::Config::load(cli.config.as_deref())?;

    if let Err(e) = dispatch(&cli, &config) {
        log::error!("{e}");
        anyhow::bail!(e);
    }

    Ok(())
}
