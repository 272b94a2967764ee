//! Component H: the analyzer driver.
//!
//! Grounded on `examples/original_source/scripts/null-deref/run.py`
//! (`write_object_file_plan`, `run`): the per-unit invocation shape, the
//! "print a status line per unit" idiom (here routed through `log::info!`),
//! and the outcome-classification sentinel string are all kept exactly.

use crate::error::DriverError;
use crate::plan::UnitPlan;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

const SUCCESS_SENTINEL: &str = "Verification result: UNKNOWN, incomplete analysis.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
    Error,
    TimedOut,
}

pub struct InvocationResult {
    pub outcome: Outcome,
    pub elapsed: Duration,
    pub log: String,
}

/// Resource caps and paths the driver needs to invoke the analyzer once.
pub struct DriverConfig {
    pub analyzer_root: PathBuf,
    pub sources_root: PathBuf,
    pub read_annotations_dir: PathBuf,
    pub write_annotations_dir: PathBuf,
    pub heap_mb: u32,
    pub cpu_time_secs: u64,
    pub wall_clock_timeout: Duration,
    pub debug: bool,
}

/// Writes the ad hoc unit-plan text file the analyzer reads, per
/// `SPEC_FULL.md` §6.
pub fn write_unit_plan_file(unit: &UnitPlan, path: &Path) -> Result<(), DriverError> {
    let mut out = String::new();
    out.push_str(&format!("File {}\n", unit.object_file));
    for function in &unit.functions {
        out.push_str(&format!("Function {}\n", function.name));
        for called in &function.called_functions {
            out.push_str(&format!("  Calls {} {}\n", called.name, called.object_file));
        }
    }
    std::fs::write(path, out).map_err(|source| DriverError::Io { path: path.to_path_buf(), source })
}

fn build_args(unit: &UnitPlan, plan_path: &Path, config: &DriverConfig) -> Vec<String> {
    let entry_function = unit
        .functions
        .first()
        .map(|f| f.name.as_str())
        .unwrap_or("");
    let source_path = config
        .sources_root
        .join(&unit.object_file)
        .join(Path::new(&unit.object_file).file_name().unwrap_or_default());

    let mut args = vec![
        "-config".to_string(),
        "config/ldv-deref.properties".to_string(),
        "-spec".to_string(),
        "config/specification/default.spc".to_string(),
        source_path.display().to_string(),
        "-setprop".to_string(),
        format!(
            "nullDerefArgAnnotationAlgorithm.readAnnotationDirectory={}",
            config.read_annotations_dir.display()
        ),
        "-setprop".to_string(),
        format!(
            "nullDerefArgAnnotationAlgorithm.writeAnnotationDirectory={}",
            config.write_annotations_dir.display()
        ),
        "-setprop".to_string(),
        format!("analysis.entryFunction={entry_function}"),
        "-setprop".to_string(),
        format!("nullDerefArgAnnotationAlgorithm.plan={}", plan_path.display()),
        "-setprop".to_string(),
        format!("limits.heap={}MB", config.heap_mb),
        "-setprop".to_string(),
        format!("limits.time.cpu={}s", config.cpu_time_secs),
        "-setprop".to_string(),
        "parser.usePreprocessor=true".to_string(),
    ];

    if config.debug {
        args.extend([
            "-setprop".to_string(),
            "nullDerefArgAnnotationAlgorithm.distinctTempSpecNames=true".to_string(),
            "-setprop".to_string(),
            "log.consoleLevel=ALL".to_string(),
            "-setprop".to_string(),
            "log.consoleExclude=CONFIG".to_string(),
        ]);
    }

    args
}

fn wait_with_timeout(mut child: Child, timeout: Duration) -> Result<(bool, Option<i32>, Child), DriverError> {
    let start = Instant::now();
    loop {
        match child.try_wait().map_err(DriverError::Spawn)? {
            Some(status) => return Ok((false, status.code(), child)),
            None => {
                if start.elapsed() >= timeout {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Ok((true, None, child));
                }
                std::thread::sleep(Duration::from_millis(50));
            }
        }
    }
}

/// Reads `pipe` to completion on its own thread, so a verbose child (e.g.
/// `--debug`'s `log.consoleLevel=ALL`) can't block in `write()` on a full
/// pipe buffer while `wait_with_timeout` is busy-polling `try_wait` instead
/// of reading.
fn spawn_drain<R>(pipe: Option<R>) -> std::thread::JoinHandle<String>
where
    R: std::io::Read + Send + 'static,
{
    std::thread::spawn(move || {
        let mut buf = String::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_string(&mut buf);
        }
        buf
    })
}

/// Invokes the external analyzer once on `unit`, writing the ad hoc plan
/// file to `plan_path` first. Classifies the outcome per `SPEC_FULL.md` §4.H
/// and returns the captured log regardless of outcome.
pub fn invoke(unit: &UnitPlan, plan_path: &Path, config: &DriverConfig) -> Result<InvocationResult, DriverError> {
    let log_dir = config.write_annotations_dir.join(&unit.object_file);
    std::fs::create_dir_all(&log_dir).map_err(|source| DriverError::Io { path: log_dir.clone(), source })?;
    let log_path = log_dir.join("log.txt");

    write_unit_plan_file(unit, plan_path)?;

    let args = build_args(unit, plan_path, config);
    log::info!(
        "analysing object file {} ({} functions)",
        unit.object_file,
        unit.functions.len()
    );
    log::debug!("RUN scripts/cpa.sh {}", args.join(" "));

    let start = Instant::now();
    let mut child = Command::new("scripts/cpa.sh")
        .args(&args)
        .current_dir(&config.analyzer_root)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(DriverError::Spawn)?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let stdout_handle = spawn_drain(stdout);
    let stderr_handle = spawn_drain(stderr);

    let (timed_out, status_code, mut child) = wait_with_timeout(child, config.wall_clock_timeout)?;
    let elapsed = start.elapsed();

    let mut log = stdout_handle.join().unwrap_or_default();
    log.push_str(&stderr_handle.join().unwrap_or_default());
    let _ = child.wait();

    let mut log_file = std::fs::File::create(&log_path).map_err(|source| DriverError::Io { path: log_path.clone(), source })?;
    let _ = writeln!(log_file, "RUN scripts/cpa.sh {}\n", args.join(" "));
    let _ = log_file.write_all(log.as_bytes());

    let outcome = if timed_out {
        Outcome::TimedOut
    } else if status_code != Some(0) {
        Outcome::Error
    } else if log.contains(SUCCESS_SENTINEL) {
        Outcome::Success
    } else {
        Outcome::Failure
    };

    log::info!("{} - {:?}, took {:?}", unit.object_file, outcome, elapsed);
    log::debug!("captured log for {}:\n{}", unit.object_file, log);

    Ok(InvocationResult { outcome, elapsed, log })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{CalledFunction, PlanFunction};

    #[test]
    fn unit_plan_file_matches_the_documented_grammar() {
        let unit = UnitPlan {
            object_file: "a.o".to_string(),
            functions: vec![PlanFunction {
                name: "f1".to_string(),
                called_functions: vec![CalledFunction { name: "f2".to_string(), object_file: "a.o".to_string() }],
            }],
        };
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("unit_plan.txt");
        write_unit_plan_file(&unit, &path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "File a.o\nFunction f1\n  Calls f2 a.o\n");
    }
}
