// pipeline.rs

use crate::error::Result;
use indicatif::ProgressBar;
use log::{debug, info, warn};
use rayon::prelude::*;
use std::fs;
use std::io;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::Instant;

/// Trees with fewer taxa than this also get subtree-pruning-regrafting (`-s`).
pub const SMALL_TREE_THRESHOLD: usize = 1000;

/// Four-taxon matrix used to check that the tree builder runs at all.
pub const TEST_DISTANCES: &str =
    "4\n1_1 0 0 0.2 0.25\n0_2 0 0 0.21 0.28\n3_1 0.2 0.21 0 0\n4_1 0.25 0.28 0 0";

/// Distance tree command for one matrix: `<tool> -i <in> -o <out> -N -w O [-s]`.
pub fn tree_command(tool: &str, input: &Path, output: &Path, n_taxa: usize) -> String {
    let mut command = format!(
        "{} -i {} -o {} -N -w O",
        tool,
        input.display(),
        output.display()
    );
    if n_taxa < SMALL_TREE_THRESHOLD {
        command.push_str(" -s");
    }
    command
}

#[derive(Clone, Debug)]
pub struct PipelineOptions {
    /// Maximum number of units (and so external processes) running at once.
    pub max_parallel: usize,
    pub hide_stdout: bool,
    pub progress: Option<ProgressBar>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            max_parallel: num_cpus::get(),
            hide_stdout: true,
            progress: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UnitOutcome {
    Completed,
    /// The command at `command_index` failed; later commands of the unit were skipped.
    Failed {
        command_index: usize,
        command: String,
        message: String,
    },
}

impl UnitOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, UnitOutcome::Completed)
    }
}

#[derive(Clone, Debug)]
pub struct PipelineSummary {
    /// One outcome per unit, in input order.
    pub outcomes: Vec<UnitOutcome>,
    pub failures: usize,
}

impl PipelineSummary {
    pub fn all_completed(&self) -> bool {
        self.failures == 0
    }
}

/// Runs one command through `sh -c`. On success returns what it wrote to stderr.
fn run_command(command: &str, hide_stdout: bool) -> std::result::Result<String, String> {
    let stdout = if hide_stdout {
        Stdio::null()
    } else {
        Stdio::inherit()
    };
    let output = Command::new("sh")
        .arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(stdout)
        .stderr(Stdio::piped())
        .output()
        .map_err(|e| format!("could not start: {}", e))?;
    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stderr).into_owned())
    } else {
        Err(format!(
            "{}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        ))
    }
}

/// Runs the commands of one unit in order, stopping at the first failure.
pub fn run_unit(commands: &[String], hide_stdout: bool) -> UnitOutcome {
    for (command_index, command) in commands.iter().enumerate() {
        debug!("Running: {}", command);
        if let Err(message) = run_command(command, hide_stdout) {
            return UnitOutcome::Failed {
                command_index,
                command: command.clone(),
                message,
            };
        }
    }
    UnitOutcome::Completed
}

/// Runs independent units of ordered shell commands, at most
/// `options.max_parallel` at a time. A failing command only ends its own unit.
pub fn run_ordered(units: &[Vec<String>], options: &PipelineOptions) -> Result<PipelineSummary> {
    let start = Instant::now();
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(options.max_parallel.max(1))
        .build()?;
    info!(
        "Running {} command units with up to {} in parallel...",
        units.len(),
        options.max_parallel.max(1)
    );

    let progress = options.progress.as_ref();
    let outcomes: Vec<UnitOutcome> = pool.install(|| {
        units
            .par_iter()
            .map(|unit| {
                let outcome = run_unit(unit, options.hide_stdout);
                if let Some(pb) = progress {
                    pb.inc(1);
                }
                outcome
            })
            .collect()
    });
    if let Some(pb) = progress {
        pb.finish_and_clear();
    }

    let mut failures = 0;
    for (unit, outcome) in outcomes.iter().enumerate() {
        if let UnitOutcome::Failed {
            command_index,
            command,
            message,
        } = outcome
        {
            failures += 1;
            warn!(
                "Unit {} failed at command {} `{}`: {}",
                unit, command_index, command, message
            );
        }
    }
    if failures > 0 {
        warn!("{} of {} command units failed.", failures, units.len());
    }
    info!("Command units finished in {:.2?}.", start.elapsed());
    Ok(PipelineSummary { outcomes, failures })
}

fn remove_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Runs `tool` on a small known matrix in `scratch_dir` and reports whether
/// it exited cleanly, wrote nothing to stderr and wrote a tree. Scratch files
/// are removed afterwards.
pub fn check_tree_builder(tool: &str, scratch_dir: &Path) -> Result<bool> {
    let test_path = scratch_dir.join("SimpleTest.phy");
    let tree_path = scratch_dir.join("SimpleTest.tre");
    let stat_path = scratch_dir.join("SimpleTest.phy_fastme_stat.txt");
    fs::write(&test_path, TEST_DISTANCES)?;
    remove_if_present(&tree_path)?;

    let command = format!("{} -i {} -o {}", tool, test_path.display(), tree_path.display());
    debug!("Checking tree builder: {}", command);
    let ran = match run_command(&command, true) {
        Ok(stderr) if !stderr.trim().is_empty() => {
            debug!("Tree builder check wrote to stderr: {}", stderr.trim());
            false
        }
        Ok(_) => tree_path.exists(),
        Err(message) => {
            debug!("Tree builder check failed: {}", message);
            false
        }
    };

    remove_if_present(&test_path)?;
    remove_if_present(&tree_path)?;
    remove_if_present(&stat_path)?;
    Ok(ran)
}
