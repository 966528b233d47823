//! Single-run and stress-sweep runners for the worker pool.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::Dispatch;

use crate::config::{RunConfig, StressConfig};
use crate::error::{PoolError, SinkError};
use crate::logging::silent_dispatch;
use crate::pool::{Coordinator, PoolConfig, PoolSummary};
use crate::sink::truncate_output;
use crate::types::{Task, numbered_tasks, parse_result_line};
use crate::usage::format_seconds;
use crate::worker::SimulatedWork;

/// Run the pool once against the configured output file.
pub fn run_once(config: RunConfig, dispatch: Dispatch) -> Result<PoolSummary, PoolError> {
    if config.truncate {
        truncate_output(&config.output)?;
    }
    let sink = config.sink_mode.open(&config.output)?;
    let mut coordinator = Coordinator::new(config.pool, dispatch)?;
    coordinator.run(Arc::from(sink), Arc::new(SimulatedWork::new(config.work)))
}

/// Print the `RUN SUMMARY` block to stdout.
pub fn print_summary(summary: &PoolSummary) {
    println!("RUN SUMMARY");
    println!(
        "tasks_enqueued={} tasks_rejected={}",
        summary.enqueued,
        summary.rejected.len()
    );
    let per_worker: Vec<usize> = summary.reports.iter().map(|r| r.processed).collect();
    println!("tasks_per_worker_done={per_worker:?}");
    println!("tasks_processed={}", summary.processed());
    println!("write_failures={}", summary.write_failures());
    println!("cancelled={}", summary.cancelled());
    println!("elapsed_ms={}", summary.elapsed.as_millis());
    println!(
        "cpu_user_s={} cpu_sys_s={}",
        format_seconds(summary.cpu_user_s),
        format_seconds(summary.cpu_sys_s)
    );
}

/// What a result file looks like compared to the tasks that were enqueued.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct OutputCheck {
    pub lines: usize,
    pub malformed: usize,
    pub duplicates: usize,
    pub missing: usize,
}

impl OutputCheck {
    pub fn is_clean(&self, expected: usize) -> bool {
        self.lines == expected && self.malformed == 0 && self.duplicates == 0 && self.missing == 0
    }
}

/// Parse a result file and compare its task names against `expected`.
pub fn validate_output(path: &Path, expected: &[Task]) -> Result<OutputCheck, SinkError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(source) => {
            return Err(SinkError::Open {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    let mut check = OutputCheck::default();
    let mut seen = HashSet::new();
    for line in contents.lines() {
        check.lines += 1;
        match parse_result_line(line) {
            Some((_, task)) => {
                if !seen.insert(task) {
                    check.duplicates += 1;
                }
            }
            None => check.malformed += 1,
        }
    }
    check.missing = expected
        .iter()
        .filter(|task| !seen.contains(task.name()))
        .count();
    Ok(check)
}

fn stress_output_path(workers: usize, capacity: usize) -> PathBuf {
    std::env::temp_dir().join(format!(
        "relay_pool-stress-{}-w{workers}-c{capacity}.txt",
        std::process::id()
    ))
}

/// Sweep worker/capacity combinations and print one CSV row per run.
pub fn run_stress(config: StressConfig) -> Result<(), PoolError> {
    println!(
        "workers,capacity,total_tasks,elapsed_ms,throughput_tasks_per_s,cpu_user_s,cpu_sys_s,lines,malformed,duplicates,missing"
    );
    let tasks = numbered_tasks(config.tasks);
    for workers in config.worker_sets.iter().copied() {
        for capacity in config.capacity_sets.iter().copied() {
            let output = stress_output_path(workers, capacity);
            truncate_output(&output)?;
            let sink = config.sink_mode.open(&output)?;
            let pool = PoolConfig {
                capacity,
                workers,
                tasks: tasks.clone(),
            };
            let mut coordinator = Coordinator::new(pool, silent_dispatch())?;
            let result =
                coordinator.run(Arc::from(sink), Arc::new(SimulatedWork::new(config.work)));
            let check = validate_output(&output, &tasks);
            let _ = std::fs::remove_file(&output);
            let summary = result?;
            let check = check?;

            let elapsed_ms = summary.elapsed.as_secs_f64() * 1000.0;
            let throughput = if elapsed_ms > 0.0 {
                summary.processed() as f64 / (elapsed_ms / 1000.0)
            } else {
                0.0
            };
            println!(
                "{},{},{},{:.2},{:.2},{},{},{},{},{},{}",
                workers,
                capacity,
                tasks.len(),
                elapsed_ms,
                throughput,
                format_seconds(summary.cpu_user_s),
                format_seconds(summary.cpu_sys_s),
                check.lines,
                check.malformed,
                check.duplicates,
                check.missing
            );
            if !check.is_clean(tasks.len()) {
                eprintln!("# violation,output,workers={workers},capacity={capacity}");
            }
        }
    }
    Ok(())
}
