//! Command-line surface and validated run configuration.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::error::ConfigError;
use crate::pool::PoolConfig;
use crate::sink::SinkMode;
use crate::types::{Task, numbered_tasks};

#[derive(Debug, Parser)]
#[command(name = "relay_pool")]
#[command(about = "Bounded task queue feeding a fixed pool of worker threads")]
#[command(version, args_conflicts_with_subcommands = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    #[command(flatten)]
    pub run: RunArgs,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the pool once (default when no subcommand is given)
    Run(RunArgs),
    /// Sweep worker and capacity sets and print validated CSV rows
    Stress(StressArgs),
}

#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    /// Queue capacity
    #[arg(long, default_value_t = 10)]
    pub capacity: usize,

    /// Number of worker threads
    #[arg(long, default_value_t = 5)]
    pub workers: usize,

    /// Generate tasks "Task 1" .. "Task N"
    #[arg(long, default_value_t = 10, conflicts_with = "task")]
    pub tasks: usize,

    /// Explicit task name; repeat for several tasks
    #[arg(long = "task")]
    pub task: Vec<String>,

    /// Result file, appended to
    #[arg(short, long, default_value = "output.txt")]
    pub output: PathBuf,

    /// Write progress logs to this file instead of stderr
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Simulated processing time per task in milliseconds
    #[arg(long, default_value_t = 1000)]
    pub work_ms: u64,

    #[arg(long, value_enum, default_value_t = SinkMode::PerWrite)]
    pub sink_mode: SinkMode,

    /// Empty the result file before the run
    #[arg(long)]
    pub truncate: bool,
}

#[derive(Debug, Clone, Args)]
pub struct StressArgs {
    /// Comma-separated worker counts
    #[arg(long, value_delimiter = ',', default_values_t = [1usize, 2, 4, 8])]
    pub worker_sets: Vec<usize>,

    /// Comma-separated queue capacities
    #[arg(long, value_delimiter = ',', default_values_t = [1usize, 4, 16])]
    pub capacity_sets: Vec<usize>,

    /// Tasks per run
    #[arg(long, default_value_t = 100)]
    pub tasks: usize,

    /// Simulated processing time per task in milliseconds
    #[arg(long, default_value_t = 0)]
    pub work_ms: u64,

    #[arg(long, value_enum, default_value_t = SinkMode::PerWrite)]
    pub sink_mode: SinkMode,
}

#[derive(Debug, Clone)]
pub struct RunConfig {
    pub pool: PoolConfig,
    pub output: PathBuf,
    pub log_file: Option<PathBuf>,
    pub work: Duration,
    pub sink_mode: SinkMode,
    pub truncate: bool,
}

impl RunArgs {
    /// Resolve the task list and validate sizes.
    pub fn into_config(self) -> Result<RunConfig, ConfigError> {
        let tasks: Vec<Task> = if self.task.is_empty() {
            numbered_tasks(self.tasks)
        } else {
            if let Some(name) = self.task.iter().find(|name| name.contains(['\n', '\r'])) {
                return Err(ConfigError::MultiLineTask(name.clone()));
            }
            self.task.into_iter().map(Task::new).collect()
        };
        let pool = PoolConfig {
            capacity: self.capacity,
            workers: self.workers,
            tasks,
        };
        pool.validate()?;
        Ok(RunConfig {
            pool,
            output: self.output,
            log_file: self.log_file,
            work: Duration::from_millis(self.work_ms),
            sink_mode: self.sink_mode,
            truncate: self.truncate,
        })
    }
}

#[derive(Debug, Clone)]
pub struct StressConfig {
    pub worker_sets: Vec<usize>,
    pub capacity_sets: Vec<usize>,
    pub tasks: usize,
    pub work: Duration,
    pub sink_mode: SinkMode,
}

impl StressArgs {
    pub fn into_config(self) -> Result<StressConfig, ConfigError> {
        if self.worker_sets.is_empty() || self.worker_sets.contains(&0) {
            return Err(ConfigError::InvalidSet(format!(
                "worker_sets must be > 0: {:?}",
                self.worker_sets
            )));
        }
        if self.capacity_sets.is_empty() || self.capacity_sets.contains(&0) {
            return Err(ConfigError::InvalidSet(format!(
                "capacity_sets must be > 0: {:?}",
                self.capacity_sets
            )));
        }
        Ok(StressConfig {
            worker_sets: self.worker_sets,
            capacity_sets: self.capacity_sets,
            tasks: self.tasks,
            work: Duration::from_millis(self.work_ms),
            sink_mode: self.sink_mode,
        })
    }
}
