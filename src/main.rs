mod config;
mod error;
mod logging;
mod pool;
mod sim;
mod sink;
mod task_queue;
mod types;
mod usage;
mod worker;

use anyhow::{Context, Result};
use clap::Parser;

use config::{Cli, Command, RunArgs};
use logging::{LogTarget, build_dispatch};

fn run(args: RunArgs) -> Result<()> {
    let config = args.into_config()?;
    let target = match config.log_file.as_deref() {
        Some(path) => LogTarget::File(path),
        None => LogTarget::Console,
    };
    let dispatch = build_dispatch(target.clone())
        .with_context(|| format!("failed to open log destination {target:?}"))?;
    let summary = sim::run_once(config, dispatch)?;
    sim::print_summary(&summary);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Some(Command::Run(args)) => run(args),
        Some(Command::Stress(args)) => {
            sim::run_stress(args.into_config()?)?;
            Ok(())
        }
        None => run(cli.run),
    }
}
