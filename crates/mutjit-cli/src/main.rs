//! Command line front end for the mutation testing engine.

mod job;
mod telemetry;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use mutjit_core::{EngineConfig, SandboxKind};
use mutjit_engine::Driver;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "mutjit", version, about = "JIT mutation testing engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run mutation testing for a job file
    Run(RunArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Job file with modules, tests and optional configuration
    job: PathBuf,
    /// Number of worker threads
    #[arg(long, env = "MUTJIT_WORKERS")]
    workers: Option<usize>,
    /// Stop testing a mutant after the first test detects it
    #[arg(long)]
    fail_fast: bool,
    /// Lower bound of every per-test timeout
    #[arg(long)]
    timeout_floor_ms: Option<u64>,
    /// Run tests inside the worker instead of a forked child
    #[arg(long)]
    no_fork: bool,
    /// Mutate every source function instead of only traced ones
    #[arg(long)]
    no_call_tree: bool,
    /// Print the full report as JSON
    #[arg(long)]
    json: bool,
}

impl RunArgs {
    fn apply(&self, config: &mut EngineConfig) {
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if self.fail_fast {
            config.fail_fast = true;
        }
        if let Some(floor) = self.timeout_floor_ms {
            config.timeout_floor_ms = floor;
        }
        if self.no_fork {
            config.sandbox = SandboxKind::None;
        }
        if self.no_call_tree {
            config.call_tree = false;
        }
    }
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    telemetry::init_telemetry()?;

    match cli.command {
        Commands::Run(args) => run(args),
    }
}

fn run(args: RunArgs) -> Result<ExitCode> {
    let job = job::Job::load(&args.job)?;
    let mut config = job.config.clone();
    args.apply(&mut config);
    info!(job = %args.job.display(), modules = job.modules.len(), tests = job.tests.len(), "loaded job");

    let driver = Driver::new(config)?.with_operators(job.operators()?);
    let report = driver.run(job.units()?, job.tests())?;

    if args.json {
        println!("{}", report.to_json()?);
    } else {
        println!("{}", report.render_text());
    }

    if report.has_invalid() {
        error!(invalid = report.summary.invalid, "run produced invalid executions");
        return Ok(ExitCode::from(2));
    }
    Ok(ExitCode::SUCCESS)
}
