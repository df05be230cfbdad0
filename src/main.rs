// NETBENCH -- NETWORK STACK EXPERIMENT RUNNER
// SWEEPS ONE PARAMETER PER SCENARIO ACROSS IMPLEMENTATIONS, LAUNCHES A
// RECEIVER/CLIENT (OR PINGPONG ACCEPTOR/INITIATOR) PAIR PER RUN, AND READS
// THE RESULTS BACK INTO REPORTS.

mod cli;

use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

#[derive(Parser)]
#[command(name = "netbench")]
#[command(about = "NETBENCH -- NETWORK STACK EXPERIMENT RUNNER")]
struct Cli {
    // DEBUG-LEVEL LOGGING (RUST_LOG OVERRIDES)
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Execute scenarios and write results
    Run(cli::run::RunArgs),
    /// Print the expanded run matrix with resolved command lines
    Plan(cli::MatrixArgs),
    /// Aggregate a results root into text reports
    Report(cli::report::ReportArgs),
    /// Show CPU topology and the affinity choice for N CPUs
    Cpus(cli::cpus::CpusArgs),
    /// Verify binaries and remote shell access
    Check(cli::MatrixArgs),
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    ctrlc::set_handler(move || {
        SHUTDOWN.store(true, Ordering::Relaxed);
    })?;

    match cli.command {
        Command::Run(args) => cli::run::run(&args, &SHUTDOWN),
        Command::Plan(args) => cli::plan::run(&args, &SHUTDOWN),
        Command::Report(args) => cli::report::run(&args),
        Command::Cpus(args) => cli::cpus::run(&args),
        Command::Check(args) => cli::check::run(&args),
    }
}
