use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{bail, Context, Result};
use clap::Args;
use tracing::info;

use netbench::aggregate::DEFAULT_BASELINE;
use netbench::layout::format_value;
use netbench::orchestrator::{Orchestrator, ScenarioRun};
use netbench::scenario::Scenario;

use super::{plan, report, MatrixArgs};

#[derive(Args, Clone, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub matrix: MatrixArgs,

    // PRINT THE PLAN, DO NOT SPAWN ANYTHING
    #[arg(long)]
    pub dry_run: bool,

    // WRITE report.txt INTO EACH SCENARIO DIRECTORY WHEN IT FINISHES
    #[arg(long)]
    pub report: bool,

    // BASELINE IMPLEMENTATION FOR THE REPORT ("none" DISABLES)
    #[arg(long, default_value = DEFAULT_BASELINE)]
    pub report_relative_to: String,
}

pub fn run(args: &RunArgs, shutdown: &AtomicBool) -> Result<()> {
    let scenarios = args.matrix.scenarios()?;
    let orch = Orchestrator::new(args.matrix.runner_config()?, shutdown);

    if args.dry_run {
        return plan::print_plan(&orch, &scenarios, &args.matrix.out);
    }

    // EVERY CONFIGURATION ERROR SURFACES BEFORE THE FIRST SPAWN
    let mut total = 0;
    for sc in &scenarios {
        total += sc.expand()?.len();
        orch.ensure_binaries(sc)?;
    }

    println!("NETBENCH");
    println!("SCENARIOS:       {}", scenarios.len());
    println!("RUNS:            {}", total);
    println!("RESULTS:         {}", args.matrix.out.display());
    println!("RECEIVER HOST:   {}", orch.config().receiver.host());
    println!("CLIENT HOST:     {}", orch.config().client.host());
    println!("AUTO CPUS:       {}", orch.config().auto_cpus);
    println!();

    for sc in &scenarios {
        if shutdown.load(Ordering::Relaxed) {
            bail!("INTERRUPTED");
        }
        let result = orch
            .run_scenario(sc, &args.matrix.out)
            .with_context(|| format!("SCENARIO {} ABORTED", sc.name()))?;
        summarize(sc, &result);

        if args.report {
            let opts = report::options(&args.report_relative_to, &[], &[]);
            report::report_dir(&result.dir, &opts)?;
        }
    }

    info!("all scenarios complete");
    Ok(())
}

fn summarize(sc: &Scenario, result: &ScenarioRun) {
    let failed = result.outcomes.iter().filter(|o| !o.client_ok()).count();
    let exit = |code: Option<i32>| code.map_or_else(|| "SIGNAL".to_string(), |c| c.to_string());

    println!();
    println!("{}", "=".repeat(60));
    println!("SCENARIO {} COMPLETE", sc.name().to_uppercase());
    println!("{}", "=".repeat(60));
    println!(
        "{:<20} {:>12} {:>8} {:>8} {:>8}",
        "IMPL",
        sc.var_key().to_uppercase(),
        "CLIENT",
        "SERVER",
        "SECS"
    );
    println!(
        "{} {} {} {} {}",
        "-".repeat(20),
        "-".repeat(12),
        "-".repeat(8),
        "-".repeat(8),
        "-".repeat(8)
    );
    for o in &result.outcomes {
        println!(
            "{:<20} {:>12} {:>8} {:>8} {:>8.1}",
            o.implementation,
            format_value(o.value),
            exit(o.client_exit),
            exit(o.server_exit),
            o.elapsed.as_secs_f64()
        );
    }
    if failed > 0 {
        println!("CLIENT FAILURES: {}/{}", failed, result.outcomes.len());
    }
    println!("RESULTS: {}", result.dir.display());
    println!();
}
