use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use clap::builder::PossibleValuesParser;
use clap::Args;

use netbench::aggregate::{
    gather, gather_scenario, render_report, save_report, Filter, ReportOptions,
    ScenarioResults, DEFAULT_BASELINE, DEFAULT_PERCENTILES, METRIC_NAMES,
};

#[derive(Args, Clone, Debug)]
pub struct ReportArgs {
    // RESULTS ROOT TO SCAN
    #[arg(long, default_value = "results")]
    pub results_dir: PathBuf,

    // A SINGLE <scenario>_<timestamp> DIRECTORY INSTEAD OF THE WHOLE ROOT
    #[arg(long)]
    pub run_dir: Option<PathBuf>,

    // SCENARIO NAME OR DIRECTORY NAME (REPEATABLE)
    #[arg(long = "scenario")]
    pub scenario: Vec<String>,

    // IMPLEMENTATIONS TO INCLUDE, IN COLUMN ORDER (REPEATABLE)
    #[arg(long = "impl")]
    pub implementations: Vec<String>,

    // THROUGHPUT METRICS TO TABULATE (DEFAULT msgs_per_sec + bytes_per_sec)
    #[arg(long = "metric", value_parser = PossibleValuesParser::new(METRIC_NAMES))]
    pub metrics: Vec<String>,

    // LATENCY PERCENTILES (DEFAULT 50 90 99 99.9 99.99)
    #[arg(long = "percentile")]
    pub percentiles: Vec<f64>,

    // BASELINE IMPLEMENTATION FOR RELATIVE DELTAS ("none" DISABLES)
    #[arg(long, default_value = DEFAULT_BASELINE)]
    pub relative_to: String,

    // PRINT ONLY, DO NOT WRITE report.txt
    #[arg(long)]
    pub no_save: bool,
}

pub fn options(relative_to: &str, metrics: &[String], percentiles: &[f64]) -> ReportOptions {
    let defaults = ReportOptions::default();
    ReportOptions {
        baseline: (!relative_to.eq_ignore_ascii_case("none")).then(|| relative_to.to_string()),
        metrics: if metrics.is_empty() { defaults.metrics } else { metrics.to_vec() },
        percentiles: if percentiles.is_empty() {
            DEFAULT_PERCENTILES.to_vec()
        } else {
            percentiles.to_vec()
        },
    }
}

fn emit(sc: &ScenarioResults, opts: &ReportOptions, save: bool) -> Result<()> {
    let lines = render_report(sc, opts);
    for line in &lines {
        println!("{}", line);
    }
    if save {
        let path = save_report(sc, &lines)?;
        println!("\nSAVED TO {}", path.display());
    }
    Ok(())
}

// REPORT FOR ONE FRESHLY WRITTEN SCENARIO DIRECTORY
pub fn report_dir(dir: &Path, opts: &ReportOptions) -> Result<()> {
    match gather_scenario(dir, &Filter::default())? {
        Some(sc) => emit(&sc, opts, true),
        None => bail!("NO SCENARIO MANIFEST IN {}", dir.display()),
    }
}

pub fn run(args: &ReportArgs) -> Result<()> {
    let filter = Filter {
        scenarios: args.scenario.clone(),
        implementations: args.implementations.clone(),
    };
    let results = match &args.run_dir {
        Some(dir) => gather_scenario(dir, &filter)?.into_iter().collect(),
        None => gather(&args.results_dir, &filter)?,
    };
    if results.is_empty() {
        bail!("NO RESULTS FOUND UNDER {}", args.run_dir.as_ref().unwrap_or(&args.results_dir).display());
    }

    let opts = options(&args.relative_to, &args.metrics, &args.percentiles);
    for sc in &results {
        emit(sc, &opts, !args.no_save)?;
        println!();
    }
    Ok(())
}
