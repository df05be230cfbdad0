// NETBENCH SUBCOMMANDS
// MatrixArgs IS THE SHARED "WHAT TO RUN, WHERE" SURFACE OF run, plan AND check.

pub mod check;
pub mod cpus;
pub mod plan;
pub mod report;
pub mod run;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::Args;

use netbench::config::{self, Overrides};
use netbench::orchestrator::{RunnerConfig, Transport, LOCAL_HOST};
use netbench::scenario::Scenario;

#[derive(Args, Clone, Debug)]
pub struct MatrixArgs {
    // TOML SCENARIO FILE (BUILT-IN SCENARIOS WHEN ABSENT)
    #[arg(long)]
    pub scenarios: Option<PathBuf>,

    // SCENARIO NAMES TO INCLUDE (REPEATABLE, DEFAULT ALL)
    #[arg(long = "scenario")]
    pub scenario: Vec<String>,

    // IMPLEMENTATIONS TO INCLUDE (REPEATABLE, DEFAULT ALL)
    #[arg(long = "impl")]
    pub implementations: Vec<String>,

    // key=value OVERRIDE FOR EVERY SCENARIO
    #[arg(long = "fixed", alias = "fixed-params")]
    pub fixed: Vec<String>,

    // scenario:key=value OVERRIDE FOR ONE SCENARIO
    #[arg(long)]
    pub scenario_fixed: Vec<String>,

    // scenario:SPEC SWEEP VALUES (CSV, NUMBER, OR start..end[:step])
    #[arg(long)]
    pub scenario_var_values: Vec<String>,

    // DIRECTORY HOLDING THE BENCHMARK BINARIES
    #[arg(long, default_value = "build/release/app")]
    pub app_root: PathBuf,

    // RECEIVER/ACCEPTOR BINARY DIRECTORY (OVERRIDES --app-root)
    #[arg(long)]
    pub receiver_app_root: Option<PathBuf>,

    // CLIENT/INITIATOR BINARY DIRECTORY (OVERRIDES --app-root)
    #[arg(long)]
    pub client_app_root: Option<PathBuf>,

    // RECEIVER HOST: "local" OR AN SSH TARGET
    #[arg(long, default_value = LOCAL_HOST)]
    pub receiver_host: String,

    // CLIENT HOST: "local" OR AN SSH TARGET
    #[arg(long, default_value = LOCAL_HOST)]
    pub client_host: String,

    // impl=TOKEN EXTRA RECEIVER ARGUMENT (REPEATABLE, ORDER KEPT)
    #[arg(long, allow_hyphen_values = true)]
    pub impl_arg: Vec<String>,

    // EXTRA CLIENT ARGUMENT TOKEN (REPEATABLE, ORDER KEPT)
    #[arg(long, allow_hyphen_values = true)]
    pub client_arg: Vec<String>,

    // PIN UNSET CPU FIELDS OF LOCAL ROLES FROM THE TOPOLOGY
    #[arg(long)]
    pub auto_cpus: bool,

    // DELAY BETWEEN SERVER START AND CLIENT START
    #[arg(long, default_value_t = 1000)]
    pub settle_delay_ms: u64,

    // HOW LONG THE SERVER GETS TO EXIT ON ITS OWN AFTER THE CLIENT
    #[arg(long, default_value_t = 15)]
    pub shutdown_timeout_secs: u64,

    // RESULTS ROOT
    #[arg(long, default_value = "results")]
    pub out: PathBuf,
}

impl MatrixArgs {
    /// Loads, overrides, selects and validates the scenarios to run.
    pub fn scenarios(&self) -> Result<Vec<Scenario>> {
        let loaded = config::load_scenarios(self.scenarios.as_deref())?;
        let overrides = Overrides::from_items(&self.fixed, &self.scenario_fixed, &self.scenario_var_values)?;
        let applied = overrides.apply(&loaded)?;
        let selected = config::select(applied, &self.scenario, &self.implementations)?;
        if selected.is_empty() {
            bail!("NO SCENARIOS SELECTED");
        }
        for sc in &selected {
            sc.validate()?;
        }
        Ok(selected)
    }

    pub fn runner_config(&self) -> Result<RunnerConfig> {
        let receiver_root = self.receiver_app_root.as_ref().unwrap_or(&self.app_root);
        let client_root = self.client_app_root.as_ref().unwrap_or(&self.app_root);
        Ok(RunnerConfig {
            receiver: Transport::new(&self.receiver_host, receiver_root),
            client: Transport::new(&self.client_host, client_root),
            settle_delay: Duration::from_millis(self.settle_delay_ms),
            shutdown_timeout: Duration::from_secs(self.shutdown_timeout_secs),
            impl_extra: config::parse_impl_args(&self.impl_arg)?,
            client_extra: self.client_arg.clone(),
            auto_cpus: self.auto_cpus,
        })
    }
}
