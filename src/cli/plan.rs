use std::path::Path;
use std::sync::atomic::AtomicBool;

use anyhow::Result;
use chrono::Utc;

use netbench::layout::{format_value, scenario_dir_name, ScenarioLayout};
use netbench::orchestrator::Orchestrator;
use netbench::scenario::Scenario;

use super::MatrixArgs;

pub fn run(args: &MatrixArgs, shutdown: &AtomicBool) -> Result<()> {
    let scenarios = args.scenarios()?;
    let orch = Orchestrator::new(args.runner_config()?, shutdown);
    print_plan(&orch, &scenarios, &args.out)
}

// DRY RUN: EVERY RUN'S RESOLVED COMMAND LINES, NOTHING WRITTEN OR SPAWNED
pub fn print_plan(orch: &Orchestrator, scenarios: &[Scenario], out: &Path) -> Result<()> {
    let now = Utc::now();
    let mut total = 0;
    for sc in scenarios {
        let plans = sc.expand()?;
        let layout = ScenarioLayout::open(&out.join(scenario_dir_name(sc.name(), now)));
        let values: Vec<String> = sc.var_values().iter().map(|v| format_value(*v)).collect();

        println!("{}", "=".repeat(72));
        println!("SCENARIO: {} ({})", sc.name(), sc.display_title());
        println!("{}", "=".repeat(72));
        println!("  MODE:            {}", sc.run_mode());
        println!("  SWEEP:           {} = [{}]", sc.var_key(), values.join(", "));
        println!("  IMPLEMENTATIONS: {}", sc.implementation_list().join(", "));
        for (target, link) in sc.linkages() {
            println!("  LINKAGE:         {} = {}", target, link.token());
        }
        println!("  DIRECTORY:       {}", layout.dir().display());
        if let Err(e) = orch.ensure_binaries(sc) {
            println!("  WARNING:         {}", e);
        }
        println!("{}", "-".repeat(72));

        for plan in &plans {
            let run_dir = layout.run_dir(&plan.implementation, sc.var_key(), plan.value);
            let cmds = orch.prepare(sc, plan, &run_dir)?;
            println!("[{}] {}={}", plan.implementation, sc.var_key(), format_value(plan.value));
            println!("  {:<10} {}", cmds.server_role.label().to_uppercase(), cmds.server.render());
            println!("  {:<10} {}", cmds.client_role.label().to_uppercase(), cmds.client.render());
        }
        println!();
        total += plans.len();
    }
    println!("TOTAL RUNS: {}", total);
    Ok(())
}
