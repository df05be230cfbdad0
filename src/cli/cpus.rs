// CPU TOPOLOGY AND AFFINITY PREVIEW
// PRINTS WHAT --auto-cpus WOULD PIN ON THIS HOST

use anyhow::{bail, Result};
use clap::Args;

use netbench::affinity::{format_cpu_list, parse_cpu_list, CpuTopology};

#[derive(Args, Clone, Debug)]
pub struct CpusArgs {
    // HOW MANY CPUS TO CHOOSE
    pub count: usize,

    // CPU LIST TO LEAVE OUT ("0-3,8")
    #[arg(long)]
    pub exclude: Option<String>,
}

pub fn run(args: &CpusArgs) -> Result<()> {
    let exclude = match args.exclude.as_deref() {
        Some(spec) => match parse_cpu_list(spec) {
            Some(list) => list,
            None => bail!("INVALID CPU LIST: {}", spec),
        },
        None => Vec::new(),
    };

    let topo = CpuTopology::detect();
    let cores = topo.cores();
    println!("AVAILABLE:       {} ({} CPUS)", format_cpu_list(topo.available()), topo.available().len());
    println!("CORES:           {}", cores.len());
    println!();
    println!("{:>8} {:>8}  {}", "CORE", "PRIMARY", "SIBLINGS");
    println!("{} {}  {}", "-".repeat(8), "-".repeat(8), "-".repeat(20));
    for (i, core) in cores.iter().enumerate() {
        let siblings: Vec<u32> = core.members.iter().copied().filter(|&c| c != core.primary).collect();
        // PRIMARY IN PARENTHESES: OUTSIDE THE AFFINITY MASK
        let primary = if core.members.contains(&core.primary) {
            core.primary.to_string()
        } else {
            format!("({})", core.primary)
        };
        println!("{:>8} {:>8}  {}", i, primary, format_cpu_list(&siblings));
    }
    println!();

    let chosen = topo.choose_cpus(args.count, &exclude);
    if !exclude.is_empty() {
        println!("EXCLUDED:        {}", format_cpu_list(&exclude));
    }
    println!("CHOSEN ({}/{}):    {}", chosen.len(), args.count, format_cpu_list(&chosen));
    Ok(())
}
