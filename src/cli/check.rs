use std::collections::BTreeSet;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::process::{Command, Stdio};

use anyhow::Result;

use netbench::config::{self, CLIENT_BINARY};
use netbench::orchestrator::{shell_quote, Transport};
use netbench::scenario::Mode;

use super::MatrixArgs;

fn check_tool(name: &str) -> bool {
    Command::new("which")
        .arg(name)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn is_executable(path: &Path) -> bool {
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

// BATCH MODE: A PASSWORD PROMPT COUNTS AS FAILURE
fn remote_test(host: &str, script: &str) -> bool {
    Command::new("ssh")
        .args(["-o", "BatchMode=yes", "-o", "ConnectTimeout=5", host, script])
        .stdin(Stdio::null())
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn check_binary(transport: &Transport, binary: &str) -> bool {
    let path = transport.binary_path(binary);
    if transport.is_local() {
        is_executable(&path)
    } else {
        let script = format!("test -x {}", shell_quote(&path.to_string_lossy()));
        remote_test(transport.host(), &script)
    }
}

pub fn run(args: &MatrixArgs) -> Result<()> {
    let scenarios = args.scenarios()?;
    let runner = args.runner_config()?;

    println!("NETBENCH DEPENDENCY CHECK");
    println!();

    let mut ok = true;
    let remote: BTreeSet<&str> = [&runner.receiver, &runner.client]
        .into_iter()
        .filter(|t| !t.is_local())
        .map(|t| t.host())
        .collect();

    if !remote.is_empty() {
        println!("REMOTE SHELL:");
        if !check_tool("ssh") {
            println!("  {:<24}MISSING", "ssh");
            ok = false;
        }
        for host in &remote {
            if remote_test(host, "true") {
                println!("  {:<24}OK", host);
            } else {
                println!("  {:<24}UNREACHABLE", host);
                ok = false;
            }
        }
        println!();
    }

    // (ROLE, BINARY) PAIRS EVERY SELECTED SCENARIO NEEDS
    let mut needed: BTreeSet<(&str, &'static str)> = BTreeSet::new();
    for sc in &scenarios {
        for implementation in sc.implementation_list() {
            let binary = config::server_binary(sc.run_mode(), implementation)?;
            needed.insert(("receiver", binary));
            if sc.run_mode() == Mode::Pingpong {
                needed.insert(("client", binary));
            }
        }
        if sc.run_mode() == Mode::ReceiverClient {
            needed.insert(("client", CLIENT_BINARY));
        }
    }

    println!("BINARIES:");
    for (side, binary) in &needed {
        let transport = if *side == "receiver" { &runner.receiver } else { &runner.client };
        let label = format!("{}@{}", binary, transport.host());
        if check_binary(transport, binary) {
            println!("  {:<40}OK", label);
        } else {
            println!("  {:<40}MISSING ({})", label, transport.binary_path(binary).display());
            ok = false;
        }
    }
    println!();

    if ok {
        println!("ALL CHECKS PASSED");
    } else {
        println!("SOME CHECKS FAILED");
        println!("  Build the benchmark apps or point --app-root at them");
        std::process::exit(1);
    }

    Ok(())
}
