// NETBENCH PROCESS ORCHESTRATOR
// RUNS ONE SCENARIO'S MATRIX STRICTLY SEQUENTIALLY. PER RUN:
//
//   1. SPAWN SERVER (RECEIVER / ACCEPTOR)
//   2. SETTLE DELAY (NO READINESS HANDSHAKE: A FIXED SLEEP)
//   3. RUN CLIENT (CLIENT / INITIATOR) TO COMPLETION
//   4. WAIT FOR THE SERVER TO EXIT ON ITS OWN
//   5. PAST THE SHUTDOWN TIMEOUT: KILL THE SERVER GROUP, FAIL THE SCENARIO
//
// THE RESOLVED COMMAND LINE IS WRITTEN TO <stem>.cmd BEFORE EVERY SPAWN.
// A NON-ZERO CLIENT EXIT IS LOGGED AND THE MATRIX CONTINUES.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::affinity::{format_cpu_list, parse_cpu_list, CpuTopology};
use crate::config::{self, CLIENT_BINARY};
use crate::error::{Error, Result};
use crate::layout::{provenance_path, stdout_path, ScenarioLayout, ScenarioManifest};
use crate::params::{ParameterSet, Value};
use crate::process::ManagedProcess;
use crate::scenario::{Mode, RunPlan, Scenario};

pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(15);
pub const LOCAL_HOST: &str = "local";

const SETTLE_POLL: Duration = Duration::from_millis(50);

// ---------------------------------------------------------------------------
// COMMAND LINES
// ---------------------------------------------------------------------------

fn is_shell_safe(c: char) -> bool {
    c.is_ascii_alphanumeric() || "@%+=:,./_-".contains(c)
}

// POSIX SHELL QUOTING: SAFE WORDS PASS THROUGH, EVERYTHING ELSE IS SINGLE-QUOTED
pub fn shell_quote(s: &str) -> Cow<'_, str> {
    if s.is_empty() {
        return Cow::Borrowed("''");
    }
    if s.chars().all(is_shell_safe) {
        return Cow::Borrowed(s);
    }
    Cow::Owned(format!("'{}'", s.replace('\'', r#"'"'"'"#)))
}

fn shell_join<'a>(words: impl IntoIterator<Item = &'a str>) -> String {
    words
        .into_iter()
        .map(shell_quote)
        .collect::<Vec<_>>()
        .join(" ")
}

/// A fully resolved process invocation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LaunchSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
}

impl LaunchSpec {
    // PROVENANCE TEXT: THE ARGV AS A PASTEABLE SHELL LINE
    pub fn render(&self) -> String {
        shell_join(std::iter::once(self.program.as_str()).chain(self.args.iter().map(String::as_str)))
    }

    pub fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }
        cmd
    }
}

/// Where one role runs: `local`, or an ssh target.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transport {
    host: String,
    app_dir: PathBuf,
}

impl Transport {
    pub fn new(host: &str, app_dir: &Path) -> Self {
        let app_dir = if host == LOCAL_HOST && app_dir.is_relative() {
            std::env::current_dir()
                .map(|cwd| cwd.join(app_dir))
                .unwrap_or_else(|_| app_dir.to_path_buf())
        } else {
            app_dir.to_path_buf()
        };
        Self {
            host: host.to_string(),
            app_dir,
        }
    }

    pub fn local(app_dir: &Path) -> Self {
        Self::new(LOCAL_HOST, app_dir)
    }

    pub fn is_local(&self) -> bool {
        self.host == LOCAL_HOST
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn app_dir(&self) -> &Path {
        &self.app_dir
    }

    pub fn binary_path(&self, binary: &str) -> PathBuf {
        self.app_dir.join(binary)
    }

    // LOCAL: EXEC app_dir/bin IN THE RUN DIR. REMOTE: THE SAME ARGV INSIDE ssh.
    pub fn launch(&self, binary: &str, args: Vec<String>, run_dir: &Path) -> LaunchSpec {
        if self.is_local() {
            return LaunchSpec {
                program: self.binary_path(binary).to_string_lossy().into_owned(),
                args,
                cwd: Some(run_dir.to_path_buf()),
            };
        }
        let app_dir = self.app_dir.to_string_lossy();
        let remote = format!(
            "cd {} && ./{} {}",
            shell_quote(&app_dir),
            shell_quote(binary),
            shell_join(args.iter().map(String::as_str))
        );
        LaunchSpec {
            program: "ssh".to_string(),
            args: vec![self.host.clone(), remote],
            cwd: None,
        }
    }
}

// ---------------------------------------------------------------------------
// ROLES AND ARGUMENT CONTRACTS
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Receiver,
    Client,
    Acceptor,
    Initiator,
}

impl Role {
    pub fn label(self) -> &'static str {
        match self {
            Self::Receiver => "receiver",
            Self::Client => "client",
            Self::Acceptor => "acceptor",
            Self::Initiator => "initiator",
        }
    }

    // STEM OF THE .cmd / .stdout FILES IN THE RUN DIRECTORY
    pub fn file_stem(self, implementation: &str) -> String {
        match self {
            Self::Receiver => format!("receiver_{}", implementation),
            Self::Client => CLIENT_BINARY.to_string(),
            Self::Acceptor => format!("pingpong_acceptor_{}", implementation),
            Self::Initiator => format!("pingpong_initiator_{}", implementation),
        }
    }
}

fn push(args: &mut Vec<String>, flag: &str, value: impl ToString) {
    args.push(flag.to_string());
    args.push(value.to_string());
}

fn push_tags(args: &mut Vec<String>, tags: &[(String, String)]) {
    for (k, v) in tags {
        push(args, "--tag", format!("{}={}", k, v));
    }
}

pub fn receiver_args(
    implementation: &str,
    p: &ParameterSet,
    run_dir: &Path,
    tags: &[(String, String)],
    extra: &[String],
) -> Result<Vec<String>> {
    let mut args = Vec::new();
    push(&mut args, "--address", p.str("address")?);
    push(&mut args, "--buffer-size", p.int("buffer_size")?);
    push(&mut args, "--workers", p.int("workers")?);
    push(&mut args, "--results-dir", run_dir.display());
    push(&mut args, "--metric-hud-interval-secs", p.int("metric_hud_interval_secs")?);
    push(
        &mut args,
        "--collect-latency-every-n-samples",
        p.int("collect_latency_every_n_samples")?,
    );
    args.push("--shutdown-on-disconnect".to_string());

    if p.flag("busy_spin")? {
        push(&mut args, "--busy-spin", "true");
    }
    if p.int("recv_so_rcvbuf")? > 0 {
        push(&mut args, "--so-rcvbuf", p.int("recv_so_rcvbuf")?);
    }
    if p.int("send_so_sndbuf")? > 0 {
        push(&mut args, "--so-sndbuf", p.int("send_so_sndbuf")?);
    }
    let echo = p.str("echo")?;
    if echo != "none" {
        push(&mut args, "--echo", echo);
    }

    match implementation {
        "bsd" => {
            if p.int("bsd_read_limit")? > 0 {
                push(&mut args, "--read-limit", p.int("bsd_read_limit")?);
            }
        }
        "uring" => {
            if p.int("uring_buffer_count")? > 0 {
                push(&mut args, "--buffer-count", p.int("uring_buffer_count")?);
            }
            if p.flag("uring_per_conn_buffer_pool")? {
                push(&mut args, "--per-connection-buffer-pool", "true");
            }
            if p.flag("uring_zerocopy")? {
                push(&mut args, "--zerocopy", "true");
            }
            // 0 / -1 LEAVE THE RECEIVER'S OWN QUEUE SIZES
            if p.int("uring_sq_entries")? > 0 {
                push(&mut args, "--sq-entries", p.int("uring_sq_entries")?);
            }
            if p.int("uring_cq_entries")? > 0 {
                push(&mut args, "--cq-entries", p.int("uring_cq_entries")?);
            }
        }
        _ => {}
    }

    if let Some(cpus) = p.opt_str("worker_cpus")? {
        push(&mut args, "--worker-cpu-ids", cpus);
    }
    push_tags(&mut args, tags);
    args.extend(extra.iter().cloned());
    Ok(args)
}

pub fn client_args(p: &ParameterSet, tags: &[(String, String)], extra: &[String]) -> Result<Vec<String>> {
    let mut args = Vec::new();
    push(&mut args, "--address", p.str("address")?);
    push(&mut args, "--senders", p.int("senders")?);
    push(&mut args, "--conns", p.int("conns")?);
    push(&mut args, "--msg-size", p.int("msg_size")?);
    push(&mut args, "--msgs-per-sec", p.int("msgs_per_sec")?);
    push(&mut args, "--stop-after-n-secs", p.int("duration_sec")?);
    push(&mut args, "--max-batch-size", p.int("max_send_batch_size")?);
    push(&mut args, "--metric-hud-interval-secs", p.int("metric_hud_interval_secs")?);
    if p.flag("drain")? {
        args.push("--drain".to_string());
    }
    if p.flag("nodelay")? {
        args.push("--nodelay".to_string());
    }
    if let Some(cpus) = p.opt_str("sender_cpus")? {
        push(&mut args, "--sender-cpu-ids", cpus);
    }
    push_tags(&mut args, tags);
    args.extend(extra.iter().cloned());
    Ok(args)
}

pub fn acceptor_args(implementation: &str, p: &ParameterSet, extra: &[String]) -> Result<Vec<String>> {
    let mut args = Vec::new();
    push(&mut args, "--address", p.str("address")?);
    push(&mut args, "--buffer-size", p.int("buffer_size")?);
    if let Some(cpu) = p.opt_int("pp_acceptor_cpu")? {
        push(&mut args, "--cpu-id", cpu);
    }
    if implementation == "uring" {
        if let Some(cpu) = p.opt_int("pp_acceptor_sqpoll_cpu")? {
            push(&mut args, "--sqpoll-cpu-id", cpu);
        }
        if p.int("pp_uring_sq_entries")? > 0 {
            push(&mut args, "--sq-entries", p.int("pp_uring_sq_entries")?);
        }
    }
    args.extend(extra.iter().cloned());
    Ok(args)
}

pub fn initiator_args(
    implementation: &str,
    p: &ParameterSet,
    run_dir: &Path,
    tags: &[(String, String)],
    extra: &[String],
) -> Result<Vec<String>> {
    let mut args = vec!["--initiator".to_string()];
    push(&mut args, "--address", p.str("address")?);
    push(&mut args, "--msg-size", p.int("msg_size")?);
    push(&mut args, "--buffer-size", p.int("buffer_size")?);
    push(&mut args, "--warmup-count", p.int("warmup_count")?);
    push(&mut args, "--duration-secs", p.int("duration_sec")?);
    push(&mut args, "--max-samples", p.int("max_samples")?);
    push(&mut args, "--target-msg-rate", p.int("msgs_per_sec")?);
    push(&mut args, "--metric-hud-interval-secs", p.int("metric_hud_interval_secs")?);
    push(&mut args, "--results-dir", run_dir.display());
    if let Some(cpu) = p.opt_int("pp_initiator_cpu")? {
        push(&mut args, "--cpu-id", cpu);
    }
    if implementation == "uring" {
        if let Some(cpu) = p.opt_int("pp_initiator_sqpoll_cpu")? {
            push(&mut args, "--sqpoll-cpu-id", cpu);
        }
    }
    push_tags(&mut args, tags);
    args.extend(extra.iter().cloned());
    Ok(args)
}

// ---------------------------------------------------------------------------
// RUNNER
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct RunnerConfig {
    pub receiver: Transport,
    pub client: Transport,
    pub settle_delay: Duration,
    pub shutdown_timeout: Duration,
    pub impl_extra: BTreeMap<String, Vec<String>>,
    pub client_extra: Vec<String>,
    pub auto_cpus: bool,
}

impl RunnerConfig {
    pub fn local(app_dir: &Path) -> Self {
        Self {
            receiver: Transport::local(app_dir),
            client: Transport::local(app_dir),
            settle_delay: DEFAULT_SETTLE_DELAY,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            impl_extra: BTreeMap::new(),
            client_extra: Vec::new(),
            auto_cpus: false,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "receiver_host": self.receiver.host(),
            "client_host": self.client.host(),
            "receiver_app_dir": self.receiver.app_dir().display().to_string(),
            "client_app_dir": self.client.app_dir().display().to_string(),
            "settle_delay_secs": self.settle_delay.as_secs_f64(),
            "shutdown_timeout_secs": self.shutdown_timeout.as_secs_f64(),
            "impl_extra_args": self.impl_extra,
            "client_extra_args": self.client_extra,
            "auto_cpus": self.auto_cpus,
        })
    }
}

/// Both command lines of one run, after CPU assignment.
#[derive(Clone, Debug)]
pub struct RunCommands {
    pub params: ParameterSet,
    pub server_role: Role,
    pub server: LaunchSpec,
    pub client_role: Role,
    pub client: LaunchSpec,
}

#[derive(Clone, Debug)]
pub struct RunOutcome {
    pub implementation: String,
    pub value: f64,
    pub run_dir: PathBuf,
    pub client_exit: Option<i32>,
    pub server_exit: Option<i32>,
    pub elapsed: Duration,
}

impl RunOutcome {
    pub fn client_ok(&self) -> bool {
        self.client_exit == Some(0)
    }
}

#[derive(Clone, Debug)]
pub struct ScenarioRun {
    pub dir: PathBuf,
    pub outcomes: Vec<RunOutcome>,
}

pub struct Orchestrator<'a> {
    config: RunnerConfig,
    topology: Option<CpuTopology>,
    shutdown: &'a AtomicBool,
}

impl<'a> Orchestrator<'a> {
    pub fn new(config: RunnerConfig, shutdown: &'a AtomicBool) -> Self {
        let topology = config.auto_cpus.then(CpuTopology::detect);
        Self {
            config,
            topology,
            shutdown,
        }
    }

    pub fn with_topology(mut self, topology: CpuTopology) -> Self {
        self.topology = Some(topology);
        self
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    fn server_extra(&self, sc: &Scenario, implementation: &str) -> Vec<String> {
        let mut extra = sc.extra_args(implementation).to_vec();
        if let Some(more) = self.config.impl_extra.get(implementation) {
            extra.extend(more.iter().cloned());
        }
        extra
    }

    // EVERY IMPLEMENTATION RESOLVES AND EVERY LOCAL BINARY EXISTS. NOTHING IS SPAWNED.
    pub fn ensure_binaries(&self, sc: &Scenario) -> Result<()> {
        let mut missing = Vec::new();
        let mut check = |transport: &Transport, binary: &str| {
            let path = transport.binary_path(binary);
            if transport.is_local() && !path.exists() && !missing.contains(&path) {
                missing.push(path);
            }
        };
        for implementation in sc.implementation_list() {
            let binary = config::server_binary(sc.run_mode(), implementation)?;
            check(&self.config.receiver, binary);
            if sc.run_mode() == Mode::Pingpong {
                check(&self.config.client, binary);
            }
        }
        if sc.run_mode() == Mode::ReceiverClient {
            check(&self.config.client, CLIENT_BINARY);
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::MissingBinary(missing))
        }
    }

    /// Fills unset CPU pin fields for roles running on this host. The client
    /// side never reuses the server side's CPUs when both are local.
    pub fn assign_cpus(&self, mode: Mode, params: &mut ParameterSet) -> Result<()> {
        let Some(topo) = &self.topology else {
            return Ok(());
        };
        let server_local = self.config.receiver.is_local();
        let client_local = self.config.client.is_local();

        match mode {
            Mode::ReceiverClient => {
                if server_local && params.opt_str("worker_cpus")?.is_none() {
                    let n = params.int("workers")?.max(0) as usize;
                    let cpus = topo.choose_cpus(n, &[]);
                    if !cpus.is_empty() {
                        params.set("worker_cpus", Value::OptStr(Some(format_cpu_list(&cpus))))?;
                    }
                }
                if client_local && params.opt_str("sender_cpus")?.is_none() {
                    let exclude = if server_local {
                        params
                            .opt_str("worker_cpus")?
                            .and_then(parse_cpu_list)
                            .unwrap_or_default()
                    } else {
                        Vec::new()
                    };
                    let n = params.int("senders")?.max(0) as usize;
                    let cpus = topo.choose_cpus(n, &exclude);
                    if !cpus.is_empty() {
                        params.set("sender_cpus", Value::OptStr(Some(format_cpu_list(&cpus))))?;
                    }
                }
            }
            Mode::Pingpong => {
                if server_local && params.opt_int("pp_acceptor_cpu")?.is_none() {
                    if let Some(&cpu) = topo.choose_cpus(1, &[]).first() {
                        params.set("pp_acceptor_cpu", Value::OptInt(Some(cpu as i64)))?;
                    }
                }
                if client_local && params.opt_int("pp_initiator_cpu")?.is_none() {
                    let exclude: Vec<u32> = if server_local {
                        params
                            .opt_int("pp_acceptor_cpu")?
                            .and_then(|c| u32::try_from(c).ok())
                            .into_iter()
                            .collect()
                    } else {
                        Vec::new()
                    };
                    if let Some(&cpu) = topo.choose_cpus(1, &exclude).first() {
                        params.set("pp_initiator_cpu", Value::OptInt(Some(cpu as i64)))?;
                    }
                }
            }
        }
        Ok(())
    }

    pub fn prepare(&self, sc: &Scenario, plan: &RunPlan, run_dir: &Path) -> Result<RunCommands> {
        let mut params = plan.params.clone();
        self.assign_cpus(sc.run_mode(), &mut params)?;

        let implementation = plan.implementation.as_str();
        let binary = config::server_binary(sc.run_mode(), implementation)?;
        let tags = sc.tags(plan);
        let server_extra = self.server_extra(sc, implementation);

        let cmds = match sc.run_mode() {
            Mode::ReceiverClient => {
                let server = receiver_args(implementation, &params, run_dir, &tags, &server_extra)?;
                let client = client_args(&params, &tags, &self.config.client_extra)?;
                RunCommands {
                    server_role: Role::Receiver,
                    server: self.config.receiver.launch(binary, server, run_dir),
                    client_role: Role::Client,
                    client: self.config.client.launch(CLIENT_BINARY, client, run_dir),
                    params,
                }
            }
            Mode::Pingpong => {
                let server = acceptor_args(implementation, &params, &server_extra)?;
                let mut client_extra = server_extra;
                client_extra.extend(self.config.client_extra.iter().cloned());
                let client = initiator_args(implementation, &params, run_dir, &tags, &client_extra)?;
                RunCommands {
                    server_role: Role::Acceptor,
                    server: self.config.receiver.launch(binary, server, run_dir),
                    client_role: Role::Initiator,
                    client: self.config.client.launch(binary, client, run_dir),
                    params,
                }
            }
        };
        Ok(cmds)
    }

    // PROVENANCE FIRST, THEN SPAWN WITH STDOUT+STDERR CAPTURED
    fn launch(&self, role: Role, stem: &str, spec: &LaunchSpec, run_dir: &Path) -> Result<ManagedProcess> {
        fs::write(provenance_path(run_dir, stem), spec.render())?;
        let log = File::create(stdout_path(run_dir, stem))?;
        let mut cmd = spec.command();
        cmd.stdin(Stdio::null())
            .stdout(Stdio::from(log.try_clone()?))
            .stderr(Stdio::from(log));
        debug!(role = role.label(), cmd = %spec.render(), "launching");
        ManagedProcess::spawn(role.label(), cmd)
    }

    fn settle(&self) -> Result<()> {
        let deadline = Instant::now() + self.config.settle_delay;
        while Instant::now() < deadline {
            if self.shutdown.load(Ordering::Relaxed) {
                return Err(Error::Interrupted);
            }
            std::thread::sleep(SETTLE_POLL.min(deadline.saturating_duration_since(Instant::now())));
        }
        Ok(())
    }

    /// Executes one run. `Err` is fatal to the scenario: spawn failures, a
    /// server that outlives the shutdown timeout, or an interrupt.
    pub fn execute(&self, sc: &Scenario, plan: &RunPlan, run_dir: &Path) -> Result<RunOutcome> {
        let cmds = self.prepare(sc, plan, run_dir)?;
        let implementation = plan.implementation.as_str();
        let start = Instant::now();

        let server_stem = cmds.server_role.file_stem(implementation);
        let server = self.launch(cmds.server_role, &server_stem, &cmds.server, run_dir)?;
        self.settle()?;

        let client_stem = cmds.client_role.file_stem(implementation);
        let mut client = self.launch(cmds.client_role, &client_stem, &cmds.client, run_dir)?;
        let status = client.wait_until_exit(self.shutdown)?;
        if !status.success() {
            warn!(
                implementation,
                value = plan.value,
                "{} exited with {}",
                cmds.client_role.label(),
                status
            );
        }

        let server_status = server.shutdown(self.config.shutdown_timeout)?;
        if !server_status.success() {
            debug!(implementation, "{} exited with {}", cmds.server_role.label(), server_status);
        }

        Ok(RunOutcome {
            implementation: plan.implementation.clone(),
            value: plan.value,
            run_dir: run_dir.to_path_buf(),
            client_exit: status.code(),
            server_exit: server_status.code(),
            elapsed: start.elapsed(),
        })
    }

    pub fn run_scenario(&self, sc: &Scenario, results_root: &Path) -> Result<ScenarioRun> {
        // CONFIGURATION ERRORS SURFACE HERE, BEFORE ANY DIRECTORY OR PROCESS
        let plans = sc.expand()?;
        self.ensure_binaries(sc)?;

        let layout = ScenarioLayout::create(results_root, sc.name(), Utc::now())?;
        layout.write_manifest(&ScenarioManifest::from_scenario(sc))?;
        layout.write_runner(&self.config.to_json())?;
        info!(scenario = sc.name(), runs = plans.len(), dir = %layout.dir().display(), "scenario start");

        let mut outcomes = Vec::with_capacity(plans.len());
        for plan in &plans {
            if self.shutdown.load(Ordering::Relaxed) {
                return Err(Error::Interrupted);
            }
            let run_dir = layout.create_run_dir(&plan.implementation, sc.var_key(), plan.value)?;
            info!(
                scenario = sc.name(),
                implementation = %plan.implementation,
                "{}={}",
                sc.var_key(),
                plan.value
            );
            let outcome = self.execute(sc, plan, &run_dir)?;
            debug!(elapsed = ?outcome.elapsed, "run complete");
            outcomes.push(outcome);
        }

        info!(scenario = sc.name(), dir = %layout.dir().display(), "scenario finished");
        Ok(ScenarioRun {
            dir: layout.dir().to_path_buf(),
            outcomes,
        })
    }
}
