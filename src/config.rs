// NETBENCH CONFIGURATION
// BUILT-IN SCENARIOS, TOML SCENARIO FILES, LAYERED OVERRIDES, AND THE
// IMPLEMENTATION -> BINARY CATALOG.
//
// OVERRIDES NEVER MUTATE A SCENARIO IN PLACE: EACH LAYER (GLOBAL, THEN
// PER-SCENARIO) PRODUCES A NEW BASE PARAMETER SET AND A NEW SCENARIO.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::params::{ParameterSet, Value};
use crate::scenario::{Linkage, Mode, Scenario};

// ---------------------------------------------------------------------------
// IMPLEMENTATION CATALOG
// ---------------------------------------------------------------------------

pub const CLIENT_BINARY: &str = "client";

const RECEIVER_BINARIES: &[(&str, &str)] = &[
    ("uring", "uring_receiver"),
    ("asio", "asio_receiver"),
    ("asio_uring", "asio_uring_receiver"),
    ("asio_ioctx_mt", "asio_ioctx_mt_receiver"),
    ("asio_uring_ioctx_mt", "asio_uring_ioctx_mt_receiver"),
    ("bsd", "bsd_receiver"),
];

const PINGPONG_BINARIES: &[(&str, &str)] = &[
    ("uring", "uring_pingpong"),
    ("asio", "asio_pingpong"),
    ("bsd", "bsd_pingpong"),
];

fn lookup(table: &[(&str, &'static str)], implementation: &str) -> Option<&'static str> {
    table
        .iter()
        .find(|(name, _)| *name == implementation)
        .map(|(_, bin)| *bin)
}

pub fn receiver_binary(implementation: &str) -> Option<&'static str> {
    lookup(RECEIVER_BINARIES, implementation)
}

pub fn pingpong_binary(implementation: &str) -> Option<&'static str> {
    lookup(PINGPONG_BINARIES, implementation)
}

// BINARY FOR THE SERVER SIDE OF A RUN (RECEIVER OR ACCEPTOR). THE PINGPONG
// INITIATOR IS THE SAME BINARY STARTED WITH --initiator.
pub fn server_binary(mode: Mode, implementation: &str) -> Result<&'static str> {
    let found = match mode {
        Mode::ReceiverClient => receiver_binary(implementation),
        Mode::Pingpong => pingpong_binary(implementation),
    };
    found.ok_or_else(|| Error::UnknownImplementation(implementation.to_string()))
}

pub fn implementations(mode: Mode) -> Vec<&'static str> {
    let table = match mode {
        Mode::ReceiverClient => RECEIVER_BINARIES,
        Mode::Pingpong => PINGPONG_BINARIES,
    };
    table.iter().map(|(name, _)| *name).collect()
}

// ---------------------------------------------------------------------------
// BUILT-IN SCENARIOS
// ---------------------------------------------------------------------------

fn senders_match_workers(p: &ParameterSet) -> f64 {
    p.number("workers").unwrap_or(1.0)
}

// PINGPONG BUFFERS MUST HOLD A WHOLE MESSAGE
fn buffer_fits_message(p: &ParameterSet) -> f64 {
    let msg = p.number("msg_size").unwrap_or(0.0);
    let buf = p.number("buffer_size").unwrap_or(0.0);
    msg.max(buf)
}

fn base_fields(overrides: &[(&str, Value)]) -> Result<ParameterSet> {
    let mut base = ParameterSet::default();
    base.set("address", Value::Str("127.0.0.1:19004".into()))?;
    base.set("max_send_batch_size", Value::Int(1024))?;
    for (name, value) in overrides {
        base.set(name, value.clone())?;
    }
    Ok(base)
}

pub fn default_scenarios() -> Result<Vec<Scenario>> {
    Ok(vec![
        Scenario::new("receive_throughput_by_threads", "workers")
            .title("Receive Throughput by Threads (msg_sz=32, buf_size=32)")
            .base(base_fields(&[])?)
            .values([1.0, 2.0, 4.0, 8.0])
            .implementations(["bsd", "uring", "asio", "asio_uring"])
            .link("senders", Linkage::func("senders_match_workers", senders_match_workers)),
        Scenario::new("receive_throughput_by_connections", "conns")
            .title("Receive Throughput by Connections (msg_sz=32, buf_sz=1024)")
            .base(base_fields(&[
                ("buffer_size", Value::Int(1024)),
                ("senders", Value::Int(4)),
                ("max_send_batch_size", Value::Int(4)),
            ])?)
            .values([1.0, 32.0, 128.0, 256.0])
            .implementations(["bsd", "uring", "asio", "asio_uring"]),
        Scenario::new("pingpong_latency_by_msg_size", "msg_size")
            .title("Ping-Pong Latency by Message Size")
            .mode(Mode::Pingpong)
            .base(base_fields(&[("duration_sec", Value::Int(5))])?)
            .values([32.0, 256.0, 1024.0, 4096.0])
            .implementations(["bsd", "uring", "asio"])
            .link("buffer_size", Linkage::func("buffer_fits_message", buffer_fits_message)),
    ])
}

// ---------------------------------------------------------------------------
// SCENARIO FILES (TOML)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ScenarioFile {
    #[serde(default)]
    scenario: Vec<ScenarioEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ScenarioEntry {
    name: String,
    title: Option<String>,
    #[serde(default)]
    mode: Mode,
    var_key: String,
    var_values: Vec<f64>,
    implementations: Vec<String>,
    #[serde(default)]
    fixed: BTreeMap<String, toml::Value>,
    #[serde(default)]
    linkages: BTreeMap<String, String>,
    #[serde(default)]
    impl_extra: BTreeMap<String, Vec<String>>,
}

fn toml_scalar(field: &str, value: &toml::Value) -> Result<String> {
    match value {
        toml::Value::String(s) => Ok(s.clone()),
        toml::Value::Integer(i) => Ok(i.to_string()),
        toml::Value::Float(f) => Ok(f.to_string()),
        toml::Value::Boolean(b) => Ok(b.to_string()),
        other => Err(Error::InvalidValue {
            field: field.to_string(),
            value: other.to_string(),
            reason: "expected a scalar".into(),
        }),
    }
}

impl ScenarioEntry {
    fn build(self) -> Result<Scenario> {
        let mut base = ParameterSet::default();
        for (field, value) in &self.fixed {
            base.set_parsed(field, &toml_scalar(field, value)?)?;
        }
        let mut sc = Scenario::new(&self.name, &self.var_key)
            .mode(self.mode)
            .base(base)
            .values(self.var_values)
            .implementations(self.implementations);
        if let Some(title) = &self.title {
            sc = sc.title(title);
        }
        for (implementation, args) in &self.impl_extra {
            let args: Vec<&str> = args.iter().map(String::as_str).collect();
            sc = sc.impl_extra(implementation, &args);
        }
        for (target, formula) in &self.linkages {
            sc = sc.link(target, Linkage::formula(formula)?);
        }
        sc.validate()?;
        Ok(sc)
    }
}

pub fn parse_scenarios(raw: &str) -> Result<Vec<Scenario>> {
    let file: ScenarioFile = toml::from_str(raw)?;
    file.scenario.into_iter().map(ScenarioEntry::build).collect()
}

pub fn load_scenarios(path: Option<&Path>) -> Result<Vec<Scenario>> {
    match path {
        Some(path) => {
            let raw = fs::read_to_string(path)?;
            let scenarios = parse_scenarios(&raw)?;
            info!(path = %path.display(), count = scenarios.len(), "loaded scenario file");
            Ok(scenarios)
        }
        None => default_scenarios(),
    }
}

// ---------------------------------------------------------------------------
// LAYERED OVERRIDES
// ---------------------------------------------------------------------------

// "key=value" -> (key, value), BOTH TRIMMED
pub fn split_assignment(item: &str) -> Option<(String, String)> {
    let (k, v) = item.split_once('=')?;
    let k = k.trim();
    if k.is_empty() {
        return None;
    }
    Some((k.to_string(), v.trim().to_string()))
}

// "scenario:rest" -> (scenario, rest)
pub fn split_scoped(item: &str) -> Option<(String, String)> {
    let (sc, rest) = item.split_once(':')?;
    let sc = sc.trim();
    if sc.is_empty() {
        return None;
    }
    Some((sc.to_string(), rest.to_string()))
}

/// Parses a sweep list: `1,2,4` (CSV of numbers), `8` (one number) or
/// `start..end[:step]` (inclusive integer range, step defaults to +-1).
// start..end[:step], INTEGERS, END INCLUSIVE
static RANGE_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^\s*(-?\d+)\s*\.\.\s*(-?\d+)(?::\s*(-?\d+)\s*)?$").ok());
pub const MAX_RANGE_VALUES: usize = 10_000;

pub fn parse_value_list(spec: &str) -> Result<Vec<f64>> {
    let bad = |reason: &str| Error::InvalidValue {
        field: "var_values".into(),
        value: spec.to_string(),
        reason: reason.to_string(),
    };
    let s = spec.trim();
    if s.is_empty() {
        return Ok(Vec::new());
    }
    if s.contains(',') {
        return s
            .split(',')
            .map(str::trim)
            .filter(|x| !x.is_empty())
            .map(|x| x.parse::<f64>().map_err(|_| bad("invalid CSV list")))
            .collect();
    }
    let range = RANGE_RE.as_ref().ok_or_else(|| bad("range pattern failed to compile"))?;
    if let Some(caps) = range.captures(s) {
        let num = |i: usize| -> Result<Option<i64>> {
            caps.get(i)
                .map(|m| m.as_str().parse::<i64>().map_err(|_| bad("range bound out of range")))
                .transpose()
        };
        let start = num(1)?.unwrap_or(0);
        let end = num(2)?.unwrap_or(0);
        let step = num(3)?.unwrap_or(if end >= start { 1 } else { -1 });
        if step == 0 {
            return Err(bad("range step cannot be 0"));
        }
        let span = i128::from(end) - i128::from(start);
        let count = if span.signum() * i128::from(step.signum()) < 0 {
            0
        } else {
            span / i128::from(step) + 1
        };
        if count > MAX_RANGE_VALUES as i128 {
            return Err(bad(&format!("range expands to more than {} values", MAX_RANGE_VALUES)));
        }
        let mut vals = Vec::with_capacity(count as usize);
        let mut next = Some(start);
        while let Some(i) = next {
            if (step > 0 && i > end) || (step < 0 && i < end) {
                break;
            }
            vals.push(i as f64);
            next = i.checked_add(step);
        }
        return Ok(vals);
    }
    s.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .map(|v| vec![v])
        .ok_or_else(|| bad("expected CSV, a number, or start..end[:step]"))
}

#[derive(Clone, Debug, Default)]
pub struct Overrides {
    global: Vec<(String, String)>,
    scoped: Vec<(String, String, String)>,
    var_values: Vec<(String, Vec<f64>)>,
}

impl Overrides {
    /// Builds the override layers from raw CLI items. Malformed items are
    /// reported and skipped; malformed var-value specs are errors.
    pub fn from_items(fixed: &[String], scenario_fixed: &[String], var_values: &[String]) -> Result<Self> {
        let mut out = Self::default();
        for item in fixed {
            match split_assignment(item) {
                Some(kv) => out.global.push(kv),
                None => warn!("ignoring --fixed without key=value: {}", item),
            }
        }
        for item in scenario_fixed {
            match split_scoped(item).and_then(|(sc, kv)| split_assignment(&kv).map(|(k, v)| (sc, k, v))) {
                Some(t) => out.scoped.push(t),
                None => warn!("ignoring --scenario-fixed (need scenario:key=value): {}", item),
            }
        }
        for item in var_values {
            match split_scoped(item) {
                Some((sc, spec)) => out.var_values.push((sc, parse_value_list(&spec)?)),
                None => warn!("ignoring --scenario-var-values (need scenario:spec): {}", item),
            }
        }
        Ok(out)
    }

    pub fn global(mut self, key: &str, value: &str) -> Self {
        self.global.push((key.to_string(), value.to_string()));
        self
    }

    pub fn scoped(mut self, scenario: &str, key: &str, value: &str) -> Self {
        self.scoped
            .push((scenario.to_string(), key.to_string(), value.to_string()));
        self
    }

    pub fn values(mut self, scenario: &str, values: Vec<f64>) -> Self {
        self.var_values.push((scenario.to_string(), values));
        self
    }

    fn layer(base: &ParameterSet, layer: &[(&str, &str)], origin: &str) -> Result<ParameterSet> {
        let mut next = base.clone();
        for (key, value) in layer {
            if !next.contains(key) {
                warn!("no parameter named '{}', ignoring {} override", key, origin);
                continue;
            }
            next.set_parsed(key, value)?;
        }
        Ok(next)
    }

    pub fn apply(&self, scenarios: &[Scenario]) -> Result<Vec<Scenario>> {
        for (name, _) in &self.var_values {
            if !scenarios.iter().any(|s| s.name() == name) {
                warn!("scenario '{}' not found for --scenario-var-values", name);
            }
        }
        let global: Vec<(&str, &str)> = self
            .global
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();

        scenarios
            .iter()
            .map(|sc| {
                let scoped: Vec<(&str, &str)> = self
                    .scoped
                    .iter()
                    .filter(|(name, _, _)| name == sc.name())
                    .map(|(_, k, v)| (k.as_str(), v.as_str()))
                    .collect();
                let base = Self::layer(sc.fixed(), &global, "--fixed")?;
                let base = Self::layer(&base, &scoped, "--scenario-fixed")?;
                let mut next = sc.with_base(base);
                if let Some((_, vals)) = self.var_values.iter().rev().find(|(n, _)| n == sc.name()) {
                    next = next.with_values(vals.clone());
                }
                Ok(next)
            })
            .collect()
    }
}

/// Keeps only the named scenarios (all when `names` is empty) and restricts each
/// to the listed implementations (all when `impls` is empty). Scenarios left
/// with no implementation are dropped.
pub fn select(scenarios: Vec<Scenario>, names: &[String], impls: &[String]) -> Result<Vec<Scenario>> {
    for name in names {
        if !scenarios.iter().any(|s| s.name() == name) {
            return Err(Error::InvalidScenario {
                name: name.clone(),
                reason: "no such scenario".into(),
            });
        }
    }
    Ok(scenarios
        .into_iter()
        .filter(|s| names.is_empty() || names.iter().any(|n| n == s.name()))
        .filter_map(|s| {
            if impls.is_empty() {
                return Some(s);
            }
            let kept: Vec<String> = s
                .implementation_list()
                .iter()
                .filter(|i| impls.contains(i))
                .cloned()
                .collect();
            if kept.is_empty() {
                info!(scenario = s.name(), "no selected implementation, skipping");
                None
            } else {
                Some(s.with_implementations(kept))
            }
        })
        .collect())
}

/// Parses `impl=token` items into per-implementation extra receiver arguments.
pub fn parse_impl_args(items: &[String]) -> Result<BTreeMap<String, Vec<String>>> {
    let mut out: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for item in items {
        let Some((implementation, token)) = item.split_once('=') else {
            warn!("ignoring --impl-arg without '=': {}", item);
            continue;
        };
        let implementation = implementation.trim();
        if receiver_binary(implementation).is_none() && pingpong_binary(implementation).is_none() {
            return Err(Error::UnknownImplementation(implementation.to_string()));
        }
        out.entry(implementation.to_string())
            .or_default()
            .push(token.to_string());
    }
    Ok(out)
}
