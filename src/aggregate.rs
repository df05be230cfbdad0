// NETBENCH RESULTS AGGREGATOR
// READS A RESULTS ROOT BACK: PER-RUN metrics.json TOTALS, MACHINE CAPTION FROM
// metadata.json, MERGED *.hdr LATENCY HISTOGRAMS. ANY FILE THAT FAILS TO PARSE
// SKIPS ITS RUN WITH A WARNING, NEVER THE WHOLE REPORT.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::Result;
use crate::hdr::{self, Histogram};
use crate::layout::{
    format_value, parse_run_dir_name, ScenarioManifest, METADATA_FILE, METRICS_FILE,
    REPORT_FILE, SCENARIO_MANIFEST,
};

pub const DEFAULT_PERCENTILES: [f64; 5] = [50.0, 90.0, 99.0, 99.9, 99.99];
pub const METRIC_NAMES: [&str; 3] = ["msgs_per_sec", "bytes_per_sec", "ops_per_sec"];
pub const DEFAULT_BASELINE: &str = "bsd";

const NS_PER_SEC: f64 = 1e9;
const NS_PER_US: f64 = 1e3;

// SUMMED WORKER COUNTERS FROM ONE metrics.json
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MetricsTotals {
    pub bytes: u64,
    pub msgs: u64,
    pub ops: u64,
    pub begin_ns: Option<i64>,
    pub end_ns: Option<i64>,
}

impl MetricsTotals {
    // OBSERVED SPAN IN SECONDS, None UNLESS end > begin
    pub fn span_sec(&self) -> Option<f64> {
        match (self.begin_ns, self.end_ns) {
            (Some(b), Some(e)) if e > b => {
                Some((i128::from(e) - i128::from(b)) as f64 / NS_PER_SEC)
            }
            _ => None,
        }
    }
}

fn counter(entry: &Value, key: &str) -> u64 {
    match entry.get(key) {
        Some(v) => v.as_u64().or_else(|| v.as_f64().map(|f| f.max(0.0) as u64)).unwrap_or(0),
        None => 0,
    }
}

fn timestamp(entry: &Value, key: &str) -> i64 {
    match entry.get(key) {
        Some(v) => v.as_i64().or_else(|| v.as_f64().map(|f| f as i64)).unwrap_or(0),
        None => 0,
    }
}

pub fn parse_metrics(raw: &str) -> Result<MetricsTotals> {
    let entries: Vec<Value> = serde_json::from_str(raw)?;
    let mut t = MetricsTotals::default();
    for m in &entries {
        // TOTALS SATURATE, NEVER WRAP
        t.bytes = t.bytes.saturating_add(counter(m, "bytes"));
        t.msgs = t.msgs.saturating_add(counter(m, "msgs"));
        t.ops = t.ops.saturating_add(counter(m, "ops"));
        let (b, e) = (timestamp(m, "begin_ts"), timestamp(m, "end_ts"));
        t.begin_ns = Some(t.begin_ns.map_or(b, |x| x.min(b)));
        t.end_ns = Some(t.end_ns.map_or(e, |x| x.max(e)));
    }
    Ok(t)
}

pub fn load_metrics(path: &Path) -> Result<MetricsTotals> {
    parse_metrics(&fs::read_to_string(path)?)
}

/// One (scenario, implementation, sweep value) observation.
#[derive(Clone, Debug, PartialEq)]
pub struct RunPoint {
    pub scenario: String,
    pub implementation: String,
    pub var_key: String,
    pub value: f64,
    pub bytes_total: u64,
    pub msgs_total: u64,
    pub ops_total: u64,
    pub duration_sec: f64,
    pub run_dir: PathBuf,
}

impl RunPoint {
    // TIMESTAMPS WIN. OTHERWISE THE CONFIGURED RUN LENGTH, OTHERWISE 0.
    pub fn duration_from(totals: &MetricsTotals, fallback_sec: Option<f64>) -> f64 {
        totals.span_sec().unwrap_or_else(|| fallback_sec.unwrap_or(0.0))
    }

    fn rate(&self, total: u64) -> f64 {
        if self.duration_sec <= 0.0 {
            return f64::NAN;
        }
        total as f64 / self.duration_sec
    }

    pub fn msgs_per_sec(&self) -> f64 {
        self.rate(self.msgs_total)
    }

    pub fn bytes_per_sec(&self) -> f64 {
        self.rate(self.bytes_total)
    }

    pub fn ops_per_sec(&self) -> f64 {
        self.rate(self.ops_total)
    }

    pub fn get_metric(&self, name: &str) -> f64 {
        match name {
            "msgs_per_sec" => self.msgs_per_sec(),
            "bytes_per_sec" => self.bytes_per_sec(),
            "ops_per_sec" => self.ops_per_sec(),
            _ => f64::NAN,
        }
    }
}

/// "CPU | KERNEL" caption from metadata.json's `machine` object.
pub fn machine_subtitle(meta: &Value) -> Option<String> {
    let machine = meta.get("machine")?;
    let field = |k: &str| {
        machine
            .get(k)
            .and_then(Value::as_str)
            .map(|s| s.trim().to_string())
            .unwrap_or_default()
    };
    let cpu = field("cpu_model");
    let kernel = field("kernel");
    let os_name = field("os_name");
    let os_version = field("os_version");

    let kernel_label = if !kernel.is_empty() {
        if !os_name.is_empty() && !kernel.to_lowercase().contains(&os_name.to_lowercase()) {
            format!("{} {}", os_name, kernel)
        } else {
            kernel
        }
    } else {
        format!("{} {}", os_name, os_version).trim().to_string()
    };

    let parts: Vec<&str> = [cpu.as_str(), kernel_label.as_str()]
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" | "))
    }
}

#[derive(Clone, Debug, Default)]
pub struct Filter {
    pub scenarios: Vec<String>,
    pub implementations: Vec<String>,
}

impl Filter {
    fn wants_scenario(&self, name: &str, key: &str) -> bool {
        self.scenarios.is_empty() || self.scenarios.iter().any(|s| s == name || s == key)
    }

    fn wants_impl(&self, implementation: &str) -> bool {
        self.implementations.is_empty() || self.implementations.iter().any(|i| i == implementation)
    }
}

/// Everything read back from one `<scenario>_<timestamp>` directory.
#[derive(Clone, Debug)]
pub struct ScenarioResults {
    pub key: String,
    pub dir: PathBuf,
    pub manifest: ScenarioManifest,
    pub subtitle: Option<String>,
    pub points: Vec<RunPoint>,
    pub impl_order: Vec<String>,
}

impl ScenarioResults {
    pub fn title(&self) -> &str {
        self.manifest.display_title()
    }

    // MANIFEST ORDER, ELSE THE DISCOVERED VALUES ASCENDING
    pub fn var_order(&self) -> Vec<f64> {
        if !self.manifest.var_values.is_empty() {
            return self.manifest.var_values.clone();
        }
        let mut vals: Vec<f64> = self.points.iter().map(|p| p.value).collect();
        vals.sort_by(f64::total_cmp);
        vals.dedup();
        vals
    }

    pub fn point(&self, implementation: &str, value: f64) -> Option<&RunPoint> {
        self.points
            .iter()
            .find(|p| p.implementation == implementation && p.value == value)
    }
}

fn sorted_subdirs(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut out: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    out.sort();
    Ok(out)
}

fn dir_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

// PREFERRED ORDER (FILTER, ELSE MANIFEST) RESTRICTED TO WHAT WAS FOUND, THEN ANY EXTRAS
fn impl_order(preferred: &[String], points: &[RunPoint]) -> Vec<String> {
    let mut order: Vec<String> = preferred
        .iter()
        .filter(|i| points.iter().any(|p| &p.implementation == *i))
        .cloned()
        .collect();
    for p in points {
        if !order.contains(&p.implementation) {
            order.push(p.implementation.clone());
        }
    }
    order
}

/// Reads one scenario directory. `Ok(None)` when it has no `scenario.json`
/// or the filter excludes it.
pub fn gather_scenario(sc_dir: &Path, filter: &Filter) -> Result<Option<ScenarioResults>> {
    let manifest_path = sc_dir.join(SCENARIO_MANIFEST);
    if !manifest_path.is_file() {
        return Ok(None);
    }
    let manifest = ScenarioManifest::load(&manifest_path)?;
    let key = dir_name(sc_dir);
    if !filter.wants_scenario(&manifest.name, &key) {
        return Ok(None);
    }

    let mut points = Vec::new();
    let mut subtitle = None;
    for impl_dir in sorted_subdirs(sc_dir)? {
        let implementation = dir_name(&impl_dir);
        if !filter.wants_impl(&implementation) {
            continue;
        }
        for run_dir in sorted_subdirs(&impl_dir)? {
            let (var_key, value) = match parse_run_dir_name(&dir_name(&run_dir)) {
                Some(parsed) => parsed,
                None => continue,
            };
            if var_key != manifest.var_key {
                continue;
            }
            let metrics_path = run_dir.join(METRICS_FILE);
            if !metrics_path.is_file() {
                debug!(run = %run_dir.display(), "no metrics, skipping");
                continue;
            }
            let totals = match load_metrics(&metrics_path) {
                Ok(t) => t,
                Err(e) => {
                    warn!(path = %metrics_path.display(), "skipping run: {}", e);
                    continue;
                }
            };
            if subtitle.is_none() {
                subtitle = read_subtitle(&run_dir.join(METADATA_FILE));
            }
            points.push(RunPoint {
                scenario: key.clone(),
                implementation: implementation.clone(),
                var_key,
                value,
                bytes_total: totals.bytes,
                msgs_total: totals.msgs,
                ops_total: totals.ops,
                duration_sec: RunPoint::duration_from(&totals, manifest.duration_sec()),
                run_dir,
            });
        }
    }

    let preferred = if filter.implementations.is_empty() {
        &manifest.implementations
    } else {
        &filter.implementations
    };
    let impl_order = impl_order(preferred, &points);
    Ok(Some(ScenarioResults {
        key,
        dir: sc_dir.to_path_buf(),
        manifest,
        subtitle,
        points,
        impl_order,
    }))
}

fn read_subtitle(path: &Path) -> Option<String> {
    let raw = fs::read_to_string(path).ok()?;
    match serde_json::from_str::<Value>(&raw) {
        Ok(meta) => machine_subtitle(&meta),
        Err(e) => {
            debug!(path = %path.display(), "unreadable metadata: {}", e);
            None
        }
    }
}

/// Every scenario directory under `root`, in name order.
pub fn gather(root: &Path, filter: &Filter) -> Result<Vec<ScenarioResults>> {
    let mut out = Vec::new();
    for sc_dir in sorted_subdirs(root)? {
        match gather_scenario(&sc_dir, filter) {
            Ok(Some(sc)) => out.push(sc),
            Ok(None) => {}
            Err(e) => warn!(dir = %sc_dir.display(), "skipping scenario: {}", e),
        }
    }
    Ok(out)
}

// ALL WORKERS' LAST HISTOGRAMS IN A RUN DIRECTORY, MERGED. None WHEN THERE ARE NONE.
pub fn merge_run_histograms(run_dir: &Path) -> Result<Option<Histogram>> {
    let mut files: Vec<PathBuf> = fs::read_dir(run_dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && p.extension().map_or(false, |x| x == "hdr"))
        .collect();
    files.sort();

    let mut merged: Option<Histogram> = None;
    for path in files {
        let hist = match hdr::read_last(&path) {
            Ok(Some(h)) => h,
            Ok(None) => continue,
            Err(e) => {
                warn!(path = %path.display(), "skipping histogram: {}", e);
                continue;
            }
        };
        match merged.as_mut() {
            Some(m) => {
                if let Err(e) = hdr::merge(m, &hist) {
                    warn!(path = %path.display(), "skipping histogram: {}", e);
                }
            }
            None => merged = Some(hist),
        }
    }
    Ok(merged)
}

// REQUESTED PERCENTILES IN MICROSECONDS, None WITHOUT LATENCY DATA
pub fn percentiles_us(run_dir: &Path, percentiles: &[f64]) -> Option<Vec<f64>> {
    let merged = match merge_run_histograms(run_dir) {
        Ok(Some(h)) if !h.is_empty() => h,
        Ok(_) => return None,
        Err(e) => {
            warn!(run = %run_dir.display(), "latency unavailable: {}", e);
            return None;
        }
    };
    Some(
        percentiles
            .iter()
            .map(|&p| merged.value_at_quantile(p / 100.0) as f64 / NS_PER_US)
            .collect(),
    )
}

// DISPLAY SCALE FOR A METRIC COLUMN
pub fn scale_and_unit(metric: &str, max_val: f64) -> (f64, &'static str) {
    let bytes = metric == "bytes_per_sec";
    let steps: [(f64, &str, &str); 3] = [(1e9, "GB/s", "G/s"), (1e6, "MB/s", "M/s"), (1e3, "KB/s", "K/s")];
    for (scale, b, c) in steps {
        if max_val >= scale {
            return (scale, if bytes { b } else { c });
        }
    }
    (1.0, if bytes { "B/s" } else { "count/s" })
}

pub fn relative_pct(value: f64, baseline: f64) -> Option<f64> {
    if value.is_finite() && baseline.is_finite() && baseline > 0.0 {
        Some((value - baseline) / baseline * 100.0)
    } else {
        None
    }
}

#[derive(Clone, Debug)]
pub struct ReportOptions {
    pub metrics: Vec<String>,
    pub baseline: Option<String>,
    pub percentiles: Vec<f64>,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            metrics: vec!["msgs_per_sec".to_string(), "bytes_per_sec".to_string()],
            baseline: Some(DEFAULT_BASELINE.to_string()),
            percentiles: DEFAULT_PERCENTILES.to_vec(),
        }
    }
}

const VAR_COL: usize = 12;
const CELL_COL: usize = 12;

fn header(first: &str, cols: &[String]) -> [String; 2] {
    let mut head = format!("{:>w$}", first.to_uppercase(), w = VAR_COL);
    let mut rule = "-".repeat(VAR_COL);
    for c in cols {
        head.push_str(&format!(" {:>w$}", c.to_uppercase(), w = CELL_COL));
        rule.push(' ');
        rule.push_str(&"-".repeat(CELL_COL));
    }
    [head, rule]
}

fn cell(text: String) -> String {
    format!(" {:>w$}", text, w = CELL_COL)
}

fn metric_table(sc: &ScenarioResults, metric: &str, opts: &ReportOptions, out: &mut Vec<String>) {
    let vars = sc.var_order();
    let max_val = sc
        .points
        .iter()
        .map(|p| p.get_metric(metric))
        .filter(|v| v.is_finite())
        .fold(0.0, f64::max);
    let (scale, unit) = scale_and_unit(metric, max_val);

    out.push(format!("{} ({})", metric.to_uppercase(), unit));
    out.extend(header(&sc.manifest.var_key, &sc.impl_order));
    for &v in &vars {
        let mut line = format!("{:>w$}", format_value(v), w = VAR_COL);
        for imp in &sc.impl_order {
            let val = sc.point(imp, v).map_or(f64::NAN, |p| p.get_metric(metric));
            line.push_str(&cell(if val.is_finite() {
                format!("{:.2}", val / scale)
            } else {
                "-".to_string()
            }));
        }
        out.push(line);
    }

    let baseline = match opts.baseline.as_deref() {
        Some(b) if sc.impl_order.iter().any(|i| i == b) => b,
        _ => {
            out.push(String::new());
            return;
        }
    };
    let others: Vec<String> = sc.impl_order.iter().filter(|i| *i != baseline).cloned().collect();
    if others.is_empty() {
        out.push(String::new());
        return;
    }
    out.push(String::new());
    out.push(format!("{} VS {}", metric.to_uppercase(), baseline.to_uppercase()));
    out.extend(header(&sc.manifest.var_key, &others));
    for &v in &vars {
        let base = sc.point(baseline, v).map_or(f64::NAN, |p| p.get_metric(metric));
        let mut line = format!("{:>w$}", format_value(v), w = VAR_COL);
        for imp in &others {
            let val = sc.point(imp, v).map_or(f64::NAN, |p| p.get_metric(metric));
            line.push_str(&cell(match relative_pct(val, base) {
                Some(pct) => format!("{:+.1}%", pct),
                None => "-".to_string(),
            }));
        }
        out.push(line);
    }
    out.push(String::new());
}

fn latency_tables(sc: &ScenarioResults, opts: &ReportOptions, out: &mut Vec<String>) {
    let cols: Vec<String> = opts
        .percentiles
        .iter()
        .map(|p| format!("P{}", format_value(*p)))
        .collect();
    for imp in &sc.impl_order {
        let rows: Vec<(f64, Vec<f64>)> = sc
            .var_order()
            .into_iter()
            .filter_map(|v| {
                let p = sc.point(imp, v)?;
                Some((v, percentiles_us(&p.run_dir, &opts.percentiles)?))
            })
            .collect();
        if rows.is_empty() {
            continue;
        }
        out.push(format!("LATENCY {} (US)", imp.to_uppercase()));
        out.extend(header(&sc.manifest.var_key, &cols));
        for (v, vals) in rows {
            let mut line = format!("{:>w$}", format_value(v), w = VAR_COL);
            for us in vals {
                line.push_str(&cell(format!("{:.1}", us)));
            }
            out.push(line);
        }
        out.push(String::new());
    }
}

/// Text report for one scenario in the upper-case table layout.
pub fn render_report(sc: &ScenarioResults, opts: &ReportOptions) -> Vec<String> {
    let sep = "=".repeat(72);
    let mut report = vec![sep.clone(), format!("NETBENCH: {}", sc.title().to_uppercase())];
    if let Some(sub) = &sc.subtitle {
        report.push(sub.clone());
    }
    report.push(sep.clone());
    report.push(format!(
        "SCENARIO: {}  MODE: {}  SWEEP: {}",
        sc.manifest.name,
        sc.manifest.mode,
        sc.manifest.var_key
    ));
    report.push(format!("DIRECTORY: {}", sc.dir.display()));
    report.push(String::new());

    if sc.points.is_empty() {
        report.push("NO RUN DATA".to_string());
        report.push(sep);
        return report;
    }

    for metric in &opts.metrics {
        metric_table(sc, metric, opts, &mut report);
    }
    latency_tables(sc, opts, &mut report);
    report.push(sep);
    report
}

// WRITES report.txt INTO THE SCENARIO DIRECTORY
pub fn save_report(sc: &ScenarioResults, lines: &[String]) -> Result<PathBuf> {
    let path = sc.dir.join(REPORT_FILE);
    fs::write(&path, lines.join("\n") + "\n")?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn point(msgs: u64, duration_sec: f64) -> RunPoint {
        RunPoint {
            scenario: "s".into(),
            implementation: "bsd".into(),
            var_key: "workers".into(),
            value: 1.0,
            bytes_total: msgs * 32,
            msgs_total: msgs,
            ops_total: msgs / 2,
            duration_sec,
            run_dir: PathBuf::new(),
        }
    }

    #[test]
    fn rates_are_nan_without_duration() {
        assert!(point(100, 0.0).msgs_per_sec().is_nan());
        assert!(point(100, -1.0).bytes_per_sec().is_nan());
        assert_eq!(point(100, 4.0).msgs_per_sec(), 25.0);
        assert_eq!(point(100, 4.0).get_metric("bytes_per_sec"), 800.0);
        assert_eq!(point(100, 4.0).get_metric("ops_per_sec"), 12.5);
        assert!(point(100, 4.0).get_metric("latency").is_nan());
    }

    #[test]
    fn metrics_sum_workers_and_span_timestamps() {
        let t = parse_metrics(
            r#"[{"bytes":100,"msgs":10,"ops":5,"begin_ts":2000000000,"end_ts":4000000000},
                {"bytes":50,"msgs":5,"begin_ts":1000000000,"end_ts":3500000000}]"#,
        )
        .unwrap();
        assert_eq!((t.bytes, t.msgs, t.ops), (150, 15, 5));
        assert_eq!(t.span_sec(), Some(3.0));
        assert_eq!(RunPoint::duration_from(&t, Some(10.0)), 3.0);
    }

    #[test]
    fn huge_counters_saturate_instead_of_wrapping() {
        let raw = json!([
            {"bytes": u64::MAX, "msgs": u64::MAX - 1, "ops": 1, "begin_ts": i64::MIN, "end_ts": i64::MAX},
            {"bytes": 10, "msgs": 5, "ops": 2, "begin_ts": 0, "end_ts": 1}
        ])
        .to_string();
        let t = parse_metrics(&raw).unwrap();
        assert_eq!((t.bytes, t.msgs, t.ops), (u64::MAX, u64::MAX, 3));
        let span = t.span_sec().unwrap();
        assert!(span > 1.8e10 && span.is_finite(), "span={}", span);
    }

    #[test]
    fn duration_falls_back_to_configured_length() {
        let no_ts = parse_metrics(r#"[{"msgs":7}]"#).unwrap();
        assert_eq!(no_ts.span_sec(), None);
        assert_eq!(RunPoint::duration_from(&no_ts, Some(10.0)), 10.0);
        let empty = parse_metrics("[]").unwrap();
        assert_eq!(RunPoint::duration_from(&empty, None), 0.0);
        assert!(parse_metrics("{\"msgs\":1}").is_err());
    }

    #[test]
    fn subtitle_prefixes_os_when_kernel_lacks_it() {
        let meta = json!({"machine": {"cpu_model": "AMD EPYC", "kernel": "6.8.0-45", "os_name": "Ubuntu"}});
        assert_eq!(machine_subtitle(&meta).unwrap(), "AMD EPYC | Ubuntu 6.8.0-45");
        let meta = json!({"machine": {"cpu_model": "Xeon", "kernel": "Linux 6.1", "os_name": "linux"}});
        assert_eq!(machine_subtitle(&meta).unwrap(), "Xeon | Linux 6.1");
        let meta = json!({"machine": {"os_name": "macOS", "os_version": "14.2"}});
        assert_eq!(machine_subtitle(&meta).unwrap(), "macOS 14.2");
        assert_eq!(machine_subtitle(&json!({"machine": {}})), None);
        assert_eq!(machine_subtitle(&json!({})), None);
    }

    #[test]
    fn scales_by_family() {
        assert_eq!(scale_and_unit("bytes_per_sec", 2.5e9), (1e9, "GB/s"));
        assert_eq!(scale_and_unit("msgs_per_sec", 3.0e6), (1e6, "M/s"));
        assert_eq!(scale_and_unit("ops_per_sec", 10.0), (1.0, "count/s"));
    }

    #[test]
    fn relative_needs_positive_baseline() {
        assert_eq!(relative_pct(150.0, 100.0), Some(50.0));
        assert_eq!(relative_pct(150.0, 0.0), None);
        assert_eq!(relative_pct(f64::NAN, 100.0), None);
    }

    #[test]
    fn impl_order_prefers_manifest_then_extras() {
        let mut a = point(1, 1.0);
        a.implementation = "uring".into();
        let b = point(1, 1.0);
        let mut c = point(1, 1.0);
        c.implementation = "custom".into();
        let order = impl_order(&["bsd".into(), "asio".into(), "uring".into()], &[a, b, c]);
        assert_eq!(order, ["bsd", "uring", "custom"]);
    }
}
