// NETBENCH RESULTS LAYOUT
// <ROOT>/<SCENARIO>_<UTC TIMESTAMP>/<IMPL>/<VAR_KEY>_<VALUE>/
//
// THE RUNNER WRITES THIS TREE, THE AGGREGATOR READS IT BACK. format_value AND
// parse_run_dir_name MUST STAY IN STEP: EVERYTHING format_value EMITS FOR A
// FINITE VALUE MUST MATCH RUN_DIR_PATTERN AND PARSE BACK BIT-FOR-BIT.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::scenario::{Mode, Scenario};

pub const SCENARIO_MANIFEST: &str = "scenario.json";
pub const RUNNER_MANIFEST: &str = "runner.json";
pub const METRICS_FILE: &str = "metrics.json";
pub const METADATA_FILE: &str = "metadata.json";
pub const REPORT_FILE: &str = "report.txt";

pub const RUN_DIR_PATTERN: &str = r"^([A-Za-z0-9_]+)_(-?[0-9]+(?:\.[0-9]+)?)$";
static RUN_DIR_RE: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(RUN_DIR_PATTERN).ok());
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H-%M-%SZ";

// WHOLE NUMBERS WITHOUT A DECIMAL POINT, EVERYTHING ELSE AS THE SHORTEST
// DECIMAL THAT PARSES BACK TO THE SAME f64. NEVER USES AN EXPONENT.
pub fn format_value(x: f64) -> String {
    if x.is_finite() && x.fract() == 0.0 && x.abs() < 1e15 {
        return format!("{}", x as i64);
    }
    format!("{}", x)
}

pub fn run_dir_name(var_key: &str, value: f64) -> String {
    format!("{}_{}", var_key, format_value(value))
}

// INVERSE OF run_dir_name. None FOR ANYTHING THAT IS NOT A RUN DIRECTORY.
pub fn parse_run_dir_name(name: &str) -> Option<(String, f64)> {
    let caps = RUN_DIR_RE.as_ref()?.captures(name)?;
    let value = caps.get(2)?.as_str().parse::<f64>().ok()?;
    Some((caps.get(1)?.as_str().to_string(), value))
}

pub fn timestamp(at: DateTime<Utc>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

pub fn scenario_dir_name(scenario: &str, at: DateTime<Utc>) -> String {
    format!("{}_{}", scenario, timestamp(at))
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

// PER-ROLE FILES INSIDE A RUN DIRECTORY
pub fn provenance_path(run_dir: &Path, stem: &str) -> PathBuf {
    run_dir.join(format!("{}.cmd", stem))
}

pub fn stdout_path(run_dir: &Path, stem: &str) -> PathBuf {
    run_dir.join(format!("{}.stdout", stem))
}

/// One scenario invocation's directory tree.
#[derive(Clone, Debug)]
pub struct ScenarioLayout {
    dir: PathBuf,
}

impl ScenarioLayout {
    /// Creates `<results_root>/<scenario>_<timestamp>`. The path is made absolute
    /// because spawned processes run with their run directory as cwd.
    pub fn create(results_root: &Path, scenario: &str, at: DateTime<Utc>) -> Result<Self> {
        let dir = absolute(results_root)?.join(scenario_dir_name(scenario, at));
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn open(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn impl_dir(&self, implementation: &str) -> PathBuf {
        self.dir.join(implementation)
    }

    pub fn run_dir(&self, implementation: &str, var_key: &str, value: f64) -> PathBuf {
        self.impl_dir(implementation).join(run_dir_name(var_key, value))
    }

    pub fn create_run_dir(&self, implementation: &str, var_key: &str, value: f64) -> Result<PathBuf> {
        let dir = self.run_dir(implementation, var_key, value);
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    pub fn write_manifest(&self, manifest: &ScenarioManifest) -> Result<()> {
        manifest.save(&self.dir.join(SCENARIO_MANIFEST))
    }

    pub fn write_runner(&self, runner: &serde_json::Value) -> Result<()> {
        fs::write(
            self.dir.join(RUNNER_MANIFEST),
            serde_json::to_string_pretty(runner)?,
        )?;
        Ok(())
    }
}

/// `scenario.json`. Linkages are provenance tokens only and are never parsed back.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScenarioManifest {
    pub name: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub mode: Mode,
    pub var_key: String,
    #[serde(default)]
    pub var_values: Vec<f64>,
    #[serde(default)]
    pub implementations: Vec<String>,
    #[serde(default)]
    pub impl_extra: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub fixed: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub linkages: BTreeMap<String, String>,
}

impl ScenarioManifest {
    pub fn from_scenario(sc: &Scenario) -> Self {
        Self {
            name: sc.name().to_string(),
            title: sc.raw_title().map(str::to_string),
            mode: sc.run_mode(),
            var_key: sc.var_key().to_string(),
            var_values: sc.var_values().to_vec(),
            implementations: sc.implementation_list().to_vec(),
            impl_extra: sc.all_extra_args().clone(),
            fixed: sc.fixed().to_json(),
            linkages: sc
                .linkages()
                .iter()
                .map(|(target, link)| (target.clone(), link.token()))
                .collect(),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.name)
    }

    // CONFIGURED RUN LENGTH, USED WHEN METRICS CARRY NO USABLE TIMESTAMPS
    pub fn duration_sec(&self) -> Option<f64> {
        self.fixed.get("duration_sec").and_then(|v| v.as_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::Linkage;
    use chrono::TimeZone;

    #[test]
    fn format_value_whole_and_shortest() {
        assert_eq!(format_value(4.0), "4");
        assert_eq!(format_value(-3.0), "-3");
        assert_eq!(format_value(-0.0), "0");
        assert_eq!(format_value(0.5), "0.5");
        assert_eq!(format_value(1.25), "1.25");
        assert_eq!(format_value(0.1), "0.1");
        assert_eq!(format_value(1.0 / 3.0), "0.3333333333333333");
        assert_eq!(format_value(123456.7), "123456.7");
        assert_eq!(format_value(1234567.5), "1234567.5");
        assert_eq!(format_value(0.00001), "0.00001");
    }

    #[test]
    fn run_dir_names_parse_back() {
        for (key, value) in [("workers", 4.0), ("delay_us", 0.5), ("msg_size", 1024.0), ("x", -2.0)] {
            let name = run_dir_name(key, value);
            assert_eq!(parse_run_dir_name(&name), Some((key.to_string(), value)));
        }
    }

    #[test]
    fn parse_rejects_non_run_dirs() {
        assert_eq!(parse_run_dir_name("workers"), None);
        assert_eq!(parse_run_dir_name("workers_"), None);
        assert_eq!(parse_run_dir_name("workers_4x"), None);
        assert_eq!(parse_run_dir_name("bad-key_4"), None);
        assert_eq!(parse_run_dir_name("workers_1.5e+06"), None);
        assert_eq!(parse_run_dir_name("workers_0.5.1"), None);
    }

    #[test]
    fn scenario_dir_uses_utc_compact_timestamp() {
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        assert_eq!(scenario_dir_name("threads", at), "threads_2024-03-09T07-05-01Z");
    }

    #[test]
    fn layout_creates_nested_run_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let layout = ScenarioLayout::create(tmp.path(), "conns", at).unwrap();
        let run = layout.create_run_dir("bsd", "conns", 32.0).unwrap();
        assert!(run.is_dir());
        assert!(run.ends_with("conns_2024-01-01T00-00-00Z/bsd/conns_32"));
        assert!(run.is_absolute());
    }

    #[test]
    fn manifest_records_scenario_and_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let sc = Scenario::new("threads", "workers")
            .title("Threads")
            .values([1.0, 2.0])
            .implementations(["bsd", "uring"])
            .impl_extra("uring", &["--zerocopy", "true"])
            .link("senders", Linkage::formula("workers").unwrap());
        let manifest = ScenarioManifest::from_scenario(&sc);
        let path = tmp.path().join(SCENARIO_MANIFEST);
        manifest.save(&path).unwrap();

        let back = ScenarioManifest::load(&path).unwrap();
        assert_eq!(back, manifest);
        assert_eq!(back.linkages.get("senders").map(String::as_str), Some("workers"));
        assert_eq!(back.duration_sec(), Some(10.0));
        assert_eq!(back.display_title(), "Threads");
    }

    #[test]
    fn manifest_tolerates_minimal_json() {
        let m: ScenarioManifest =
            serde_json::from_str(r#"{"name":"s","var_key":"workers","mode":"receiver"}"#).unwrap();
        assert_eq!(m.mode, Mode::ReceiverClient);
        assert!(m.var_values.is_empty());
        assert_eq!(m.display_title(), "s");
    }
}
