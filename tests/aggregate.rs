// NETBENCH AGGREGATION TESTS
// BUILDS A RESULTS ROOT BY HAND (MANIFEST, metrics.json, metadata.json, *.hdr)
// AND READS IT BACK: RATES, DURATION FALLBACK, ORDERING, PERCENTILES, REPORT.

use std::fs;
use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{TimeZone, Utc};
use hdrhistogram::serialization::{Serializer, V2DeflateSerializer};
use hdrhistogram::Histogram;

use netbench::aggregate::{
    gather, merge_run_histograms, percentiles_us, render_report, save_report, Filter,
    ReportOptions,
};
use netbench::layout::{ScenarioLayout, ScenarioManifest, REPORT_FILE};
use netbench::scenario::{Linkage, Scenario};

const SEC: i64 = 1_000_000_000;

fn scenario() -> Scenario {
    Scenario::new("threads", "workers")
        .title("Threads")
        .values([1.0, 2.0])
        .implementations(["uring", "bsd"])
        .link("senders", Linkage::formula("workers").unwrap())
}

fn write_metrics(run_dir: &Path, workers: &[(u64, u64, i64, i64)]) {
    let entries: Vec<String> = workers
        .iter()
        .map(|(bytes, msgs, b, e)| {
            format!(
                r#"{{"bytes":{},"msgs":{},"ops":{},"begin_ts":{},"end_ts":{}}}"#,
                bytes, msgs, msgs, b, e
            )
        })
        .collect();
    fs::write(run_dir.join("metrics.json"), format!("[{}]", entries.join(","))).unwrap();
}

fn latency_log(values_ns: &[u64]) -> String {
    let mut h = Histogram::<u64>::new_with_bounds(1, 3_600_000_000_000, 3).unwrap();
    for &v in values_ns {
        h.record(v).unwrap();
    }
    let mut compressed = Vec::new();
    V2DeflateSerializer::new().serialize(&h, &mut compressed).unwrap();
    format!(
        "#[StartTime: 0]\n\"StartTimestamp\",\"Interval_Length\",\"Interval_Max\",\"Interval_Compressed_Histogram\"\n0.000,1.000,0.0,{}\n",
        STANDARD.encode(compressed)
    )
}

// uring: BOTH VALUES, bsd: ONLY workers=1 (workers=2 HAS NO TIMESTAMPS)
fn build_root(root: &Path) -> std::path::PathBuf {
    let at = Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap();
    let sc = scenario();
    let layout = ScenarioLayout::create(root, sc.name(), at).unwrap();
    layout.write_manifest(&ScenarioManifest::from_scenario(&sc)).unwrap();

    let d = layout.create_run_dir("uring", "workers", 1.0).unwrap();
    write_metrics(&d, &[(3200, 100, SEC, 3 * SEC)]);
    fs::write(
        d.join("metadata.json"),
        r#"{"machine":{"cpu_model":"Test CPU","kernel":"6.9.0","os_name":"Arch"}}"#,
    )
    .unwrap();
    fs::write(d.join("worker_0.hdr"), latency_log(&[10_000; 99])).unwrap();
    fs::write(d.join("worker_1.hdr"), latency_log(&[1_000_000])).unwrap();

    let d = layout.create_run_dir("uring", "workers", 2.0).unwrap();
    write_metrics(&d, &[(6400, 200, SEC, 2 * SEC), (6400, 200, SEC / 2, 2 * SEC)]);

    let d = layout.create_run_dir("bsd", "workers", 1.0).unwrap();
    write_metrics(&d, &[(1600, 50, SEC, 3 * SEC)]);

    let d = layout.create_run_dir("bsd", "workers", 2.0).unwrap();
    write_metrics(&d, &[(1000, 100, 0, 0)]);

    // NOISE THE AGGREGATOR MUST SKIP
    let bad = layout.create_run_dir("bsd", "workers", 4.0).unwrap();
    fs::write(bad.join("metrics.json"), "{not json").unwrap();
    fs::create_dir_all(layout.impl_dir("bsd").join("conns_8")).unwrap();
    fs::create_dir_all(layout.impl_dir("bsd").join("notes")).unwrap();
    fs::create_dir_all(root.join("stray_dir_without_manifest")).unwrap();

    layout.dir().to_path_buf()
}

#[test]
fn gather_reads_rates_and_skips_noise() {
    let tmp = tempfile::tempdir().unwrap();
    build_root(tmp.path());
    let results = gather(tmp.path(), &Filter::default()).unwrap();
    assert_eq!(results.len(), 1);
    let sc = &results[0];

    assert_eq!(sc.points.len(), 4);
    assert_eq!(sc.title(), "Threads");
    assert_eq!(sc.subtitle.as_deref(), Some("Test CPU | Arch 6.9.0"));
    assert_eq!(sc.impl_order, ["uring", "bsd"]);
    assert_eq!(sc.var_order(), vec![1.0, 2.0]);

    let p = sc.point("uring", 1.0).unwrap();
    assert_eq!(p.duration_sec, 2.0);
    assert_eq!(p.msgs_per_sec(), 50.0);
    assert_eq!(p.bytes_per_sec(), 1600.0);

    // MIN BEGIN / MAX END ACROSS WORKERS
    let p = sc.point("uring", 2.0).unwrap();
    assert_eq!(p.duration_sec, 1.5);
    assert_eq!(p.msgs_total, 400);

    // NO USABLE TIMESTAMPS: CONFIGURED duration_sec (DEFAULT 10)
    let p = sc.point("bsd", 2.0).unwrap();
    assert_eq!(p.duration_sec, 10.0);
    assert_eq!(p.msgs_per_sec(), 10.0);

    assert!(sc.point("bsd", 4.0).is_none());
}

#[test]
fn filters_select_scenarios_and_impls() {
    let tmp = tempfile::tempdir().unwrap();
    build_root(tmp.path());

    let only_bsd = Filter {
        scenarios: vec![],
        implementations: vec!["bsd".into()],
    };
    let results = gather(tmp.path(), &only_bsd).unwrap();
    assert!(results[0].points.iter().all(|p| p.implementation == "bsd"));
    assert_eq!(results[0].impl_order, ["bsd"]);

    let other = Filter {
        scenarios: vec!["something_else".into()],
        implementations: vec![],
    };
    assert!(gather(tmp.path(), &other).unwrap().is_empty());
}

#[test]
fn histograms_merge_across_workers() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = build_root(tmp.path());
    let run = dir.join("uring").join("workers_1");

    let merged = merge_run_histograms(&run).unwrap().unwrap();
    assert_eq!(merged.len(), 100);

    let ps = percentiles_us(&run, &[50.0, 99.0, 100.0]).unwrap();
    assert!((ps[0] - 10.0).abs() < 0.05, "p50={}", ps[0]);
    assert!((ps[1] - 10.0).abs() < 0.05, "p99={}", ps[1]);
    assert!((ps[2] - 1000.0).abs() < 1.0, "p100={}", ps[2]);

    // NO .hdr FILES -> NO LATENCY
    assert!(percentiles_us(&dir.join("bsd").join("workers_1"), &[50.0]).is_none());
}

#[test]
fn report_tables_and_baseline() {
    let tmp = tempfile::tempdir().unwrap();
    build_root(tmp.path());
    let sc = &gather(tmp.path(), &Filter::default()).unwrap()[0];

    let lines = render_report(sc, &ReportOptions::default());
    let text = lines.join("\n");
    assert!(text.contains("NETBENCH: THREADS"));
    assert!(text.contains("Test CPU | Arch 6.9.0"));
    assert!(text.contains("MSGS_PER_SEC (count/s)"));
    assert!(text.contains("MSGS_PER_SEC VS BSD"));
    // uring 50/s VS bsd 25/s AT workers=1
    assert!(text.contains("+100.0%"));
    assert!(text.contains("LATENCY URING (US)"));
    assert!(!text.contains("LATENCY BSD"));

    let no_baseline = ReportOptions {
        baseline: None,
        ..ReportOptions::default()
    };
    assert!(!render_report(sc, &no_baseline).join("\n").contains(" VS "));

    let path = save_report(sc, &lines).unwrap();
    assert!(path.ends_with(REPORT_FILE));
    assert_eq!(fs::read_to_string(path).unwrap(), text + "\n");
}
