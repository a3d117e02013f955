//! End-to-end tests of the tmatrace binary
#![allow(deprecated)] // suppress assert_cmd::Command::cargo_bin deprecation in tests

mod utils;

use predicates::prelude::*;
use std::fs;
use std::path::Path;

fn run_lines() -> Vec<String> {
    vec![
        // Scheduled from node MatMul at its start
        utils::raw_line(10, 20, 90, 1, 40, "0_0_0", "50_20_1000", 0),
        // Inclusive end of BiasAdd's window
        utils::raw_line(11, 160, 195, 1, 200, "0_0_0", "10_0_100", 0),
        // Between MatMul and BiasAdd: nothing encloses it
        utils::raw_line(12, 100, 140, 1, 120, "0_0_0", "10_0_100", 0),
        // Nested under sample 0
        utils::raw_line(20, 30, 60, 10, 25, "0_0", "4_2", 1),
        "1,2,3,4,5".to_string(),
    ]
}

fn cmd(dir: &Path) -> assert_cmd::Command {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("tmatrace");
    cmd.arg("--logs")
        .arg(dir.join("logs"))
        .arg("--catalog")
        .arg(dir.join("catalog.json"))
        .arg("--threads")
        .arg("2");
    cmd
}

#[test]
fn test_text_report_shows_coverage() {
    let dir = tempfile::tempdir().unwrap();
    utils::write_run(dir.path(), &run_lines());

    cmd(dir.path())
        .arg("--nodes")
        .arg(dir.path().join("nodes.json"))
        .assert()
        .success()
        .stdout(predicate::str::contains("4242"))
        .stdout(predicate::str::contains("total"))
        .stdout(predicate::str::contains("75.00%"));
}

#[test]
fn test_json_report_to_file() {
    let dir = tempfile::tempdir().unwrap();
    utils::write_run(dir.path(), &run_lines());
    let out = dir.path().join("report.json");

    cmd(dir.path())
        .arg("--nodes")
        .arg(dir.path().join("nodes.json"))
        .arg("--format")
        .arg("json")
        .arg("--output")
        .arg(&out)
        .assert()
        .success();

    let report: serde_json::Value = serde_json::from_str(&fs::read_to_string(&out).unwrap()).unwrap();
    assert_eq!(report["format"], "tmatrace-json-v1");

    let overall = &report["coverage"]["overall"];
    assert_eq!(overall["total"], 4);
    assert_eq!(overall["matched_to_node"], 2);
    assert_eq!(overall["matched_to_sample"], 1);
    assert_eq!(overall["no_enclosing_node"], 1);
    assert_eq!(overall["malformed_skipped"], 1);

    let samples = report["samples"].as_array().unwrap();
    assert_eq!(samples[0]["operation_name"], "MatMul");
    assert_eq!(samples[0]["metrics"]["values"]["metric_pct"], 3.0);
    assert_eq!(samples[1]["operation_name"], "BiasAdd");
    assert_eq!(samples[2]["unmatched"], "no_enclosing_node");
    assert_eq!(samples[3]["scope"]["kind"], "sample");
    assert_eq!(samples[3]["scope"]["sample"], 0);
    assert_eq!(samples[3]["metrics"]["mode"], "degraded");
    assert!(samples[0]["topdown"]["retiring"].is_number());
}

#[test]
fn test_normal_mode_without_nodes() {
    let dir = tempfile::tempdir().unwrap();
    utils::write_run(dir.path(), &run_lines());

    let output = cmd(dir.path()).arg("--format").arg("json").output().unwrap();
    assert!(output.status.success());

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["coverage"]["overall"]["no_timeline"], 4);
    assert_eq!(report["samples"][0]["unmatched"], "no_timeline");
}

#[test]
fn test_run_config_file_is_honoured() {
    let dir = tempfile::tempdir().unwrap();
    utils::write_run(dir.path(), &run_lines());
    fs::write(dir.path().join("run.toml"), "raw_log_pattern = \"^nothing_\"\n").unwrap();

    cmd(dir.path())
        .arg("--config")
        .arg(dir.path().join("run.toml"))
        .arg("--format")
        .arg("json")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"samples\": []"));
}

#[test]
fn test_missing_catalog_fails() {
    let dir = tempfile::tempdir().unwrap();
    utils::write_run(dir.path(), &run_lines());
    fs::remove_file(dir.path().join("catalog.json")).unwrap();

    cmd(dir.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("loading metric catalog"));
}

#[test]
fn test_malformed_catalog_fails_before_processing() {
    let dir = tempfile::tempdir().unwrap();
    utils::write_run(dir.path(), &run_lines());
    fs::write(dir.path().join("catalog.json"), "{\"Configs\": []}").unwrap();

    cmd(dir.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid metric catalog"));
}

#[test]
fn test_malformed_node_state_fails() {
    let dir = tempfile::tempdir().unwrap();
    utils::write_run(dir.path(), &run_lines());
    fs::write(dir.path().join("nodes.json"), "{\"nodes\": 5}").unwrap();

    cmd(dir.path())
        .arg("--nodes")
        .arg(dir.path().join("nodes.json"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("loading node state"));
}
