// Shared fixtures for the integration tests
#![allow(dead_code)]

use std::fs;
use std::path::Path;

/// Catalog with one plain metric, one composite metric and one metric whose
/// event is programmed nowhere (degrades configuration 1)
pub const CATALOG: &str = r#"{
    "AlwaysSampleTopdown": 1,
    "OverallCnsts": ["DURATIONTIMEINMILLISECONDS", "SYSTEM_TSC_FREQ"],
    "Metrics": [
        {"LegacyName": "metric_pct",
         "Events": [{"Name": "E1", "Alias": "a"}, {"Name": "E2", "Alias": "b"}, {"Name": "E3", "Alias": "c"}],
         "Formula": "100*(a-b)/c"},
        {"LegacyName": "metric_retiring_slots",
         "Events": [{"Name": "PERF_METRICS.RETIRING", "Alias": "r"}],
         "Formula": "r"},
        {"LegacyName": "metric_M",
         "Events": [{"Name": "E_x", "Alias": "x"}, {"Name": "E1", "Alias": "a"}],
         "Formula": "x + a"},
        {"LegacyName": "metric_ghz",
         "Events": [{"Name": "E1", "Alias": "a"}],
         "Constants": [{"Name": "SYSTEM_TSC_FREQ", "Alias": "f"}],
         "Formula": "a / f"}
    ],
    "Configs": [
        {"EventList": ["E1", "E2", "E3"], "Metrics": ["metric_pct", "metric_ghz"]},
        {"EventList": ["E1", "E2"], "Metrics": ["metric_M"]},
        {"EventList": ["TOPDOWN.SLOTS", "PERF_METRICS"], "Metrics": ["metric_retiring_slots"]}
    ]
}"#;

/// Three nodes: two on scheduler thread 1, one on scheduler thread 2
pub const NODES: &str = r#"{
    "scheduler_threads": {"1": "inter_op_0", "2": "inter_op_1"},
    "nodes": [
        {"thread_id": 1, "start_time": 0, "duration": 100, "operation_name": "MatMul", "scope_label": "step=0"},
        {"thread_id": 1, "start_time": 150, "duration": 50, "operation_name": "BiasAdd"},
        {"thread_id": 2, "start_time": 300, "duration": 100, "operation_name": "Relu"}
    ]
}"#;

/// One 16-field raw log line
pub fn raw_line(
    pthread: u64,
    time_begin: u64,
    time_end: u64,
    parent_pthread: u64,
    parent_sched: u64,
    begin: &str,
    end: &str,
    config: usize,
) -> String {
    let n = begin.split('_').count();
    format!(
        "{pthread},{pthread},{time_begin},{time_end},0,{parent_pthread},{parent_sched},0_0_0_1000_16843009_0,{n}_0_0,{begin},{n}_0_0,{end},0,prefix,{config},-2_2000000000"
    )
}

/// Write the standard catalog, node state and one raw log into `dir`
pub fn write_run(dir: &Path, log_lines: &[String]) {
    fs::write(dir.join("catalog.json"), CATALOG).unwrap();
    fs::write(dir.join("nodes.json"), NODES).unwrap();
    fs::create_dir_all(dir.join("logs")).unwrap();
    fs::write(dir.join("logs").join("mtmc_raw_4242"), log_lines.join("\n")).unwrap();
}
