//! Correlation through the public API, from node-state JSON to enriched samples

mod utils;

use tmatrace::catalog::MetricCatalog;
use tmatrace::config::RunConfig;
use tmatrace::post_process::PostProcessor;
use tmatrace::sample::{RawLog, Scope};
use tmatrace::timeline::NodeState;
use tmatrace::timeline_mapper::Unmatched;

fn log() -> RawLog {
    let lines = [
        utils::raw_line(10, 20, 90, 1, 40, "0_0_0", "1_1_1", 0),
        utils::raw_line(11, 160, 195, 1, 200, "0_0_0", "1_1_1", 0),
        utils::raw_line(12, 100, 140, 1, 120, "0_0_0", "1_1_1", 0),
        utils::raw_line(13, 310, 390, 2, 400, "0_0_0", "1_1_1", 0),
        utils::raw_line(20, 30, 60, 10, 25, "0_0_0", "1_1_1", 0),
        utils::raw_line(30, 35, 50, 20, 40, "0_0_0", "1_1_1", 0),
    ];
    RawLog::from_reader("1", lines.join("\n").as_bytes()).unwrap()
}

fn processor(threads: usize, partitions: usize) -> PostProcessor {
    let catalog = MetricCatalog::from_json_str(utils::CATALOG).unwrap();
    let nodes = NodeState::from_json_str(utils::NODES).unwrap();
    let config = RunConfig {
        threads: Some(threads),
        partitions: Some(partitions),
        ..RunConfig::default()
    };
    PostProcessor::new(config, &catalog, Some(nodes)).unwrap()
}

#[test]
fn test_three_node_scenario() {
    let report = processor(2, 2).process(vec![log()]).unwrap();
    let s = &report.samples;

    assert_eq!(s[0].scope, Some(Scope::Node { node: 0 }));
    assert_eq!(s[1].scope, Some(Scope::Node { node: 1 }));
    assert_eq!(s[2].unmatched, Some(Unmatched::NoEnclosingNode));
    assert_eq!(s[3].operation_name.as_deref(), Some("Relu"));
    assert_eq!(s[4].scope, Some(Scope::Sample { sample: 0, node: 0 }));
    assert_eq!(s[5].scope, Some(Scope::Sample { sample: 4, node: 0 }));
    assert_eq!(s[5].operation_name.as_deref(), Some("MatMul"));

    let coverage = &report.coverage.streams[0];
    assert_eq!(coverage.recheck_iterations, 2);
    assert_eq!(coverage.matched(), 5);
}

#[test]
fn test_results_independent_of_parallelism() {
    let reference = processor(1, 1).process(vec![log()]).unwrap();
    for (threads, partitions) in [(1, 6), (2, 3), (4, 4), (3, 16)] {
        let report = processor(threads, partitions).process(vec![log()]).unwrap();
        assert_eq!(report, reference, "threads={threads} partitions={partitions}");
    }
}
