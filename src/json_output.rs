//! JSON output of a post-processing run
//!
//! Coverage per stream and overall, followed by the enriched sample stream.

use serde::Serialize;
use std::io::Write;

use crate::post_process::{EnrichedSample, PostProcessReport, StreamCoverage};

/// Coverage section of the JSON document
#[derive(Debug, Clone, Serialize)]
pub struct JsonCoverage<'a> {
    pub streams: &'a [StreamCoverage],
    pub overall: StreamCoverage,
    /// Matched share of all samples, in percent
    pub coverage_percent: f64,
}

/// Root JSON output structure
#[derive(Debug, Clone, Serialize)]
pub struct JsonOutput<'a> {
    /// Format version identifier
    pub version: &'static str,
    /// Format name
    pub format: &'static str,
    pub coverage: JsonCoverage<'a>,
    pub samples: &'a [EnrichedSample],
}

impl<'a> JsonOutput<'a> {
    pub fn new(report: &'a PostProcessReport) -> Self {
        let overall = report.coverage.overall();
        Self {
            version: env!("CARGO_PKG_VERSION"),
            format: "tmatrace-json-v1",
            coverage: JsonCoverage {
                streams: &report.coverage.streams,
                coverage_percent: overall.coverage_percent(),
                overall,
            },
            samples: &report.samples,
        }
    }

    /// Serialize to JSON string
    pub fn to_json(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Stream the document into `writer` without building the string first
    pub fn write_to<W: Write>(&self, writer: W) -> anyhow::Result<()> {
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::{EvaluationMode, MetricValues};
    use crate::post_process::CoverageReport;
    use crate::sample::Scope;
    use std::collections::BTreeMap;

    fn enriched(scope: Option<Scope>) -> EnrichedSample {
        EnrichedSample {
            stream: "42".into(),
            id: 0,
            thread_id: 1,
            pthread_id: 1,
            time_begin: 10,
            time_end: 20,
            label: "conv".into(),
            config_index: 0,
            core_migrated: false,
            scope,
            operation_name: scope.map(|_| "MatMul".to_string()),
            scope_label: None,
            unmatched: None,
            topdown: None,
            metrics: MetricValues {
                mode: EvaluationMode::Compiled,
                values: BTreeMap::from([("ipc".to_string(), 1.25)]),
                deltas: BTreeMap::new(),
                unavailable: Vec::new(),
                regressions: Vec::new(),
            },
        }
    }

    fn report(samples: Vec<EnrichedSample>) -> PostProcessReport {
        PostProcessReport {
            coverage: CoverageReport {
                streams: vec![StreamCoverage {
                    stream: "42".into(),
                    total: samples.len(),
                    matched_to_node: samples.len(),
                    ..Default::default()
                }],
            },
            samples,
        }
    }

    #[test]
    fn test_json_serialization() {
        let report = report(vec![enriched(Some(Scope::Node { node: 3 }))]);
        let json = JsonOutput::new(&report).to_json().unwrap();

        assert!(json.contains("\"format\": \"tmatrace-json-v1\""));
        assert!(json.contains("\"kind\": \"node\""));
        assert!(json.contains("\"operation_name\": \"MatMul\""));
        assert!(json.contains("\"mode\": \"compiled\""));
        assert!(json.contains("\"ipc\": 1.25"));
        assert!(json.contains("\"coverage_percent\": 100.0"));
    }

    #[test]
    fn test_optional_fields_omitted() {
        let report = report(vec![enriched(None)]);
        let value: serde_json::Value =
            serde_json::from_str(&JsonOutput::new(&report).to_json().unwrap()).unwrap();
        let sample = &value["samples"][0];

        assert!(sample.get("scope").is_none());
        assert!(sample.get("topdown").is_none());
        assert!(sample["metrics"].get("regressions").is_none());
        assert_eq!(value["coverage"]["overall"]["stream"], "total");
    }

    #[test]
    fn test_write_to_matches_to_json() {
        let report = report(vec![enriched(None)]);
        let output = JsonOutput::new(&report);
        let mut buf = Vec::new();
        output.write_to(&mut buf).unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), output.to_json().unwrap());
    }
}
