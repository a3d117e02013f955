//! Per-sample metric evaluation
//!
//! Computes counter deltas, runs the packed-counter interpolations and then
//! the compiled equations of the sample's configuration group. Degraded
//! groups (and unknown group indices) fall back to raw per-event deltas.

use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::catalog::MetricCatalog;
use crate::equation::{compile_catalog, CompiledConfig, EvalContext};
use crate::error::Result;
use crate::sample::RawSample;

/// Default number of decimals kept in metric values
pub const DEFAULT_PRECISION: u32 = 2;

/// Round half away from zero to `decimals` places
pub fn round_to(value: f64, decimals: u32) -> f64 {
    let scale = 10f64.powi(decimals as i32);
    (value * scale).round() / scale
}

/// A counter whose end read is below its begin read
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CounterRegression {
    pub event: String,
    pub begin: u64,
    pub end: u64,
}

/// How the values of a sample were produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum EvaluationMode {
    Compiled,
    /// Raw deltas keyed by event name, plus whichever metrics did compile
    Degraded { reason: String },
}

/// Result of evaluating one sample
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricValues {
    #[serde(flatten)]
    pub mode: EvaluationMode,
    /// Metric values keyed by metric name
    pub values: BTreeMap<String, f64>,
    /// Raw counter deltas keyed by event name, filled only in degraded mode
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub deltas: BTreeMap<String, f64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub unavailable: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub regressions: Vec<CounterRegression>,
}

impl MetricValues {
    pub fn is_degraded(&self) -> bool {
        matches!(self.mode, EvaluationMode::Degraded { .. })
    }
}

/// Evaluates samples against the compiled catalog (one entry per configuration group)
#[derive(Debug, Clone)]
pub struct MetricEvaluator {
    configs: Vec<CompiledConfig>,
    precision: u32,
}

impl MetricEvaluator {
    /// Compile the catalog; fails only on a ConfigError
    pub fn new(catalog: &MetricCatalog, precision: u32) -> Result<Self> {
        Ok(Self {
            configs: compile_catalog(catalog)?,
            precision,
        })
    }

    pub fn config(&self, index: usize) -> Option<&CompiledConfig> {
        self.configs.get(index)
    }

    pub fn configs(&self) -> &[CompiledConfig] {
        &self.configs
    }

    pub fn evaluate(&self, sample: &RawSample) -> MetricValues {
        let config = self.configs.get(sample.config_index);
        let event_name = |i: usize| -> String {
            config
                .and_then(|c| c.event_names.get(i))
                .cloned()
                .unwrap_or_else(|| format!("counter_{i}"))
        };

        let mut regressions = Vec::new();
        let deltas: Vec<f64> = sample
            .begin_counters
            .iter()
            .zip(&sample.end_counters)
            .enumerate()
            .map(|(i, (&begin, &end))| {
                if end < begin {
                    regressions.push(CounterRegression {
                        event: event_name(i),
                        begin,
                        end,
                    });
                }
                (i128::from(end) - i128::from(begin)) as f64
            })
            .collect();

        for r in &regressions {
            warn!(sample = sample.id, event = %r.event, begin = r.begin, end = r.end, "counter regression");
        }

        let Some(config) = config else {
            debug!(sample = sample.id, config = sample.config_index, "unknown configuration index");
            return MetricValues {
                mode: EvaluationMode::Degraded {
                    reason: format!("configuration index {} is out of range", sample.config_index),
                },
                values: BTreeMap::new(),
                deltas: deltas
                    .iter()
                    .enumerate()
                    .map(|(i, d)| (format!("counter_{i}"), *d))
                    .collect(),
                unavailable: Vec::new(),
                regressions,
            };
        };

        let base = EvalContext {
            deltas: &deltas,
            begin: &sample.begin_counters,
            end: &sample.end_counters,
            perf_metrics: &[],
            constants: &sample.constants,
            duration_ms: sample.duration_ms(),
        };

        // Interpolations first: equations reference them by position
        let perf: Vec<f64> = config
            .interpolations
            .iter()
            .map(|i| i.evaluate(&base).unwrap_or(f64::NAN))
            .collect();
        let ctx = EvalContext {
            perf_metrics: &perf,
            ..base
        };

        let raw_deltas = if config.is_degraded() {
            deltas
                .iter()
                .enumerate()
                .map(|(i, d)| (event_name(i), *d))
                .collect()
        } else {
            BTreeMap::new()
        };

        let mut values = BTreeMap::new();

        let mut unavailable = Vec::new();
        for equation in &config.equations {
            match equation.evaluate(&ctx) {
                Ok(v) => {
                    values.insert(equation.name.clone(), round_to(v, self.precision));
                }
                Err(e) => {
                    debug!(sample = sample.id, metric = %equation.name, error = %e, "metric unavailable");
                    unavailable.push(equation.name.clone());
                }
            }
        }

        let mode = if config.is_degraded() {
            let names: Vec<&str> = config.degraded.iter().map(|d| d.metric.as_str()).collect();
            EvaluationMode::Degraded {
                reason: format!("metrics not computable here: {}", names.join(", ")),
            }
        } else {
            EvaluationMode::Compiled
        };

        MetricValues {
            mode,
            values,
            deltas: raw_deltas,
            unavailable,
            regressions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG: &str = r#"{
        "OverallCnsts": ["DURATIONTIMEINMILLISECONDS"],
        "Metrics": [
            {"LegacyName": "pct",
             "Events": [{"Name": "E1", "Alias": "a"}, {"Name": "E2", "Alias": "b"}, {"Name": "E3", "Alias": "c"}],
             "Formula": "100*(a-b)/c"},
            {"LegacyName": "per_ms",
             "Events": [{"Name": "E1", "Alias": "a"}],
             "Constants": [{"Name": "DURATIONTIMEINMILLISECONDS", "Alias": "d"}],
             "Formula": "a / d"},
            {"LegacyName": "ratio",
             "Events": [{"Name": "E1", "Alias": "a"}, {"Name": "E3", "Alias": "c"}],
             "Formula": "a / c"},
            {"LegacyName": "needs_x",
             "Events": [{"Name": "E_X", "Alias": "x"}],
             "Formula": "x * 2"}
        ],
        "Configs": [
            {"EventList": ["E1", "E2", "E3"], "Metrics": ["pct", "per_ms", "ratio"]},
            {"EventList": ["E1", "E3"], "Metrics": ["ratio", "needs_x"]}
        ]
    }"#;

    fn evaluator() -> MetricEvaluator {
        MetricEvaluator::new(&MetricCatalog::from_json_str(CATALOG).unwrap(), DEFAULT_PRECISION)
            .unwrap()
    }

    fn sample(config: usize, begin: &str, end: &str) -> RawSample {
        let n = begin.split('_').count();
        let line = format!("1,2,1000000,3000000,5,6,7,,{n}_0_0,{begin},{n}_0_0,{end},0,x,{config},-2");
        RawSample::parse_line(0, &line).unwrap()
    }

    #[test]
    fn test_round_to() {
        assert_eq!(round_to(1.23456, 2), 1.23);
        assert_eq!(round_to(1.235, 0), 1.0);
        assert_eq!(round_to(-2.5, 0), -3.0);
    }

    #[test]
    fn test_formula_over_deltas() {
        let values = evaluator().evaluate(&sample(0, "0_0_0", "50_20_1000"));
        assert_eq!(values.mode, EvaluationMode::Compiled);
        assert_eq!(values.values["pct"], 3.0);
        assert_eq!(values.values["ratio"], 0.05);
        // Logged sentinel ignored: duration is 2 ms
        assert_eq!(values.values["per_ms"], 25.0);
        assert!(values.regressions.is_empty());
    }

    #[test]
    fn test_degraded_configuration_reports_deltas() {
        let values = evaluator().evaluate(&sample(1, "10_100", "40_400"));
        assert!(values.is_degraded());
        assert_eq!(values.deltas["E1"], 30.0);
        assert_eq!(values.deltas["E3"], 300.0);
        assert_eq!(values.values["ratio"], 0.1);
        assert!(!values.values.contains_key("needs_x"));
        assert!(!values.values.contains_key("E1"));
    }

    #[test]
    fn test_metric_named_like_event_keeps_raw_delta() {
        let json = CATALOG
            .replace("\"LegacyName\": \"ratio\"", "\"LegacyName\": \"E1\"")
            .replace("\"Metrics\": [\"ratio\", \"needs_x\"]", "\"Metrics\": [\"E1\", \"needs_x\"]")
            .replace("\"Metrics\": [\"pct\", \"per_ms\", \"ratio\"]", "\"Metrics\": [\"pct\", \"per_ms\", \"E1\"]");
        let evaluator =
            MetricEvaluator::new(&MetricCatalog::from_json_str(&json).unwrap(), DEFAULT_PRECISION).unwrap();

        let values = evaluator.evaluate(&sample(1, "10_100", "40_400"));
        assert!(values.is_degraded());
        assert_eq!(values.deltas["E1"], 30.0);
        assert_eq!(values.values["E1"], 0.1);
    }

    #[test]
    fn test_out_of_range_config_index() {
        let values = evaluator().evaluate(&sample(9, "1_2", "3_5"));
        assert!(values.is_degraded());
        assert_eq!(values.deltas["counter_0"], 2.0);
        assert_eq!(values.deltas["counter_1"], 3.0);
        assert!(values.values.is_empty());
    }

    #[test]
    fn test_counter_regression_flagged() {
        let values = evaluator().evaluate(&sample(0, "100_0_0", "40_20_1000"));
        assert_eq!(
            values.regressions,
            vec![CounterRegression {
                event: "E1".into(),
                begin: 100,
                end: 40
            }]
        );
        assert_eq!(values.values["pct"], -8.0);
    }

    #[test]
    fn test_division_by_zero_marks_unavailable() {
        let values = evaluator().evaluate(&sample(0, "0_0_5", "50_20_5"));
        assert!(values.unavailable.contains(&"pct".to_string()));
        assert!(!values.values.contains_key("pct"));
    }

    #[test]
    fn test_short_counter_array_marks_unavailable() {
        let values = evaluator().evaluate(&sample(0, "0_0", "50_20"));
        assert!(values.unavailable.contains(&"pct".to_string()));
        assert_eq!(values.values["per_ms"], 25.0);
    }
}
