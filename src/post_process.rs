//! Run orchestration: raw logs in, enriched samples and coverage out
//!
//! For every raw log stream: parse, clip to the timeline span, correlate on
//! the run's worker pool, then attach top-down breakdowns and catalog
//! metrics to each sample. Without a timeline ("normal mode") correlation is
//! skipped and every sample is reported with [`Unmatched::NoTimeline`].

use rayon::prelude::*;
use rayon::ThreadPool;
use serde::Serialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::catalog::MetricCatalog;
use crate::config::RunConfig;
use crate::error::{Error, Result};
use crate::evaluator::{MetricEvaluator, MetricValues};
use crate::sample::{RawLog, RawSample, SampleId, Scope};
use crate::timeline::NodeState;
use crate::timeline_mapper::{CorrelationOutcome, TimelineMapper, Unmatched};
use crate::topdown::TopDownBreakdown;

/// One sample with everything derived from it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrichedSample {
    pub stream: String,
    pub id: SampleId,
    pub thread_id: u64,
    pub pthread_id: u64,
    pub time_begin: u64,
    pub time_end: u64,
    pub label: String,
    pub config_index: usize,
    pub core_migrated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<Scope>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope_label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unmatched: Option<Unmatched>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topdown: Option<TopDownBreakdown>,
    pub metrics: MetricValues,
}

/// Correlation and data-quality counts for one stream (or the whole run)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StreamCoverage {
    pub stream: String,
    pub total: usize,
    pub matched_to_node: usize,
    pub matched_to_sample: usize,
    pub no_enclosing_node: usize,
    pub recheck_exhausted: usize,
    pub no_timeline: usize,
    pub recheck_iterations: usize,
    pub malformed_skipped: usize,
    pub clipped: usize,
    pub counter_regressions: usize,
}

impl StreamCoverage {
    pub fn matched(&self) -> usize {
        self.matched_to_node + self.matched_to_sample
    }

    /// Matched share of the correlated samples, in percent
    pub fn coverage_percent(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        100.0 * self.matched() as f64 / self.total as f64
    }

    fn absorb(&mut self, other: &StreamCoverage) {
        self.total += other.total;
        self.matched_to_node += other.matched_to_node;
        self.matched_to_sample += other.matched_to_sample;
        self.no_enclosing_node += other.no_enclosing_node;
        self.recheck_exhausted += other.recheck_exhausted;
        self.no_timeline += other.no_timeline;
        self.recheck_iterations = self.recheck_iterations.max(other.recheck_iterations);
        self.malformed_skipped += other.malformed_skipped;
        self.clipped += other.clipped;
        self.counter_regressions += other.counter_regressions;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CoverageReport {
    pub streams: Vec<StreamCoverage>,
}

impl CoverageReport {
    /// Totals over all streams; `recheck_iterations` is the maximum
    pub fn overall(&self) -> StreamCoverage {
        let mut total = StreamCoverage {
            stream: "total".to_string(),
            ..Default::default()
        };
        for stream in &self.streams {
            total.absorb(stream);
        }
        total
    }
}

impl fmt::Display for CoverageReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:<12} {:>8} {:>8} {:>8} {:>8} {:>8} {:>6} {:>8} {:>8} {:>8}",
            "stream", "samples", "to_node", "to_samp", "no_node", "exhaust", "iters", "skipped", "clipped", "coverage"
        )?;
        let overall = self.overall();
        for row in self.streams.iter().chain(std::iter::once(&overall)) {
            writeln!(
                f,
                "{:<12} {:>8} {:>8} {:>8} {:>8} {:>8} {:>6} {:>8} {:>8} {:>7.2}%",
                row.stream,
                row.total,
                row.matched_to_node,
                row.matched_to_sample,
                row.no_enclosing_node,
                row.recheck_exhausted,
                row.recheck_iterations,
                row.malformed_skipped,
                row.clipped,
                row.coverage_percent()
            )?;
        }
        if overall.counter_regressions > 0 {
            writeln!(f, "counter regressions: {}", overall.counter_regressions)?;
        }
        Ok(())
    }
}

/// Output of a whole run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PostProcessReport {
    pub coverage: CoverageReport,
    pub samples: Vec<EnrichedSample>,
}

/// Owns everything that is loaded once per run
pub struct PostProcessor {
    config: RunConfig,
    evaluator: MetricEvaluator,
    always_sample_topdown: bool,
    mapper: Option<TimelineMapper>,
    boundary: Option<(u64, u64)>,
}

impl PostProcessor {
    /// Compile the catalog and index the timeline. Without `node_state` the
    /// run is in normal mode.
    pub fn new(config: RunConfig, catalog: &MetricCatalog, node_state: Option<NodeState>) -> Result<Self> {
        config.validate()?;
        let evaluator = MetricEvaluator::new(catalog, config.metric_precision)?;

        let (mapper, boundary) = match node_state {
            Some(state) => {
                let boundary = state.time_boundary();
                (Some(TimelineMapper::from_node_state(state)?), boundary)
            }
            None => (None, None),
        };

        Ok(Self {
            config,
            evaluator,
            always_sample_topdown: catalog.always_sample_topdown,
            mapper,
            boundary,
        })
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Raw log files to read: the explicitly named ones, or every file in
    /// `dir` whose name matches `raw_log_pattern`, sorted by name
    pub fn discover_raw_logs(&self, dir: &Path, names: &[String]) -> Result<Vec<PathBuf>> {
        if !names.is_empty() {
            return Ok(names.iter().map(|n| dir.join(n)).collect());
        }

        let pattern = self.config.raw_log_regex()?;
        let entries = fs::read_dir(dir).map_err(|e| Error::io(dir, e))?;
        let mut paths = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| Error::io(dir, e))?;
            let path = entry.path();
            let matches = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| pattern.is_match(n));
            if matches && path.is_file() {
                paths.push(path);
            }
        }
        paths.sort();

        if paths.is_empty() {
            warn!(dir = %dir.display(), pattern = %self.config.raw_log_pattern, "no raw logs found");
        }
        Ok(paths)
    }

    /// Discover, read and process every raw log under `dir`
    pub fn run(&self, dir: &Path, names: &[String]) -> Result<PostProcessReport> {
        let logs = self
            .discover_raw_logs(dir, names)?
            .iter()
            .map(RawLog::from_file)
            .collect::<Result<Vec<_>>>()?;
        self.process(logs)
    }

    /// Process already parsed logs; the worker pool lives for this call only
    pub fn process(&self, logs: Vec<RawLog>) -> Result<PostProcessReport> {
        let threads = self.config.worker_threads();
        let partitions = self.config.partition_count();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("tmatrace-worker-{i}"))
            .build()?;
        info!(threads, partitions, streams = logs.len(), "post-processing started");

        let mut report = PostProcessReport::default();
        for log in logs {
            let (coverage, samples) = self.process_stream(log, &pool, partitions);
            report.coverage.streams.push(coverage);
            report.samples.extend(samples);
        }

        let overall = report.coverage.overall();
        info!(
            samples = overall.total,
            matched = overall.matched(),
            coverage_pct = overall.coverage_percent(),
            "post-processing finished"
        );
        Ok(report)
    }

    fn process_stream(
        &self,
        mut log: RawLog,
        pool: &ThreadPool,
        partitions: usize,
    ) -> (StreamCoverage, Vec<EnrichedSample>) {
        let mut coverage = StreamCoverage {
            stream: log.stream.clone(),
            malformed_skipped: log.skipped,
            ..Default::default()
        };

        if let (true, Some((begin, end))) = (self.config.clip_to_timeline, self.boundary) {
            coverage.clipped = log.retain_within(begin, end);
            if coverage.clipped > 0 {
                debug!(stream = %log.stream, clipped = coverage.clipped, "samples outside the timeline dropped");
            }
        }
        coverage.total = log.samples.len();

        let outcome = match &self.mapper {
            Some(mapper) => {
                let outcome = mapper.correlate(&mut log.samples, pool, partitions);
                coverage.matched_to_node = outcome.matched_to_node;
                coverage.matched_to_sample = outcome.matched_to_sample;
                coverage.no_enclosing_node = outcome.count(Unmatched::NoEnclosingNode);
                coverage.recheck_exhausted = outcome.count(Unmatched::RecheckExhausted);
                coverage.recheck_iterations = outcome.iterations;
                Some(outcome)
            }
            None => {
                coverage.no_timeline = log.samples.len();
                None
            }
        };

        let stream = log.stream.as_str();
        let samples: Vec<EnrichedSample> = pool.install(|| {
            log.samples
                .par_iter()
                .map(|s| self.enrich(stream, s, outcome.as_ref()))
                .collect()
        });
        coverage.counter_regressions = samples.iter().map(|s| s.metrics.regressions.len()).sum();

        (coverage, samples)
    }

    fn enrich(&self, stream: &str, sample: &RawSample, outcome: Option<&CorrelationOutcome>) -> EnrichedSample {
        let scope = sample.matched_scope();
        let node = scope
            .zip(self.mapper.as_ref())
            .and_then(|(scope, mapper)| mapper.node(scope.node()));
        let unmatched = match outcome {
            None => Some(Unmatched::NoTimeline),
            Some(outcome) => outcome.failed.get(&sample.id).copied(),
        };

        let topdown = sample
            .topdown
            .filter(|c| self.always_sample_topdown || !c.is_zero())
            .map(|c| TopDownBreakdown::calculate(&c));

        EnrichedSample {
            stream: stream.to_string(),
            id: sample.id,
            thread_id: sample.thread_id,
            pthread_id: sample.pthread_id,
            time_begin: sample.time_begin,
            time_end: sample.time_end,
            label: sample.label.clone(),
            config_index: sample.config_index,
            core_migrated: sample.core_migrated(),
            scope,
            operation_name: node.map(|n| n.operation_name.clone()),
            scope_label: node.map(|n| n.scope_label.clone()).filter(|l| !l.is_empty()),
            unmatched,
            topdown,
            metrics: self.evaluator.evaluate(sample),
        }
    }
}
