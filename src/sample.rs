//! Raw hardware-counter samples
//!
//! One profiler log line describes one measurement window: who ran it, who
//! scheduled it and when, the packed top-down counters and the begin/end reads
//! of the programmed events. Samples are immutable after parsing except for
//! the scope the correlator assigns to them.

use serde::Serialize;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Minimum number of comma separated fields in a raw log line
pub const MIN_FIELDS: usize = 14;

/// Position of a sample inside its stream
pub type SampleId = usize;

/// Why a raw log line was rejected
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SampleParseError {
    #[error("expected at least {MIN_FIELDS} fields, found {found}")]
    TooFewFields { found: usize },

    #[error("field '{field}' is not a valid integer: {value:?}")]
    InvalidInteger { field: &'static str, value: String },

    #[error("event header '{value}' must have 3 underscore separated integers")]
    InvalidHeader { value: String },

    #[error("begin/end counter arrays differ in length ({begin} vs {end})")]
    CounterLengthMismatch { begin: usize, end: usize },

    #[error("constant token {token:?} is not numeric")]
    InvalidConstant { token: String },
}

/// Boundary reads of the slot counter, packed metric register and uop-drop counter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TopdownCounters {
    pub slot_begin: u64,
    pub metric_begin: u64,
    pub drop_begin: u64,
    pub slot_end: u64,
    pub metric_end: u64,
    pub drop_end: u64,
}

impl TopdownCounters {
    /// All six reads are zero: the collector did not sample top-down for this window
    pub fn is_zero(&self) -> bool {
        self.slot_begin == 0
            && self.metric_begin == 0
            && self.drop_begin == 0
            && self.slot_end == 0
            && self.metric_end == 0
            && self.drop_end == 0
    }
}

/// `num_core_prefix` header written before each counter array
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EventHeader {
    pub event_count: i64,
    pub core: i64,
    pub prefix: i64,
}

/// What a sample was correlated to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Scope {
    /// Scheduled directly from a timeline node
    Node { node: usize },
    /// Scheduled from inside another, already correlated sample; inherits its node
    Sample { sample: SampleId, node: usize },
}

impl Scope {
    /// Index of the timeline node this scope resolves to
    pub fn node(&self) -> usize {
        match *self {
            Self::Node { node } | Self::Sample { node, .. } => node,
        }
    }
}

/// One hardware-counter measurement window
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RawSample {
    pub id: SampleId,
    pub thread_id: u64,
    pub pthread_id: u64,
    pub time_begin: u64,
    pub time_end: u64,
    pub parent_thread_id: u64,
    pub parent_pthread_id: u64,
    /// Instant (parent clock domain) at which this window was scheduled
    pub parent_scheduled_time: u64,
    pub topdown: Option<TopdownCounters>,
    pub begin_header: EventHeader,
    pub begin_counters: Vec<u64>,
    pub end_header: EventHeader,
    pub end_counters: Vec<u64>,
    pub int_prefix: i64,
    pub label: String,
    pub config_index: usize,
    pub constants: Vec<f64>,
    #[serde(skip)]
    matched_scope: Option<Scope>,
}

impl RawSample {
    /// Parse one raw log line
    ///
    /// Fields: `tid, pthread_id, time_begin, time_end, parent_tid,
    /// parent_pthread_id, parent_sched_time, topdown, begin_header,
    /// begin_events, end_header, end_events, int_prefix, prefix[, config_index
    /// [, constants]]`.
    pub fn parse_line(id: SampleId, line: &str) -> std::result::Result<Self, SampleParseError> {
        let fields: Vec<&str> = line.trim_end().split(',').collect();
        if fields.len() < MIN_FIELDS {
            return Err(SampleParseError::TooFewFields {
                found: fields.len(),
            });
        }

        let begin_counters = parse_counters("begin_events", fields[9])?;
        let end_counters = parse_counters("end_events", fields[11])?;
        if begin_counters.len() != end_counters.len() {
            return Err(SampleParseError::CounterLengthMismatch {
                begin: begin_counters.len(),
                end: end_counters.len(),
            });
        }

        let config_index = match fields.get(14).map(|s| s.trim()) {
            Some(s) if !s.is_empty() => parse_int("config_index", s)?,
            _ => 0,
        };
        let constants = match fields.get(15) {
            Some(s) => parse_constants(s)?,
            None => Vec::new(),
        };

        Ok(Self {
            id,
            thread_id: parse_int("tid", fields[0])?,
            pthread_id: parse_int("pthread_id", fields[1])?,
            time_begin: parse_int("time_begin", fields[2])?,
            time_end: parse_int("time_end", fields[3])?,
            parent_thread_id: parse_int("parent_tid", fields[4])?,
            parent_pthread_id: parse_int("parent_pthread_id", fields[5])?,
            parent_scheduled_time: parse_int("parent_sched_time", fields[6])?,
            topdown: parse_topdown(fields[7])?,
            begin_header: parse_header(fields[8])?,
            begin_counters,
            end_header: parse_header(fields[10])?,
            end_counters,
            int_prefix: parse_int("int_prefix", fields[12])?,
            label: fields[13].to_string(),
            config_index,
            constants,
            matched_scope: None,
        })
    }

    pub fn duration_ns(&self) -> u64 {
        self.time_end.saturating_sub(self.time_begin)
    }

    pub fn duration_ms(&self) -> f64 {
        self.duration_ns() as f64 / 1_000_000.0
    }

    /// Begin and end counters were read on different cores
    pub fn core_migrated(&self) -> bool {
        self.begin_header.core != self.end_header.core
    }

    pub fn matched_scope(&self) -> Option<Scope> {
        self.matched_scope
    }

    /// Record the correlation result. A scope is assigned at most once;
    /// returns false (and keeps the first scope) on a second attempt.
    pub fn assign_scope(&mut self, scope: Scope) -> bool {
        if self.matched_scope.is_some() {
            debug_assert!(false, "sample {} correlated twice", self.id);
            return false;
        }
        self.matched_scope = Some(scope);
        true
    }
}

fn parse_int<T: std::str::FromStr>(
    field: &'static str,
    value: &str,
) -> std::result::Result<T, SampleParseError> {
    value
        .trim()
        .parse()
        .map_err(|_| SampleParseError::InvalidInteger {
            field,
            value: value.to_string(),
        })
}

fn parse_counters(
    field: &'static str,
    value: &str,
) -> std::result::Result<Vec<u64>, SampleParseError> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(Vec::new());
    }
    value.split('_').map(|v| parse_int(field, v)).collect()
}

fn parse_topdown(value: &str) -> std::result::Result<Option<TopdownCounters>, SampleParseError> {
    let values = parse_counters("topdown_metrics", value)?;
    if values.len() != 6 {
        if !values.is_empty() {
            debug!(count = values.len(), "ignoring incomplete top-down tuple");
        }
        return Ok(None);
    }
    Ok(Some(TopdownCounters {
        slot_begin: values[0],
        metric_begin: values[1],
        drop_begin: values[2],
        slot_end: values[3],
        metric_end: values[4],
        drop_end: values[5],
    }))
}

fn parse_header(value: &str) -> std::result::Result<EventHeader, SampleParseError> {
    let parts: Vec<&str> = value.trim().split('_').collect();
    if parts.len() != 3 {
        return Err(SampleParseError::InvalidHeader {
            value: value.to_string(),
        });
    }
    Ok(EventHeader {
        event_count: parse_int("event_header", parts[0])?,
        core: parse_int("event_header", parts[1])?,
        prefix: parse_int("event_header", parts[2])?,
    })
}

fn parse_constants(value: &str) -> std::result::Result<Vec<f64>, SampleParseError> {
    value
        .trim()
        .split('_')
        .filter(|token| !token.is_empty())
        .map(|token| {
            token
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| SampleParseError::InvalidConstant {
                    token: token.to_string(),
                })
        })
        .collect()
}

/// All samples read from one raw log file
#[derive(Debug, Clone)]
pub struct RawLog {
    /// Logical stream id (collector process id taken from the file name)
    pub stream: String,
    pub samples: Vec<RawSample>,
    /// Malformed lines that were skipped
    pub skipped: usize,
}

impl RawLog {
    /// Stream id for a raw log file name: the suffix after the last `_`
    pub fn stream_id(file_name: &str) -> String {
        file_name
            .rsplit('_')
            .next()
            .unwrap_or(file_name)
            .to_string()
    }

    /// Read every line of `reader`, skipping (and counting) malformed ones
    pub fn from_reader<R: BufRead>(stream: impl Into<String>, reader: R) -> Result<Self> {
        let stream = stream.into();
        let mut samples = Vec::new();
        let mut skipped = 0;

        for (line_no, bytes) in reader.split(b'\n').enumerate() {
            let bytes = bytes.map_err(|e| Error::io(&stream, e))?;
            let line = match std::str::from_utf8(&bytes) {
                Ok(line) => line.trim_end_matches('\r'),
                Err(e) => {
                    skipped += 1;
                    warn!(stream = %stream, line = line_no + 1, error = %e, "skipping non UTF-8 sample line");
                    continue;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            match RawSample::parse_line(samples.len(), line) {
                Ok(sample) => samples.push(sample),
                Err(e) => {
                    skipped += 1;
                    warn!(stream = %stream, line = line_no + 1, error = %e, "skipping malformed sample");
                }
            }
        }

        debug!(stream = %stream, samples = samples.len(), skipped, "raw log parsed");
        Ok(Self {
            stream,
            samples,
            skipped,
        })
    }

    /// Read a raw log file; the stream id comes from the file name
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| Error::io(path, e))?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        Self::from_reader(Self::stream_id(&file_name), BufReader::new(file)).map_err(|e| match e {
            Error::Io { source, .. } => Error::io(path, source),
            other => other,
        })
    }

    /// Drop samples outside `[begin, end]` and renumber the rest.
    /// Returns how many were dropped.
    pub fn retain_within(&mut self, begin: u64, end: u64) -> usize {
        let before = self.samples.len();
        self.samples
            .retain(|s| s.time_begin >= begin && s.time_end <= end);
        for (id, sample) in self.samples.iter_mut().enumerate() {
            sample.id = id;
        }
        before - self.samples.len()
    }
}
