//! Application-level timeline supplied by the node-state provider
//!
//! The correlator only needs a start-sorted list of timed nodes plus the set
//! of threads that schedule work (inter-op threads). Translating a framework's
//! own trace format into this shape happens outside this crate; the
//! [`NodeState`] JSON file is the hand-off format.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;

use crate::error::{Error, Result};

/// One application-level execution interval
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineNode {
    pub thread_id: u64,
    pub start_time: u64,
    pub duration: u64,
    pub operation_name: String,
    #[serde(default)]
    pub scope_label: String,
}

impl TimelineNode {
    pub fn end_time(&self) -> u64 {
        self.start_time.saturating_add(self.duration)
    }

    /// Inclusive containment: `start <= t <= start + duration`
    pub fn contains(&self, t: u64) -> bool {
        self.start_time <= t && t <= self.end_time()
    }
}

/// Timeline nodes plus the scheduler threads that anchor correlation
///
/// # Example JSON
/// ```json
/// {
///   "scheduler_threads": { "1": "inter_op_0" },
///   "nodes": [
///     { "thread_id": 1, "start_time": 0, "duration": 100,
///       "operation_name": "MatMul", "scope_label": "step=3" }
///   ]
/// }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeState {
    /// Scheduler thread id -> thread name
    #[serde(default)]
    pub scheduler_threads: BTreeMap<u64, String>,
    pub nodes: Vec<TimelineNode>,
}

impl NodeState {
    /// Load node state from a JSON file. Nodes are returned sorted by start time.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        Self::from_json_str(&content)
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        let mut state: Self = serde_json::from_str(content).map_err(Error::NodeState)?;
        state.nodes.sort_by_key(|n| n.start_time);
        Ok(state)
    }

    pub fn scheduler_thread_ids(&self) -> HashSet<u64> {
        self.scheduler_threads.keys().copied().collect()
    }

    /// Earliest start and latest end over all nodes
    pub fn time_boundary(&self) -> Option<(u64, u64)> {
        let begin = self.nodes.iter().map(|n| n.start_time).min()?;
        let end = self.nodes.iter().map(TimelineNode::end_time).max()?;
        Some((begin, end))
    }
}
