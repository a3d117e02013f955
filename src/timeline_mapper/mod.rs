//! Sample-to-timeline correlation
//!
//! Pass 1 matches samples scheduled by a known scheduler thread against the
//! timeline nodes. Samples scheduled by any other thread are deferred; each
//! recheck iteration matches them against the samples already correlated
//! (by `pthread_id` and `[time_begin, time_end]`), so nested dispatch chains
//! inherit the node of their outermost ancestor. Iteration stops at a fixed
//! point.
//!
//! Every pass is scatter/compute/gather on the caller's rayon pool: workers
//! read a shared snapshot and return local results, and the caller merges and
//! re-sorts the matched pool before the next pass starts.

mod partition;
mod search;

pub use partition::split;
pub use search::{find_enclosing, MatchedWindow, Window};

use rayon::prelude::*;
use rayon::ThreadPool;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::sample::{RawSample, SampleId, Scope};
use crate::timeline::{NodeState, TimelineNode};

/// Why a sample has no scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Unmatched {
    /// Scheduled by a scheduler thread, but no node on that thread encloses the instant
    NoEnclosingNode,
    /// Deferred and still unmatched when recheck reached its fixed point
    RecheckExhausted,
    /// No timeline was supplied for this run
    NoTimeline,
}

impl fmt::Display for Unmatched {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NoEnclosingNode => "no enclosing node",
            Self::RecheckExhausted => "recheck exhausted",
            Self::NoTimeline => "no timeline",
        };
        f.write_str(s)
    }
}

/// Summary of one `correlate` call; scopes themselves live on the samples
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CorrelationOutcome {
    pub matched_to_node: usize,
    pub matched_to_sample: usize,
    /// Unmatched samples by id
    pub failed: BTreeMap<SampleId, Unmatched>,
    /// Samples sent to recheck by pass 1
    pub deferred_initial: usize,
    pub iterations: usize,
}

impl CorrelationOutcome {
    pub fn matched(&self) -> usize {
        self.matched_to_node + self.matched_to_sample
    }

    pub fn count(&self, reason: Unmatched) -> usize {
        self.failed.values().filter(|r| **r == reason).count()
    }
}

enum Direct {
    Node(usize),
    Deferred,
    Failed,
}

/// Correlation engine over one immutable, start-sorted timeline
#[derive(Debug, Clone)]
pub struct TimelineMapper {
    nodes: Vec<TimelineNode>,
    scheduler_threads: HashSet<u64>,
}

impl TimelineMapper {
    /// Fails with [`Error::UnsortedTimeline`] if `nodes` is not ascending by start time
    pub fn new(nodes: Vec<TimelineNode>, scheduler_threads: HashSet<u64>) -> Result<Self> {
        if let Some(index) = nodes
            .windows(2)
            .position(|w| w[1].start_time < w[0].start_time)
        {
            return Err(Error::UnsortedTimeline { index: index + 1 });
        }
        Ok(Self {
            nodes,
            scheduler_threads,
        })
    }

    pub fn from_node_state(state: NodeState) -> Result<Self> {
        let threads = state.scheduler_thread_ids();
        Self::new(state.nodes, threads)
    }

    pub fn nodes(&self) -> &[TimelineNode] {
        &self.nodes
    }

    pub fn node(&self, index: usize) -> Option<&TimelineNode> {
        self.nodes.get(index)
    }

    /// Correlate every sample of one stream, assigning scopes in place
    ///
    /// `partitions` is the number of independent slices per pass (at least 1);
    /// the outcome does not depend on it or on the pool size.
    pub fn correlate(
        &self,
        samples: &mut [RawSample],
        pool: &ThreadPool,
        partitions: usize,
    ) -> CorrelationOutcome {
        let mut outcome = CorrelationOutcome::default();

        let direct = self.direct_pass(samples, pool, partitions);
        let mut matched = Vec::new();
        let mut deferred = Vec::new();
        for (pos, result) in direct.into_iter().enumerate() {
            let sample = &mut samples[pos];
            match result {
                Direct::Node(node) => {
                    sample.assign_scope(Scope::Node { node });
                    matched.push(window(sample, node));
                    outcome.matched_to_node += 1;
                }
                Direct::Deferred => deferred.push(pos),
                Direct::Failed => {
                    outcome.failed.insert(sample.id, Unmatched::NoEnclosingNode);
                }
            }
        }
        outcome.deferred_initial = deferred.len();
        debug!(
            matched = outcome.matched_to_node,
            deferred = deferred.len(),
            failed = outcome.failed.len(),
            "direct pass finished"
        );

        // Each productive iteration resolves at least one sample
        let bound = deferred.len();
        while !deferred.is_empty() && outcome.iterations < bound {
            matched.sort_by_key(|w| (w.time_begin, w.sample));
            outcome.iterations += 1;

            let found = recheck_pass(&matched, samples, &deferred, pool, partitions);
            let mut still_deferred = Vec::with_capacity(deferred.len());
            let mut progressed = 0;
            for (pos, parent) in deferred.iter().copied().zip(found) {
                match parent {
                    Some(parent) => {
                        let sample = &mut samples[pos];
                        sample.assign_scope(Scope::Sample {
                            sample: parent.sample,
                            node: parent.node,
                        });
                        matched.push(window(sample, parent.node));
                        progressed += 1;
                    }
                    None => still_deferred.push(pos),
                }
            }
            outcome.matched_to_sample += progressed;
            debug!(
                iteration = outcome.iterations,
                matched = progressed,
                remaining = still_deferred.len(),
                "recheck iteration"
            );

            deferred = still_deferred;
            if progressed == 0 {
                break;
            }
        }

        for pos in deferred {
            outcome.failed.insert(samples[pos].id, Unmatched::RecheckExhausted);
        }

        info!(
            samples = samples.len(),
            to_node = outcome.matched_to_node,
            to_sample = outcome.matched_to_sample,
            unmatched = outcome.failed.len(),
            iterations = outcome.iterations,
            "correlation finished"
        );
        outcome
    }

    fn direct_pass(&self, samples: &[RawSample], pool: &ThreadPool, partitions: usize) -> Vec<Direct> {
        let ranges = split(samples.len(), partitions);
        let slices: Vec<Vec<Direct>> = pool.install(|| {
            ranges
                .into_par_iter()
                .map(|range| {
                    let mut cursor = 0;
                    samples[range]
                        .iter()
                        .map(|s| {
                            if !self.scheduler_threads.contains(&s.parent_pthread_id) {
                                return Direct::Deferred;
                            }
                            match find_enclosing(
                                &self.nodes,
                                s.parent_pthread_id,
                                s.parent_scheduled_time,
                                &mut cursor,
                            ) {
                                Some(node) => Direct::Node(node),
                                None => Direct::Failed,
                            }
                        })
                        .collect()
                })
                .collect()
        });
        slices.into_iter().flatten().collect()
    }
}

fn window(sample: &RawSample, node: usize) -> MatchedWindow {
    MatchedWindow {
        pthread_id: sample.pthread_id,
        time_begin: sample.time_begin,
        time_end: sample.time_end,
        sample: sample.id,
        node,
    }
}

// One recheck iteration over a frozen snapshot of the matched pool
fn recheck_pass(
    matched: &[MatchedWindow],
    samples: &[RawSample],
    deferred: &[usize],
    pool: &ThreadPool,
    partitions: usize,
) -> Vec<Option<MatchedWindow>> {
    let ranges = split(deferred.len(), partitions);
    let slices: Vec<Vec<Option<MatchedWindow>>> = pool.install(|| {
        ranges
            .into_par_iter()
            .map(|range| {
                let mut cursor = 0;
                deferred[range]
                    .iter()
                    .map(|&pos| {
                        let s = &samples[pos];
                        find_enclosing(matched, s.parent_pthread_id, s.parent_scheduled_time, &mut cursor)
                            .map(|i| matched[i])
                    })
                    .collect()
            })
            .collect()
    });
    slices.into_iter().flatten().collect()
}
