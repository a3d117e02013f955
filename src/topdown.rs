//! Top-down (TMA) breakdown from the packed PERF_METRICS register
//!
//! Each byte of the register is a sub-metric weight normalised to 255. The
//! begin/end reads are scaled by the matching slot counter reads, so the
//! per-window weight is the slot-weighted difference over the slot delta.
//!
//! Level 1: Retiring, Bad Speculation, Frontend Bound, Backend Bound.
//! Level 2: Heavy/Light Operations, Branch Mispredicts/Machine Clears,
//! Fetch Latency/Bandwidth, Memory/Core Bound.

use serde::Serialize;

use crate::evaluator::round_to;
use crate::sample::TopdownCounters;

/// Divisor floor for near-empty windows
pub const EPSILON: f64 = 1e-6;

/// Decimal places of every reported percentage
pub const PRECISION: u32 = 3;

/// Twelve top-down percentages
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TopDownBreakdown {
    pub retiring: f64,
    pub bad_speculation: f64,
    pub frontend_bound: f64,
    pub backend_bound: f64,
    pub heavy_operations: f64,
    pub light_operations: f64,
    pub branch_mispredicts: f64,
    pub machine_clears: f64,
    pub fetch_latency: f64,
    pub fetch_bandwidth: f64,
    pub memory_bound: f64,
    pub core_bound: f64,
}

fn byte(value: u64, index: usize) -> f64 {
    ((value >> (8 * index)) & 0xff) as f64
}

fn round(v: f64) -> f64 {
    round_to(v, PRECISION)
}

// Level-2 share left over by its measured sibling
fn complement(parent: f64, sibling: f64) -> f64 {
    round(parent - sibling).max(0.0)
}

impl TopDownBreakdown {
    pub fn calculate(counters: &TopdownCounters) -> Self {
        let slot_begin = counters.slot_begin as f64;
        let slot_end = counters.slot_end as f64;

        let mut slot_delta = slot_end - slot_begin;
        if slot_delta.abs() < EPSILON {
            slot_delta = EPSILON;
        }
        let drop_delta = counters.drop_end as f64 - counters.drop_begin as f64;
        let drop_ratio = drop_delta / slot_delta;

        let mut weighted = [0.0_f64; 8];
        for (i, w) in weighted.iter_mut().enumerate() {
            *w = (byte(counters.metric_end, i) * slot_end
                - byte(counters.metric_begin, i) * slot_begin)
                / slot_delta;
        }

        // Packed-counter noise can push level-1 weights below zero
        let floor = weighted[..4].iter().copied().fold(0.0_f64, f64::min);
        let shift = floor.abs();
        weighted.iter_mut().for_each(|w| *w += shift);

        let mut sum1: f64 = weighted[..4].iter().sum();
        if sum1.abs() < EPSILON {
            sum1 = EPSILON;
        }
        let share = |i: usize| weighted[i] / sum1;

        let retiring = round(100.0 * share(0));
        let backend_bound = round(100.0 * share(3));
        let frontend_bound = round(100.0 * (share(2) - drop_ratio));
        let bad_speculation =
            round(100.0 * (1.0 - share(0) - (share(2) - drop_ratio) - share(3)));

        let heavy_operations = round(100.0 * share(4));
        let branch_mispredicts = round(100.0 * share(5));
        let fetch_latency = round(100.0 * (share(6) - drop_ratio));
        let memory_bound = round(100.0 * share(7));

        Self {
            retiring,
            bad_speculation,
            frontend_bound,
            backend_bound,
            heavy_operations,
            light_operations: complement(retiring, heavy_operations),
            branch_mispredicts,
            machine_clears: complement(bad_speculation, branch_mispredicts),
            fetch_latency,
            fetch_bandwidth: complement(frontend_bound, fetch_latency),
            memory_bound,
            core_bound: complement(backend_bound, memory_bound),
        }
    }

    /// Sum of the four level-1 categories
    pub fn level1_total(&self) -> f64 {
        self.retiring + self.bad_speculation + self.frontend_bound + self.backend_bound
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pack(bytes: [u8; 8]) -> u64 {
        u64::from_le_bytes(bytes)
    }

    fn counters(slot_end: u64, bytes: [u8; 8], drop_end: u64) -> TopdownCounters {
        TopdownCounters {
            slot_begin: 0,
            metric_begin: 0,
            drop_begin: 0,
            slot_end,
            metric_end: pack(bytes),
            drop_end,
        }
    }

    #[test]
    fn test_even_split() {
        let td = TopDownBreakdown::calculate(&counters(1000, [64, 64, 64, 63, 32, 16, 32, 40], 0));
        let sum1 = 255.0;
        assert_eq!(td.retiring, round(100.0 * 64.0 / sum1));
        assert_eq!(td.backend_bound, round(100.0 * 63.0 / sum1));
        assert_eq!(td.heavy_operations, round(100.0 * 32.0 / sum1));
        assert_eq!(td.light_operations, round(td.retiring - td.heavy_operations));
        assert!((td.level1_total() - 100.0).abs() <= 0.01);
    }

    #[test]
    fn test_drop_correction_moves_frontend_to_bad_speculation() {
        let without = TopDownBreakdown::calculate(&counters(1000, [50, 50, 100, 55, 0, 0, 80, 0], 0));
        let with = TopDownBreakdown::calculate(&counters(1000, [50, 50, 100, 55, 0, 0, 80, 0], 100));

        // 100 dropped uops over 1000 slots = 10 points
        assert!((without.frontend_bound - with.frontend_bound - 10.0).abs() < 1e-6);
        assert!((with.bad_speculation - without.bad_speculation - 10.0).abs() < 1e-6);
        assert!((without.fetch_latency - with.fetch_latency - 10.0).abs() < 1e-6);
        assert_eq!(with.retiring, without.retiring);
    }

    #[test]
    fn test_zero_slots_is_defined() {
        let td = TopDownBreakdown::calculate(&counters(0, [0; 8], 0));
        assert!(td.retiring.is_finite());
        assert!(td.frontend_bound.is_finite());
        assert_eq!(td.retiring, 0.0);
    }

    #[test]
    fn test_negative_weights_are_shifted() {
        // Retiring weight shrinks between reads, giving a negative level-1 weight
        let td = TopDownBreakdown::calculate(&TopdownCounters {
            slot_begin: 1000,
            metric_begin: pack([200, 10, 10, 10, 0, 0, 0, 0]),
            drop_begin: 0,
            slot_end: 2000,
            metric_end: pack([50, 60, 60, 60, 0, 0, 0, 0]),
            drop_end: 0,
        });
        assert!(td.retiring >= 0.0);
        assert!(td.backend_bound >= 0.0);
        assert!((td.level1_total() - 100.0).abs() <= 0.01);
    }

    #[test]
    fn test_complements_clamp_at_zero() {
        // Heavy ops larger than retiring
        let td = TopDownBreakdown::calculate(&counters(1000, [10, 80, 80, 85, 40, 0, 0, 0], 0));
        assert!(td.heavy_operations > td.retiring);
        assert_eq!(td.light_operations, 0.0);
    }
}
