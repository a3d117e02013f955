//! tmatrace - hardware counter sample post-processing
//!
//! Correlates the raw samples written by a multi-threaded PMU collector with
//! the application's operation timeline, and derives per-sample metrics:
//! catalog formulas compiled per counter configuration, plus the 12-metric
//! top-down (TMA) breakdown from the packed PERF_METRICS register.

pub mod catalog;
pub mod cli;
pub mod config;
pub mod equation;
pub mod error;
pub mod evaluator;
pub mod json_output;
pub mod post_process;
pub mod sample;
pub mod timeline;
pub mod timeline_mapper;
pub mod topdown;

pub use error::{Error, Result};
