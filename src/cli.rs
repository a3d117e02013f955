//! CLI argument parsing for tmatrace

use clap::{ArgAction, Parser, ValueEnum};
use std::path::PathBuf;

use crate::config::RunConfig;

/// Output format for the run report
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Coverage table only (default)
    Text,
    /// Coverage plus every enriched sample as JSON
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "tmatrace")]
#[command(version)]
#[command(
    about = "Correlate hardware counter samples with an application timeline and derive top-down metrics",
    long_about = None
)]
pub struct Cli {
    /// Directory holding the collector's raw logs
    #[arg(short, long, value_name = "DIR")]
    pub logs: PathBuf,

    /// Metric catalog JSON for the target CPU
    #[arg(short, long, value_name = "FILE")]
    pub catalog: PathBuf,

    /// Node-state JSON (timeline + scheduler threads); omit for normal mode
    #[arg(short, long, value_name = "FILE")]
    pub nodes: Option<PathBuf>,

    /// Run configuration TOML
    #[arg(long = "config", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Write the report here instead of stdout
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Output format
    #[arg(long = "format", value_enum, default_value = "text")]
    pub format: OutputFormat,

    /// Worker threads (default: available cores, at most max_threads)
    #[arg(short = 'j', long, value_name = "N")]
    pub threads: Option<usize>,

    /// Slices per correlation pass (default: one per worker)
    #[arg(long, value_name = "N")]
    pub partitions: Option<usize>,

    /// Read only this raw log file (repeatable); disables pattern discovery
    #[arg(long = "raw-log", value_name = "NAME")]
    pub raw_logs: Vec<String>,

    /// Keep samples outside the timeline's time span
    #[arg(long = "no-clip")]
    pub no_clip: bool,

    /// More logging (-v debug, -vv trace); RUST_LOG takes precedence
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    /// Apply command-line overrides on top of a file (or default) configuration
    pub fn apply_overrides(&self, mut config: RunConfig) -> RunConfig {
        if self.threads.is_some() {
            config.threads = self.threads;
        }
        if self.partitions.is_some() {
            config.partitions = self.partitions;
        }
        if self.no_clip {
            config.clip_to_timeline = false;
        }
        config
    }
}
