//! Error taxonomy for the post-processing pipeline
//!
//! Only structurally invalid inputs are fatal: a missing or malformed metric
//! catalog, an unsorted timeline, or a bad run configuration. Everything that
//! can go wrong with a single raw-log line or a single metric is recovered
//! locally and reported through the coverage/metric outputs instead.

use std::path::PathBuf;
use thiserror::Error;

use crate::equation::FormulaError;

/// Fatal errors for a post-processing run
#[derive(Error, Debug)]
pub enum Error {
    #[error("Failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid metric catalog: {0}")]
    Catalog(String),

    #[error("Malformed metric catalog JSON: {0}")]
    CatalogJson(#[source] serde_json::Error),

    #[error("Formula for metric '{metric}' is invalid: {source}")]
    Formula {
        metric: String,
        #[source]
        source: FormulaError,
    },

    #[error("Timeline nodes must be sorted by start time (node {index} starts before its predecessor)")]
    UnsortedTimeline { index: usize },

    #[error("Malformed node state JSON: {0}")]
    NodeState(#[source] serde_json::Error),

    #[error("Invalid run configuration: {0}")]
    RunConfig(String),

    #[error("Malformed run configuration TOML: {0}")]
    RunConfigToml(#[from] toml::de::Error),

    #[error("Invalid raw log pattern: {0}")]
    LogPattern(#[from] regex::Error),

    #[error("Failed to build worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}

impl Error {
    /// Build an I/O error that remembers which file was involved
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// True for the ConfigError class: the catalog itself is unusable
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Self::Catalog(_) | Self::CatalogJson(_) | Self::Formula { .. }
        )
    }
}

/// Result type for post-processing operations
pub type Result<T> = std::result::Result<T, Error>;
