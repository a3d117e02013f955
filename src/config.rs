//! Run configuration (optional TOML file, overridden by CLI flags)
//!
//! ```toml
//! threads = 8
//! max_threads = 16
//! partitions = 32
//! raw_log_pattern = "^mtmc_raw_"
//! clip_to_timeline = true
//! metric_precision = 2
//! ```

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::{Error, Result};
use crate::evaluator::DEFAULT_PRECISION;

/// Tuning knobs for one post-processing run
///
/// # Example
/// ```
/// use tmatrace::config::RunConfig;
///
/// let config = RunConfig::default();
/// assert_eq!(config.max_threads, 16);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Worker threads; `None` means `min(available cores, max_threads)`
    pub threads: Option<usize>,

    /// Upper bound on the automatically chosen worker count
    pub max_threads: usize,

    /// Slices per correlation pass; `None` means one per worker
    pub partitions: Option<usize>,

    /// Files in the log directory whose names match this regex are raw logs
    pub raw_log_pattern: String,

    /// Drop samples outside the timeline's overall time span
    pub clip_to_timeline: bool,

    /// Decimal places kept in metric values
    pub metric_precision: u32,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            threads: None,
            max_threads: 16,
            partitions: None,
            raw_log_pattern: "^mtmc_raw_".to_string(),
            clip_to_timeline: true,
            metric_precision: DEFAULT_PRECISION,
        }
    }
}

impl RunConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.threads == Some(0) {
            return Err(Error::RunConfig("threads must be >= 1".into()));
        }
        if self.max_threads == 0 {
            return Err(Error::RunConfig("max_threads must be >= 1".into()));
        }
        if self.partitions == Some(0) {
            return Err(Error::RunConfig("partitions must be >= 1".into()));
        }
        if self.metric_precision > 12 {
            return Err(Error::RunConfig(format!(
                "metric_precision must be <= 12, got {}",
                self.metric_precision
            )));
        }
        self.raw_log_regex()?;
        Ok(())
    }

    pub fn raw_log_regex(&self) -> Result<Regex> {
        Ok(Regex::new(&self.raw_log_pattern)?)
    }

    /// Worker count for the correlation pool
    pub fn worker_threads(&self) -> usize {
        self.threads
            .unwrap_or_else(|| num_cpus::get().min(self.max_threads))
            .max(1)
    }

    pub fn partition_count(&self) -> usize {
        self.partitions.unwrap_or_else(|| self.worker_threads())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = RunConfig::default();
        assert!(config.clip_to_timeline);
        assert_eq!(config.metric_precision, 2);
        assert!(config.worker_threads() >= 1);
        assert!(config.worker_threads() <= 16);
        assert_eq!(config.partition_count(), config.worker_threads());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = RunConfig::from_toml_str("threads = 3\nclip_to_timeline = false\n").unwrap();
        assert_eq!(config.worker_threads(), 3);
        assert!(!config.clip_to_timeline);
        assert_eq!(config.raw_log_pattern, "^mtmc_raw_");
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            RunConfig::from_toml_str("threads = 0"),
            Err(Error::RunConfig(_))
        ));
        assert!(matches!(
            RunConfig::from_toml_str("partitions = 0"),
            Err(Error::RunConfig(_))
        ));
        assert!(matches!(
            RunConfig::from_toml_str("raw_log_pattern = \"(\""),
            Err(Error::LogPattern(_))
        ));
        assert!(matches!(
            RunConfig::from_toml_str("threads = \"many\""),
            Err(Error::RunConfigToml(_))
        ));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "partitions = 7\nmetric_precision = 4").unwrap();

        let config = RunConfig::from_file(file.path()).unwrap();
        assert_eq!(config.partition_count(), 7);
        assert_eq!(config.metric_precision, 4);

        assert!(matches!(
            RunConfig::from_file("/nonexistent/run.toml"),
            Err(Error::Io { .. })
        ));
    }
}
