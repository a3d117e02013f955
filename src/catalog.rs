//! Metric catalog loaded from the per-architecture JSON file
//!
//! The catalog names every metric once (events with their formula aliases,
//! constants with theirs) and then lists the hardware-multiplexed
//! configuration groups. A sample's `config_index` selects the group.
//!
//! # Example JSON
//! ```json
//! {
//!   "AlwaysSampleTopdown": 1,
//!   "OverallCnsts": ["DURATIONTIMEINMILLISECONDS", "SYSTEM_TSC_FREQ"],
//!   "Metrics": [{
//!     "LegacyName": "metric_CPI",
//!     "Events": [{"Name": "CPU_CLK_UNHALTED.THREAD", "Alias": "a"},
//!                {"Name": "INST_RETIRED.ANY", "Alias": "b"}],
//!     "Formula": "a / b",
//!     "Constants": []
//!   }],
//!   "Configs": [{
//!     "EventList": ["CPU_CLK_UNHALTED.THREAD", "INST_RETIRED.ANY"],
//!     "Metrics": ["metric_CPI"],
//!     "Constants": []
//!   }]
//! }
//! ```

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use tracing::warn;

use crate::error::{Error, Result};

/// Packed top-down register holding eight byte-sized weights
pub const PACKED_METRICS_EVENT: &str = "PERF_METRICS";

/// Slot counter the packed weights are normalised against
pub const SLOTS_EVENT: &str = "TOPDOWN.SLOTS";

/// Constant that always resolves to the sample's own duration
pub const DURATION_MS_CONSTANT: &str = "DURATIONTIMEINMILLISECONDS";

/// Sub-metrics of the packed register, in byte order
pub const COMPOSITE_SUBMETRICS: [&str; 8] = [
    "RETIRING",
    "BAD_SPECULATION",
    "FRONTEND_BOUND",
    "BACKEND_BOUND",
    "HEAVY_OPERATIONS",
    "BRANCH_MISPREDICTS",
    "FETCH_LATENCY",
    "MEMORY_BOUND",
];

/// Byte index of a composite event such as `PERF_METRICS.FRONTEND_BOUND`
pub fn composite_byte(event: &str) -> Option<u8> {
    let sub = event
        .strip_prefix(PACKED_METRICS_EVENT)?
        .strip_prefix('.')?;
    COMPOSITE_SUBMETRICS
        .iter()
        .position(|s| s.eq_ignore_ascii_case(sub))
        .map(|i| i as u8)
}

/// Event referenced by a formula through a short alias
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventAlias {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Alias")]
    pub alias: String,
}

/// Constant referenced by a formula through a short alias
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstantAlias {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Alias")]
    pub alias: String,
}

/// One named formula
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricDefinition {
    #[serde(rename = "LegacyName", alias = "MetricName")]
    pub name: String,
    #[serde(rename = "Events", default)]
    pub events: Vec<EventAlias>,
    #[serde(rename = "Formula")]
    pub formula: String,
    #[serde(rename = "Constants", default)]
    pub constants: Vec<ConstantAlias>,
}

impl MetricDefinition {
    /// Event names in alias order
    pub fn target_events(&self) -> impl Iterator<Item = &str> {
        self.events.iter().map(|e| e.name.as_str())
    }

    /// Uses packed PERF_METRICS sub-metrics, which need slot interpolation
    pub fn is_composite(&self) -> bool {
        self.target_events().any(|e| composite_byte(e).is_some())
    }
}

/// One PMU programming: the events it reads and the metrics it reports
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigurationGroup {
    #[serde(rename = "EventList")]
    pub event_names: Vec<String>,
    #[serde(rename = "Metrics", default)]
    pub metrics: Vec<String>,
    #[serde(rename = "Constants", default)]
    pub constants: Vec<String>,
}

/// The whole catalog file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricCatalog {
    #[serde(rename = "Metrics", default)]
    pub metrics: Vec<MetricDefinition>,
    #[serde(
        rename = "AlwaysSampleTopdown",
        default,
        deserialize_with = "deserialize_flag"
    )]
    pub always_sample_topdown: bool,
    /// Global order of the constants carried by every sample
    #[serde(rename = "OverallCnsts", default)]
    pub overall_constants: Option<Vec<String>>,
    #[serde(rename = "Configs")]
    pub configs: Vec<ConfigurationGroup>,
}

fn deserialize_flag<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<bool, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(i64),
    }

    Ok(match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => b,
        Flag::Int(i) => i == 1,
    })
}

impl MetricCatalog {
    /// Load and validate a catalog file
    ///
    /// # Errors
    /// Fails with a ConfigError if the file is missing, is not valid JSON or is
    /// structurally inconsistent (see [`MetricCatalog::validate`]).
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| Error::Catalog(format!("cannot read {}: {e}", path.display())))?;
        Self::from_json_str(&content)
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        let catalog: Self = serde_json::from_str(content).map_err(Error::CatalogJson)?;
        catalog.validate()?;
        Ok(catalog)
    }

    /// Structural checks that make the catalog unusable when violated
    pub fn validate(&self) -> Result<()> {
        if self.configs.is_empty() {
            return Err(Error::Catalog("no configuration groups ('Configs' is empty)".into()));
        }

        let mut names = HashSet::new();
        for metric in &self.metrics {
            if !names.insert(metric.name.as_str()) {
                warn!(metric = %metric.name, "duplicate metric definition, the first one wins");
            }

            let mut aliases = HashSet::new();
            let all_aliases = metric
                .events
                .iter()
                .map(|e| &e.alias)
                .chain(metric.constants.iter().map(|c| &c.alias));
            for alias in all_aliases {
                if !is_identifier(alias) {
                    return Err(Error::Catalog(format!(
                        "metric '{}' uses invalid alias {alias:?}",
                        metric.name
                    )));
                }
                if !aliases.insert(alias.as_str()) {
                    return Err(Error::Catalog(format!(
                        "metric '{}' binds alias '{alias}' twice",
                        metric.name
                    )));
                }
            }
        }

        for (index, config) in self.configs.iter().enumerate() {
            for name in &config.metrics {
                if !names.contains(name.as_str()) {
                    return Err(Error::Catalog(format!(
                        "configuration {index} requests unknown metric '{name}'"
                    )));
                }
            }
        }

        Ok(())
    }

    pub fn metric(&self, name: &str) -> Option<&MetricDefinition> {
        self.metrics.iter().find(|m| m.name == name)
    }

    /// The event is programmed by at least one configuration group
    pub fn is_event_programmed(&self, event: &str) -> bool {
        self.configs
            .iter()
            .any(|c| c.event_names.iter().any(|e| e == event))
    }

    /// Some configuration programs both the packed register and the slot counter
    pub fn has_packed_registers(&self) -> bool {
        self.configs.iter().any(|c| {
            c.event_names.iter().any(|e| e == PACKED_METRICS_EVENT)
                && c.event_names.iter().any(|e| e == SLOTS_EVENT)
        })
    }

    /// Position of a constant in a sample's constant list for configuration `config`
    pub fn constant_position(&self, config: usize, name: &str) -> Option<usize> {
        match &self.overall_constants {
            Some(order) => order.iter().position(|c| c == name),
            None => self
                .configs
                .get(config)?
                .constants
                .iter()
                .position(|c| c == name),
        }
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
