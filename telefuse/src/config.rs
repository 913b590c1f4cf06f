//! This module controls configuration parsing from the end user. Every path,
//! threshold and family rule the pipeline uses comes through here; nothing
//! downstream hardcodes them.
use std::{
    fs,
    io,
    path::{Path, PathBuf},
};

use regex::Regex;
use rustc_hash::FxHashSet;
use serde::Deserialize;

use crate::family::{self, Family};

/// Errors produced by [`Config`]
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Error for a serde [`serde_yaml`].
    #[error("Failed to deserialize yaml: {0}")]
    SerdeYaml(#[from] serde_yaml::Error),
    /// Error reading config file
    #[error("Failed to read config file {path:?}: {source}")]
    ReadFile {
        /// File path
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: Box<io::Error>,
    },
    /// No collection runs were configured.
    #[error("At least one source must be configured")]
    NoSources,
    /// Two sources share an id.
    #[error("Duplicate source ID found: {0}")]
    DuplicateSourceId(String),
    /// A threshold that must be positive is zero.
    #[error("Threshold {0} must be greater than zero")]
    ZeroThreshold(&'static str),
    /// The pod service pattern is not a valid regex.
    #[error("Invalid pod service pattern: {0}")]
    Regex(#[from] regex::Error),
    /// The pod service pattern has no capture group.
    #[error("Pod service pattern {0:?} must have a capture group")]
    NoCaptureGroup(String),
}

/// One collection run to read KPIs from.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Source {
    /// Identifier of the run, unique within the configuration
    pub id: String,
    /// Root directory of the run
    pub path: PathBuf,
}

fn default_small_population() -> usize {
    16
}

fn default_max_label_cardinality() -> usize {
    20
}

fn default_minute_seconds() -> u32 {
    60
}

/// Numeric knobs of the reducer and assembler.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Thresholds {
    /// Metric types with at most this many KPIs are passed through
    /// unaggregated.
    #[serde(default = "default_small_population")]
    pub small_population: usize,
    /// Labels with more distinct values than this are too fine-grained to
    /// group by.
    #[serde(default = "default_max_label_cardinality")]
    pub max_label_cardinality: usize,
    /// Granularity, in seconds, timestamps are rounded to before the final
    /// join.
    #[serde(default = "default_minute_seconds")]
    pub minute_seconds: u32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            small_population: default_small_population(),
            max_label_cardinality: default_max_label_cardinality(),
            minute_seconds: default_minute_seconds(),
        }
    }
}

/// The label/value pair that scopes KPIs to the system under test.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct TargetNamespace {
    /// Label key, e.g. `namespace`
    pub label: String,
    /// Required value
    pub value: String,
}

fn default_service_pattern() -> String {
    "^([a-z][-a-z]*)-".to_string()
}

fn default_secondary_label() -> Option<String> {
    Some("remote_network".to_string())
}

/// How a service name is recovered from a pod name.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PodService {
    /// Regex whose first capture group is the service name
    #[serde(default = "default_service_pattern")]
    pub pattern: String,
    /// Extra label joined to the service in the grouping key, when KPIs
    /// carry it
    #[serde(default = "default_secondary_label")]
    pub secondary_label: Option<String>,
}

impl Default for PodService {
    fn default() -> Self {
        Self {
            pattern: default_service_pattern(),
            secondary_label: default_secondary_label(),
        }
    }
}

fn default_container_labels() -> Vec<String> {
    vec!["container".to_string(), "container_name".to_string()]
}

fn default_pod_labels() -> Vec<String> {
    vec!["pod".to_string(), "pod_name".to_string()]
}

/// Label keys the automatic grouping policy looks for. Collectors spell
/// them differently, so each is a list tried in order.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct GroupingLabels {
    /// Keys naming a container
    #[serde(default = "default_container_labels")]
    pub container: Vec<String>,
    /// Keys naming a pod
    #[serde(default = "default_pod_labels")]
    pub pod: Vec<String>,
}

impl Default for GroupingLabels {
    fn default() -> Self {
        Self {
            container: default_container_labels(),
            pod: default_pod_labels(),
        }
    }
}

fn default_load_test_prefix() -> String {
    "lm-".to_string()
}

/// Load-test statistics joined into the wide table.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LoadTest {
    /// Stats history CSV written by the load generator
    pub path: PathBuf,
    /// Prefix of every load-test column in the wide table
    #[serde(default = "default_load_test_prefix")]
    pub prefix: String,
}

/// Main configuration struct for this program
#[derive(Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Collection runs, in source-enumeration order
    pub sources: Vec<Source>,
    /// Output root directory
    pub output: PathBuf,
    /// Reducer and assembler thresholds
    #[serde(default)]
    pub thresholds: Thresholds,
    /// Scope for policies that only consider the system under test
    #[serde(default)]
    pub target_namespace: Option<TargetNamespace>,
    /// Service extraction for pod-labelled KPIs
    #[serde(default)]
    pub pod_service: PodService,
    /// Container and pod label keys for automatic grouping
    #[serde(default)]
    pub grouping_labels: GroupingLabels,
    /// Family table, first match wins
    #[serde(default = "family::builtin")]
    #[serde(with = "serde_yaml::with::singleton_map_recursive")]
    pub families: Vec<Family>,
    /// Load-test statistics history to join into the wide table
    #[serde(default)]
    pub load_test: Option<LoadTest>,
}

impl Config {
    /// Directory of merged per-metric-type tables.
    #[must_use]
    pub fn combined_dir(&self) -> PathBuf {
        self.output.join("combined")
    }

    /// Directory of aggregated per-metric-type tables.
    #[must_use]
    pub fn aggregated_dir(&self) -> PathBuf {
        self.output.join("aggregated")
    }

    /// Catalog of metric types already processed.
    #[must_use]
    pub fn processed_catalog(&self) -> PathBuf {
        self.output.join("metric_type_map.csv")
    }

    /// The final wide table.
    #[must_use]
    pub fn wide_table(&self) -> PathBuf {
        self.output.join("complete-time-series.csv")
    }

    /// Check the parts of the configuration serde cannot.
    ///
    /// # Errors
    ///
    /// Returns an error if no source is configured, a source id repeats, a
    /// threshold is zero or the pod service pattern is unusable.
    pub fn validate(&self) -> Result<(), Error> {
        if self.sources.is_empty() {
            return Err(Error::NoSources);
        }
        let mut ids = FxHashSet::default();
        for source in &self.sources {
            if !ids.insert(source.id.as_str()) {
                return Err(Error::DuplicateSourceId(source.id.clone()));
            }
        }
        if self.thresholds.small_population == 0 {
            return Err(Error::ZeroThreshold("small_population"));
        }
        if self.thresholds.max_label_cardinality == 0 {
            return Err(Error::ZeroThreshold("max_label_cardinality"));
        }
        if self.thresholds.minute_seconds == 0 {
            return Err(Error::ZeroThreshold("minute_seconds"));
        }
        self.service_regex()?;
        Ok(())
    }

    /// Compile the pod service pattern.
    ///
    /// # Errors
    ///
    /// Returns an error if the pattern does not compile or has no capture
    /// group.
    pub fn service_regex(&self) -> Result<Regex, Error> {
        let regex = Regex::new(&self.pod_service.pattern)?;
        if regex.captures_len() < 2 {
            return Err(Error::NoCaptureGroup(self.pod_service.pattern.clone()));
        }
        Ok(regex)
    }
}

/// Parse a configuration from YAML text and validate it.
///
/// # Errors
///
/// Returns an error if the text is not a valid configuration.
pub fn parse_config(contents: &str) -> Result<Config, Error> {
    let config: Config = serde_yaml::from_str(contents)?;
    config.validate()?;
    Ok(config)
}

/// Load and validate the configuration file at `path`.
///
/// # Errors
///
/// Returns an error if the file cannot be read or is not a valid
/// configuration.
pub fn load_config_from_path(path: &Path) -> Result<Config, Error> {
    let contents = fs::read_to_string(path).map_err(|source| Error::ReadFile {
        path: path.to_path_buf(),
        source: Box::new(source),
    })?;
    parse_config(&contents)
}
