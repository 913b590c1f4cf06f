//! Metric families
//!
//! A family is a set of metric types sharing value semantics and a grouping
//! policy. Families are matched against the metric type name once, before
//! any merging or grouping happens; the first matching family wins.

use serde::{Deserialize, Serialize};

use crate::stats;

/// How the values of a family behave over time. Decides how two samples
/// reported for the same instant are folded into one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ValueSemantics {
    /// Monotonic or count-like values; collisions are summed.
    Counter,
    /// Snapshots of a level; collisions are averaged.
    #[default]
    Gauge,
    /// Values derived from other series; collisions take the median.
    Derived,
}

impl ValueSemantics {
    /// Fold the values reported for one instant into one value.
    #[must_use]
    pub fn resolve(self, values: &[f64]) -> f64 {
        match self {
            ValueSemantics::Counter => stats::sum(values),
            ValueSemantics::Gauge => stats::mean(values),
            ValueSemantics::Derived => stats::median(values),
        }
    }
}

/// What a merged sample stands for once the KPIs of a metric type are
/// joined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ValueTransform {
    /// The sampled value itself.
    #[default]
    Identity,
    /// 1 where the KPI has a sample, 0 where it has none. For series whose
    /// values are bookkeeping, like the instant an alert became active.
    Presence,
}

impl ValueTransform {
    /// Apply the transform to one cell of the joined table.
    #[must_use]
    pub fn apply(self, value: f64) -> f64 {
        match self {
            ValueTransform::Identity => value,
            ValueTransform::Presence if value.is_nan() => 0.0,
            ValueTransform::Presence => 1.0,
        }
    }
}

/// How a metric type name is matched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FamilyMatch {
    /// The whole name
    Exact(String),
    /// A leading part of the name
    Prefix(String),
}

impl FamilyMatch {
    fn matches(&self, metric_type: &str) -> bool {
        match self {
            FamilyMatch::Exact(name) => metric_type == name,
            FamilyMatch::Prefix(prefix) => metric_type.starts_with(prefix.as_str()),
        }
    }
}

fn default_fill() -> String {
    "undefined".to_string()
}

/// How the KPIs of one metric type are clustered before aggregation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum GroupingPolicy {
    /// Pick a grouping from the labels the KPIs carry. Small populations
    /// pass through. Otherwise the KPIs are grouped by the first configured
    /// container label any of them carries (`container`, then
    /// `container_name` by default). Failing that, by the service parsed
    /// from the first pod label present (`pod`, then `pod_name`), joined
    /// with the secondary label. Failing that, by the labels of moderate
    /// cardinality.
    #[default]
    Automatic,
    /// Group by a fixed list of labels.
    FixedLabels {
        /// Labels forming the grouping key, in key order
        labels: Vec<String>,
        /// Stand-in for a label a KPI does not carry
        #[serde(default = "default_fill")]
        fill: String,
    },
    /// Group by every label that varies, less a list of known noise labels.
    DropLabels {
        /// Labels never used for grouping
        labels: Vec<String>,
    },
    /// Fold every KPI into one group keyed by the labels all KPIs share.
    SingleGroup,
    /// Keep every KPI as its own output column.
    PassThrough,
}

/// One family: which metric types it covers and how they are treated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Family {
    /// Metric type matcher
    #[serde(rename = "match")]
    pub matcher: FamilyMatch,
    /// Collision rule for merged samples
    #[serde(default)]
    pub semantics: ValueSemantics,
    /// Grouping policy for aggregation
    #[serde(default)]
    pub policy: GroupingPolicy,
    /// Cell transform applied to the joined KPI table
    #[serde(default)]
    pub transform: ValueTransform,
}

impl Family {
    fn new(matcher: FamilyMatch, semantics: ValueSemantics, policy: GroupingPolicy) -> Self {
        Self {
            matcher,
            semantics,
            policy,
            transform: ValueTransform::Identity,
        }
    }

    fn with_transform(mut self, transform: ValueTransform) -> Self {
        self.transform = transform;
        self
    }
}

/// The families telefuse knows about without configuration.
#[must_use]
pub fn builtin() -> Vec<Family> {
    use FamilyMatch::{Exact, Prefix};
    use GroupingPolicy::{DropLabels, FixedLabels, PassThrough, SingleGroup};
    use ValueSemantics::{Counter, Derived, Gauge};

    let strings = |xs: &[&str]| xs.iter().map(|s| (*s).to_string()).collect::<Vec<_>>();
    vec![
        Family::new(
            Exact("ALERTS".to_string()),
            Counter,
            FixedLabels {
                labels: strings(&["alertname", "alertstate", "container"]),
                fill: default_fill(),
            },
        ),
        Family::new(
            Exact("ALERTS_FOR_STATE".to_string()),
            Counter,
            FixedLabels {
                labels: strings(&["alertname", "container"]),
                fill: default_fill(),
            },
        )
        .with_transform(ValueTransform::Presence),
        Family::new(
            Prefix("kube_".to_string()),
            Gauge,
            DropLabels {
                labels: strings(&["instance", "pod", "status", "condition"]),
            },
        ),
        Family::new(Prefix("node_".to_string()), Gauge, SingleGroup),
        Family::new(Prefix("instance".to_string()), Gauge, SingleGroup),
        Family::new(Prefix("namespace".to_string()), Derived, PassThrough),
        Family::new(Prefix(":node".to_string()), Derived, PassThrough),
        Family::new(Prefix("node:".to_string()), Derived, PassThrough),
    ]
}

/// Ordered family table with a fallback for unmatched metric types.
#[derive(Debug, Clone)]
pub struct Registry {
    families: Vec<Family>,
    fallback: Family,
}

impl Registry {
    /// Create a registry from `families`, searched in order.
    #[must_use]
    pub fn new(families: Vec<Family>) -> Self {
        Self {
            families,
            fallback: Family::new(
                FamilyMatch::Prefix(String::new()),
                ValueSemantics::Gauge,
                GroupingPolicy::Automatic,
            ),
        }
    }

    /// The family covering `metric_type`.
    #[must_use]
    pub fn lookup(&self, metric_type: &str) -> &Family {
        self.families
            .iter()
            .find(|f| f.matcher.matches(metric_type))
            .unwrap_or(&self.fallback)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(builtin())
    }
}
