//! Label reduction and grouping
//!
//! Before aggregation the KPIs of a metric type are clustered into groups.
//! Each group is keyed by a tuple of label values and lists the canonical
//! indices of its members. Groups come out sorted by key; KPIs lacking a
//! label the key needs are left out.

use std::collections::{BTreeMap, BTreeSet};

use regex::Regex;
use telefuse_capture::labels::LabelSet;
use tracing::debug;

use crate::{
    canonical::CanonicalKpi,
    config::{Config, TargetNamespace},
    family::GroupingPolicy,
};

const SERVICE: &str = "service";

/// One aggregation group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    /// The grouping labels, written to the aggregated KPI map
    pub labels: LabelSet,
    /// Canonical indices of the members, ascending
    pub members: Vec<u32>,
}

/// Everything the policies need besides the KPIs themselves.
#[derive(Debug, Clone)]
pub struct Context {
    /// Populations at or below this size pass through
    pub small_population: usize,
    /// Labels with more distinct values than this are not grouped on
    pub max_label_cardinality: usize,
    /// Scope of the system under test
    pub target_namespace: Option<TargetNamespace>,
    /// Extracts a service name from a pod name
    pub service_pattern: Regex,
    /// Label joined to the service when present
    pub secondary_label: Option<String>,
    /// Keys naming a container, tried in order
    pub container_labels: Vec<String>,
    /// Keys naming a pod, tried in order
    pub pod_labels: Vec<String>,
}

impl Context {
    /// Build a context from the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the pod service pattern is invalid.
    pub fn from_config(config: &Config) -> Result<Self, crate::config::Error> {
        Ok(Self {
            small_population: config.thresholds.small_population,
            max_label_cardinality: config.thresholds.max_label_cardinality,
            target_namespace: config.target_namespace.clone(),
            service_pattern: config.service_regex()?,
            secondary_label: config.pod_service.secondary_label.clone(),
            container_labels: config.grouping_labels.container.clone(),
            pod_labels: config.grouping_labels.pod.clone(),
        })
    }
}

/// Cluster `kpis` according to `policy`.
#[must_use]
pub fn group(policy: &GroupingPolicy, kpis: &[&CanonicalKpi], ctx: &Context) -> Vec<Group> {
    match policy {
        GroupingPolicy::Automatic => automatic(&in_scope(kpis, ctx), ctx),
        GroupingPolicy::FixedLabels { labels, fill } => {
            let kpis = in_scope(kpis, ctx);
            partition(&kpis, labels, |kpi, label| {
                Some(kpi.labels.get(label).unwrap_or(fill).to_string())
            })
        }
        GroupingPolicy::DropLabels { labels } => {
            let kpis = in_scope(kpis, ctx);
            let keys: Vec<String> = cardinality(&kpis)
                .into_iter()
                .filter(|(key, n)| *n > 1 && !labels.iter().any(|l| l == key))
                .map(|(key, _)| key.to_string())
                .collect();
            by_labels(&kpis, &keys)
        }
        GroupingPolicy::SingleGroup => single_group(kpis),
        GroupingPolicy::PassThrough => pass_through(&in_scope(kpis, ctx)),
    }
}

/// Restrict `kpis` to the target namespace. Only applies when some KPI
/// carries the namespace label at all; KPIs without it are then out of
/// scope.
fn in_scope<'a>(kpis: &[&'a CanonicalKpi], ctx: &Context) -> Vec<&'a CanonicalKpi> {
    let Some(target) = &ctx.target_namespace else {
        return kpis.to_vec();
    };
    if !kpis.iter().any(|k| k.labels.contains_key(&target.label)) {
        return kpis.to_vec();
    }
    let scoped: Vec<&CanonicalKpi> = kpis
        .iter()
        .copied()
        .filter(|k| k.labels.get(&target.label) == Some(target.value.as_str()))
        .collect();
    debug!(
        "{} of {} KPIs in {}={}",
        scoped.len(),
        kpis.len(),
        target.label,
        target.value
    );
    scoped
}

/// Inspects, in order, `ctx.container_labels` and `ctx.pod_labels`. The
/// first key of a list that any KPI carries is the one grouped on.
fn automatic(kpis: &[&CanonicalKpi], ctx: &Context) -> Vec<Group> {
    if kpis.len() <= ctx.small_population {
        return pass_through(kpis);
    }
    let has = |label: &str| kpis.iter().any(|k| k.labels.contains_key(label));
    let first_of = |keys: &[String]| keys.iter().find(|key| has(key.as_str())).cloned();

    if let Some(container) = first_of(ctx.container_labels.as_slice()) {
        return by_labels(kpis, &[container]);
    }
    if let Some(pod) = first_of(ctx.pod_labels.as_slice()) {
        let mut keys = vec![SERVICE.to_string()];
        if let Some(secondary) = ctx.secondary_label.as_deref() {
            if has(secondary) {
                keys.push(secondary.to_string());
            }
        }
        return partition(kpis, &keys, |kpi, key| {
            if key == SERVICE {
                let name = kpi.labels.get(&pod)?;
                let service = ctx.service_pattern.captures(name)?.get(1)?;
                Some(service.as_str().to_string())
            } else {
                kpi.labels.get(key).map(str::to_string)
            }
        });
    }

    let keys: Vec<String> = cardinality(kpis)
        .into_iter()
        .filter(|(_, n)| *n > 1 && *n <= ctx.max_label_cardinality)
        .map(|(key, _)| key.to_string())
        .collect();
    if keys.len() <= 1 {
        single_group(kpis)
    } else {
        by_labels(kpis, &keys)
    }
}

/// Number of distinct values of every label key, keys sorted.
fn cardinality<'a>(kpis: &[&'a CanonicalKpi]) -> BTreeMap<&'a str, usize> {
    let mut values: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for kpi in kpis.iter().copied() {
        for (key, value) in kpi.labels.sorted() {
            values.entry(key).or_default().insert(value);
        }
    }
    values.into_iter().map(|(k, v)| (k, v.len())).collect()
}

/// One group over every KPI, keyed by the labels shared by all of them.
fn single_group(kpis: &[&CanonicalKpi]) -> Vec<Group> {
    let keys: Vec<String> = cardinality(kpis)
        .into_iter()
        .filter(|(_, n)| *n == 1)
        .map(|(key, _)| key.to_string())
        .collect();
    by_labels(kpis, &keys)
}

fn pass_through(kpis: &[&CanonicalKpi]) -> Vec<Group> {
    let mut groups: Vec<Group> = kpis
        .iter()
        .map(|kpi| Group {
            labels: kpi.labels.clone(),
            members: vec![kpi.index],
        })
        .collect();
    groups.sort_by_key(|g| g.members[0]);
    groups
}

fn by_labels(kpis: &[&CanonicalKpi], keys: &[String]) -> Vec<Group> {
    partition(kpis, keys, |kpi, key| kpi.labels.get(key).map(str::to_string))
}

/// Group `kpis` by the values `value_of` yields for `keys`. A KPI for which
/// any key yields `None` belongs to no group.
fn partition<F>(kpis: &[&CanonicalKpi], keys: &[String], value_of: F) -> Vec<Group>
where
    F: Fn(&CanonicalKpi, &str) -> Option<String>,
{
    let mut groups: BTreeMap<Vec<String>, Vec<u32>> = BTreeMap::new();
    let mut dropped = 0_usize;
    for kpi in kpis {
        let values: Option<Vec<String>> = keys.iter().map(|key| value_of(kpi, key)).collect();
        match values {
            Some(values) => groups.entry(values).or_default().push(kpi.index),
            None => dropped += 1,
        }
    }
    if dropped > 0 {
        debug!("{dropped} KPIs lack a grouping label among {keys:?}");
    }

    groups
        .into_iter()
        .map(|(values, mut members)| {
            members.sort_unstable();
            Group {
                labels: keys.iter().cloned().zip(values).collect(),
                members,
            }
        })
        .collect()
}
