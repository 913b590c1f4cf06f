//! KPI identity across collection runs
//!
//! Each collection run numbers its KPIs independently. The same KPI, that
//! is the same set of labels, usually gets a different local index in every
//! run. This module turns label sets into canonical keys and hands out one
//! canonical index per distinct key, in order of first appearance.

use std::fmt;

use rustc_hash::FxHashMap;
use serde_json::{Map, Value};
use telefuse_capture::{kpi_map, labels::LabelSet};

/// Order-independent identity of a label set: its JSON rendering with keys
/// sorted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CanonicalKey(String);

impl CanonicalKey {
    /// The key as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CanonicalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Compute the canonical key of `labels`.
#[must_use]
pub fn canonicalize(labels: &LabelSet) -> CanonicalKey {
    let object: Map<String, Value> = labels
        .sorted()
        .into_iter()
        .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
        .collect();
    CanonicalKey(Value::Object(object).to_string())
}

/// One KPI as seen across every source of a metric type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalKpi {
    /// 1-based index, unique within the metric type
    pub index: u32,
    /// Identifying labels
    pub labels: LabelSet,
    source_refs: Vec<(String, u32)>,
}

impl CanonicalKpi {
    /// `(source_id, local_index)` pairs, in the order the sources were
    /// first seen.
    #[must_use]
    pub fn source_refs(&self) -> &[(String, u32)] {
        &self.source_refs
    }

    /// Local index of this KPI in `source_id`, if that source has it.
    #[must_use]
    pub fn local_index(&self, source_id: &str) -> Option<u32> {
        self.source_refs
            .iter()
            .find(|(id, _)| id == source_id)
            .map(|(_, local)| *local)
    }

    fn set_source_ref(&mut self, source_id: &str, local_index: u32) {
        match self.source_refs.iter_mut().find(|(id, _)| id == source_id) {
            Some(slot) => slot.1 = local_index,
            None => self.source_refs.push((source_id.to_string(), local_index)),
        }
    }

    /// The KPI map record of this KPI.
    #[must_use]
    pub fn record(&self) -> kpi_map::Record {
        kpi_map::Record {
            index: self.index,
            kpi: self.labels.clone(),
        }
    }
}

/// Canonical KPIs of one metric type.
#[derive(Debug, Default)]
pub struct Registry {
    by_key: FxHashMap<CanonicalKey, usize>,
    kpis: Vec<CanonicalKpi>,
}

impl Registry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `source_id` holds the KPI identified by `labels` under
    /// `local_index`. A label set seen for the first time gets the next
    /// canonical index; a known one gains or overwrites the source entry.
    pub fn register(&mut self, source_id: &str, local_index: u32, labels: LabelSet) -> &CanonicalKpi {
        let key = canonicalize(&labels);
        let position = if let Some(&position) = self.by_key.get(&key) {
            position
        } else {
            let position = self.kpis.len();
            let index = u32::try_from(position + 1).unwrap_or(u32::MAX);
            self.kpis.push(CanonicalKpi {
                index,
                labels,
                source_refs: Vec::new(),
            });
            self.by_key.insert(key, position);
            position
        };
        let kpi = &mut self.kpis[position];
        kpi.set_source_ref(source_id, local_index);
        kpi
    }

    /// KPIs in index order.
    #[must_use]
    pub fn kpis(&self) -> &[CanonicalKpi] {
        &self.kpis
    }

    /// Look up a KPI by its labels.
    #[must_use]
    pub fn get(&self, labels: &LabelSet) -> Option<&CanonicalKpi> {
        self.by_key
            .get(&canonicalize(labels))
            .map(|&position| &self.kpis[position])
    }

    /// Number of distinct KPIs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.kpis.len()
    }

    /// Whether no KPI has been registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.kpis.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn labels(pairs: &[(&str, &str)]) -> LabelSet {
        pairs.iter().copied().collect()
    }

    #[test]
    fn insertion_order_does_not_change_identity() {
        let a = labels(&[("ns", "a"), ("pod", "p1")]);
        let b = labels(&[("pod", "p1"), ("ns", "a")]);
        assert_eq!(canonicalize(&a), canonicalize(&b));
        assert_eq!(canonicalize(&a).as_str(), r#"{"ns":"a","pod":"p1"}"#);

        let mut registry = Registry::new();
        assert_eq!(registry.register("day-1", 7, a).index, 1);
        let kpi = registry.register("day-2", 3, b);
        assert_eq!(kpi.index, 1);
        assert_eq!(
            kpi.source_refs(),
            &[("day-1".to_string(), 7), ("day-2".to_string(), 3)]
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn indices_follow_first_appearance() {
        let mut registry = Registry::new();
        registry.register("s", 1, labels(&[("pod", "z")]));
        registry.register("s", 2, labels(&[("pod", "a")]));
        registry.register("t", 1, labels(&[("pod", "a")]));
        registry.register("t", 2, labels(&[("pod", "m")]));
        let order: Vec<(u32, Option<&str>)> = registry
            .kpis()
            .iter()
            .map(|k| (k.index, k.labels.get("pod")))
            .collect();
        assert_eq!(order, vec![(1, Some("z")), (2, Some("a")), (3, Some("m"))]);
    }

    #[test]
    fn repeated_source_overwrites_local_index() {
        let mut registry = Registry::new();
        registry.register("s", 1, labels(&[("pod", "a")]));
        let kpi = registry.register("s", 4, labels(&[("pod", "a")]));
        assert_eq!(kpi.source_refs(), &[("s".to_string(), 4)]);
        assert_eq!(kpi.local_index("s"), Some(4));
        assert_eq!(kpi.local_index("t"), None);
    }

    #[test]
    fn values_that_look_alike_stay_distinct() {
        let a = labels(&[("a", "b,c=d")]);
        let b = labels(&[("a", "b"), ("c", "d")]);
        assert_ne!(canonicalize(&a), canonicalize(&b));
    }

    proptest! {
        #[test]
        fn canonical_key_ignores_insertion_order(
            pairs in prop::collection::hash_map("[a-z]{1,6}", "[a-z0-9-]{0,6}", 0..8),
            seed in any::<u64>(),
        ) {
            let forward: Vec<(String, String)> = pairs.into_iter().collect();
            let mut shuffled = forward.clone();
            let len = shuffled.len();
            if len > 1 {
                let mut state = seed;
                for i in (1..len).rev() {
                    state = state.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
                    let j = usize::try_from(state >> 33).expect("fits") % (i + 1);
                    shuffled.swap(i, j);
                }
            }
            let a: LabelSet = forward.into_iter().collect();
            let b: LabelSet = shuffled.into_iter().collect();
            prop_assert_eq!(canonicalize(&a), canonicalize(&b));

            let mut registry = Registry::new();
            let first = registry.register("x", 1, a).index;
            let second = registry.register("y", 1, b).index;
            prop_assert_eq!(first, second);
            prop_assert_eq!(registry.len(), 1);
        }
    }
}
