//! Cross-source merging
//!
//! A canonical KPI may have samples in several collection runs. Merging
//! concatenates them in source order and resolves timestamps reported more
//! than once with the collision rule of the KPI's family.

use telefuse_capture::{
    frame::{self, Frame},
    sample::ValueKind,
};
use tracing::{debug, warn};

use crate::{canonical::CanonicalKpi, family::ValueSemantics, source::Store};

/// The merged samples of one canonical KPI.
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    /// Canonical index of the KPI
    pub index: u32,
    /// Value kind shared by every contributing source
    pub kind: ValueKind,
    /// One row per distinct timestamp, sorted, columns `kpi-<index>-<suffix>`
    pub frame: Frame,
}

/// Column name of component `suffix` of KPI `index` in a merged table.
#[must_use]
pub fn column_name(index: u32, suffix: &str) -> String {
    format!("kpi-{index}-{suffix}")
}

/// Merge every source's samples of `kpi`.
///
/// `stores` is iterated in order; stores that do not hold the KPI are
/// skipped, as are stores whose table cannot be read or disagrees with the
/// value kind of the first readable table. Returns `None` when no samples
/// were found at all.
///
/// # Errors
///
/// Returns an error only if the merged frame cannot be built.
pub fn merge<S: Store>(
    kpi: &CanonicalKpi,
    stores: &[S],
    metric_index: u32,
    semantics: ValueSemantics,
) -> Result<Option<Series>, frame::Error> {
    let mut kind: Option<ValueKind> = None;
    let mut timestamps = Vec::new();
    let mut components: Vec<Vec<f64>> = Vec::new();

    for store in stores {
        let Some(local_index) = kpi.local_index(store.id()) else {
            continue;
        };
        let table = match store.samples(metric_index, local_index) {
            Ok(table) => table,
            Err(err) => {
                warn!("Skipping KPI {} of source {}: {err}", kpi.index, store.id());
                continue;
            }
        };
        let expected = *kind.get_or_insert(table.kind);
        if table.kind != expected {
            warn!(
                "Skipping KPI {} of source {}: {:?} samples, expected {:?}",
                kpi.index,
                store.id(),
                table.kind,
                expected
            );
            continue;
        }
        if components.is_empty() {
            components = vec![Vec::new(); expected.width()];
        }
        for sample in table.samples {
            timestamps.push(sample.timestamp);
            for (column, value) in components.iter_mut().zip(sample.value.components()) {
                column.push(value);
            }
        }
    }

    let Some(kind) = kind else {
        debug!("KPI {} has no readable source", kpi.index);
        return Ok(None);
    };
    if timestamps.is_empty() {
        debug!("KPI {} has no samples", kpi.index);
        return Ok(None);
    }

    let mut concatenated = Frame::with_timestamps(timestamps);
    for (suffix, values) in kind.suffixes().iter().zip(components) {
        concatenated.push_column(column_name(kpi.index, suffix), values)?;
    }
    let frame = concatenated.collapse_duplicates(|values| semantics.resolve(values));

    Ok(Some(Series {
        index: kpi.index,
        kind,
        frame,
    }))
}
