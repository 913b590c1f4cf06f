//! Statistical aggregation of grouped KPIs
//!
//! Every group of a metric type becomes one column set of the aggregated
//! table. A group with a single surviving member is renamed as is; larger
//! groups are reduced row by row, across members, into a fixed battery of
//! statistics. Distribution values get the battery once per component.

use telefuse_capture::{
    frame::{self, Frame},
    kpi_map,
    sample::ValueKind,
};

use crate::{group::Group, merge::column_name, stats};

/// The aggregated table of one metric type and its KPI map.
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregated {
    /// Columns `agg-kpi-<g>...`, same index as the merged table
    pub frame: Frame,
    /// Group index to grouping labels
    pub kpi_map: Vec<kpi_map::Record>,
}

fn single_name(group: u32, kind: ValueKind, suffix: &str) -> String {
    match kind {
        ValueKind::Scalar => format!("agg-kpi-{group}"),
        ValueKind::Distribution => format!("agg-kpi-{group}-{suffix}"),
    }
}

fn stat_name(group: u32, kind: ValueKind, stat: &str, suffix: &str) -> String {
    match kind {
        ValueKind::Scalar => format!("agg-kpi-{group}-{stat}"),
        ValueKind::Distribution => format!("agg-kpi-{group}-{stat}-{suffix}"),
    }
}

/// Aggregate `groups` over the merged table `combined`.
///
/// Members without a column in `combined` are ignored. A group left with
/// no member produces nothing and does not consume a group index. Returns
/// `None` when no group produced a column.
///
/// # Errors
///
/// Returns an error only if the output frame cannot be built.
pub fn aggregate(
    groups: &[Group],
    combined: &Frame,
    kind: ValueKind,
) -> Result<Option<Aggregated>, frame::Error> {
    let suffixes = kind.suffixes();
    let mut out = Frame::with_timestamps(combined.timestamps().to_vec());
    let mut records = Vec::new();
    let mut next: u32 = 1;

    for group in groups {
        let members: Vec<u32> = group
            .members
            .iter()
            .copied()
            .filter(|m| combined.column(&column_name(*m, suffixes[0])).is_some())
            .collect();
        if members.is_empty() {
            continue;
        }

        for suffix in suffixes {
            let columns: Vec<&[f64]> = members
                .iter()
                .filter_map(|m| combined.column(&column_name(*m, suffix)))
                .map(|c| c.values.as_slice())
                .collect();
            if let [only] = columns.as_slice() {
                out.push_column(single_name(next, kind, suffix), only.to_vec())?;
                continue;
            }
            let rows: Vec<[f64; 11]> = (0..combined.num_rows())
                .map(|row| {
                    let cells: Vec<f64> = columns.iter().map(|c| c[row]).collect();
                    stats::summarize(&cells)
                })
                .collect();
            for (i, stat) in stats::STAT_NAMES.iter().enumerate() {
                let values = rows.iter().map(|r| r[i]).collect();
                out.push_column(stat_name(next, kind, stat, suffix), values)?;
            }
        }

        records.push(kpi_map::Record {
            index: next,
            kpi: group.labels.clone(),
        });
        next += 1;
    }

    if out.num_columns() == 0 {
        return Ok(None);
    }
    Ok(Some(Aggregated {
        frame: out,
        kpi_map: records,
    }))
}
