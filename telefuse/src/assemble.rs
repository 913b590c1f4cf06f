//! Wide-table assembly
//!
//! The aggregated tables of all metric types are aligned to a common
//! minute grid and joined side by side. Cells no table provides are zero in
//! the result.

use telefuse_capture::frame::{self, Frame};
use tracing::debug;

use crate::stats;

/// Round `timestamp` to the nearest multiple of `granularity` seconds. Exact
/// halves go to the even multiple.
#[must_use]
pub fn round_timestamp(timestamp: i64, granularity: i64) -> i64 {
    if granularity <= 1 {
        return timestamp;
    }
    let quotient = timestamp.div_euclid(granularity);
    let remainder = timestamp.rem_euclid(granularity);
    let rounded = match (remainder * 2).cmp(&granularity) {
        std::cmp::Ordering::Less => quotient,
        std::cmp::Ordering::Greater => quotient + 1,
        std::cmp::Ordering::Equal => quotient + quotient.rem_euclid(2),
    };
    rounded * granularity
}

/// Round the index of `frame` to `granularity` and collapse rows that now
/// share a timestamp with their mean.
#[must_use]
pub fn align(frame: Frame, granularity: i64) -> Frame {
    align_with(frame, granularity, stats::mean)
}

/// [`align`] with `reduce` folding the rows that collide.
#[must_use]
pub fn align_with<F: Fn(&[f64]) -> f64>(mut frame: Frame, granularity: i64, reduce: F) -> Frame {
    frame.map_timestamps(|ts| round_timestamp(ts, granularity));
    frame.collapse_duplicates(reduce)
}

/// Join per-metric-type frames into the wide table.
///
/// Every column of `frames` is prefixed `metric-<index>-`; `extras` are
/// joined with their names untouched. The result is sorted by timestamp and
/// zero-filled.
///
/// # Errors
///
/// Returns an error if two inputs produce the same column name.
pub fn assemble(
    frames: Vec<(u32, Frame)>,
    extras: Vec<Frame>,
    granularity: u32,
) -> Result<Frame, frame::Error> {
    let granularity = i64::from(granularity);
    let mut wide = Frame::default();
    for (index, frame) in frames {
        let mut aligned = align(frame, granularity);
        aligned.add_prefix(&format!("metric-{index}-"));
        debug!(
            "Joining metric type {index}: {} rows x {} columns",
            aligned.num_rows(),
            aligned.num_columns()
        );
        wide = wide.outer_join(&aligned)?;
    }
    for extra in extras {
        wide = wide.outer_join(&align(extra, granularity))?;
    }
    wide.fill_nan(0.0);
    Ok(wide)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(timestamps: &[i64], columns: &[(&str, &[f64])]) -> Frame {
        let mut frame = Frame::with_timestamps(timestamps.to_vec());
        for (name, values) in columns {
            frame.push_column(*name, values.to_vec()).expect("column");
        }
        frame
    }

    #[test]
    fn rounding_is_half_to_even() {
        assert_eq!(round_timestamp(29, 60), 0);
        assert_eq!(round_timestamp(31, 60), 60);
        assert_eq!(round_timestamp(30, 60), 0);
        assert_eq!(round_timestamp(90, 60), 120);
        assert_eq!(round_timestamp(150, 60), 120);
        assert_eq!(round_timestamp(-30, 60), 0);
        assert_eq!(round_timestamp(1_700_000_010, 60), 1_700_000_040);
        assert_eq!(round_timestamp(17, 1), 17);
    }

    #[test]
    fn rounding_collisions_are_averaged() {
        let input = frame(&[55, 65, 130], &[("a", &[1.0, 3.0, 5.0])]);
        let aligned = align(input, 60);
        assert_eq!(aligned.timestamps(), &[60, 120]);
        assert_eq!(aligned.column("a").expect("a").values, vec![2.0, 5.0]);
    }

    #[test]
    fn frames_are_prefixed_joined_and_zero_filled() {
        let first = frame(&[60, 120], &[("agg-kpi-1", &[1.0, f64::NAN])]);
        let second = frame(&[120, 180], &[("agg-kpi-1", &[2.0, 3.0])]);
        let extra = frame(&[181], &[("lm-User Count", &[10.0])]);
        let wide = assemble(vec![(1, first), (3, second)], vec![extra], 60).expect("assemble");

        assert_eq!(wide.timestamps(), &[60, 120, 180]);
        let names: Vec<&str> = wide.columns().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["metric-1-agg-kpi-1", "metric-3-agg-kpi-1", "lm-User Count"]
        );
        assert_eq!(wide.row(0), vec![1.0, 0.0, 0.0]);
        assert_eq!(wide.row(1), vec![0.0, 2.0, 0.0]);
        assert_eq!(wide.row(2), vec![0.0, 3.0, 10.0]);
    }

    #[test]
    fn nothing_to_join_is_an_empty_table() {
        let wide = assemble(Vec::new(), Vec::new(), 60).expect("assemble");
        assert_eq!(wide.num_rows(), 0);
        assert_eq!(wide.num_columns(), 0);
    }
}
