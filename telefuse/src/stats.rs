//! NaN-skipping reductions over a handful of values.
//!
//! Missing cells are NaN throughout telefuse. Every reduction here ignores
//! them; a reduction over nothing but NaN is NaN, except [`sum`] which is 0.

use average::{Estimate, Max, Mean, Min, Variance, concatenate};

concatenate!(
    Moments,
    [Min, min, min],
    [Max, max, max],
    [Variance, variance, mean, sample_variance]
);

/// Quantiles reported by [`summarize`], after the six moments.
pub(crate) const QUANTILES: [f64; 5] = [0.5, 0.75, 0.8, 0.9, 0.99];

/// Column names of the [`summarize`] battery, in output order.
pub(crate) const STAT_NAMES: [&str; 11] = [
    "min", "max", "mean", "median", "std", "sum", "0.5", "0.75", "0.8", "0.9", "0.99",
];

fn present(values: &[f64]) -> impl Iterator<Item = f64> + '_ {
    values.iter().copied().filter(|v| !v.is_nan())
}

fn sorted_present(values: &[f64]) -> Vec<f64> {
    let mut sorted: Vec<f64> = present(values).collect();
    sorted.sort_by(f64::total_cmp);
    sorted
}

pub(crate) fn sum(values: &[f64]) -> f64 {
    present(values).sum()
}

pub(crate) fn mean(values: &[f64]) -> f64 {
    if present(values).next().is_none() {
        return f64::NAN;
    }
    let estimate: Mean = present(values).collect();
    estimate.mean()
}

pub(crate) fn median(values: &[f64]) -> f64 {
    quantile_sorted(&sorted_present(values), 0.5)
}

pub(crate) fn min(values: &[f64]) -> f64 {
    present(values).reduce(f64::min).unwrap_or(f64::NAN)
}

pub(crate) fn max(values: &[f64]) -> f64 {
    present(values).reduce(f64::max).unwrap_or(f64::NAN)
}

/// Linearly interpolated quantile of already sorted, NaN-free values.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub(crate) fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    let position = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let fraction = position - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * fraction
}

/// The full statistic battery over one row of values, ordered as
/// [`STAT_NAMES`]. `std` is the sample standard deviation and needs at
/// least two present values.
pub(crate) fn summarize(values: &[f64]) -> [f64; 11] {
    let sorted = sorted_present(values);
    let mut out = [f64::NAN; 11];
    out[5] = sorted.iter().sum();
    if sorted.is_empty() {
        return out;
    }

    let moments: Moments = sorted.iter().copied().collect();
    out[0] = moments.min();
    out[1] = moments.max();
    out[2] = moments.mean();
    out[3] = quantile_sorted(&sorted, 0.5);
    if sorted.len() > 1 {
        out[4] = moments.sample_variance().sqrt();
    }
    for (slot, q) in out[6..].iter_mut().zip(QUANTILES) {
        *slot = quantile_sorted(&sorted, q);
    }
    out
}
