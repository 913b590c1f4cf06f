//! Constant-series filter
//!
//! A series whose every row equals its first row carries nothing for
//! variability analysis. The check only sees the collected window: a series
//! that is flat there but moves outside it is still reported constant.

use telefuse_capture::frame::Frame;

/// Whether every row of `frame` equals its first row in every column.
///
/// Cells are compared with `==`, so a NaN cell never equals anything and
/// makes the frame non-constant. A frame without rows or columns is
/// constant.
#[must_use]
#[allow(clippy::float_cmp)]
pub fn is_constant(frame: &Frame) -> bool {
    frame.columns().iter().all(|column| match column.values.split_first() {
        None => true,
        Some((first, rest)) => !first.is_nan() && rest.iter().all(|v| v == first),
    })
}
