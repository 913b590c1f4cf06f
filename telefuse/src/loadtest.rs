//! Load-test statistics
//!
//! The load generator records a stats history CSV with one row per request
//! name per sampling instant. Only the `Aggregated` rows are kept; they are
//! bucketed by minute and every column is reduced with a rule fitting what
//! it measures.

use std::{collections::BTreeMap, fs, io, path::Path};

use telefuse_capture::frame::{self, Frame};
use tracing::{debug, info};

use crate::{assemble::round_timestamp, stats};

const TIMESTAMP: &str = "Timestamp";
const TYPE: &str = "Type";
const NAME: &str = "Name";
const AGGREGATED: &str = "Aggregated";

/// Errors produced when reading load-test statistics
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    /// CSV errors
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    /// Frame errors
    #[error(transparent)]
    Frame(#[from] frame::Error),
    /// A required column is absent.
    #[error("load-test statistics lack the {0:?} column")]
    MissingColumn(&'static str),
    /// A timestamp cell is not a number.
    #[error("row {row}: cannot parse timestamp from {raw:?}")]
    Timestamp {
        /// 1-based data row
        row: usize,
        /// The offending cell
        raw: String,
    },
}

/// How the samples of one column within a minute are folded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    /// Largest value
    Max,
    /// Smallest value
    Min,
    /// Arithmetic mean
    Mean,
    /// Median
    Median,
    /// Total
    Sum,
}

impl Rule {
    /// The rule for the column named `column`.
    #[must_use]
    pub fn for_column(column: &str) -> Self {
        match column {
            "User Count" | "Total Max Response Time" => Rule::Max,
            "Total Min Response Time" => Rule::Min,
            "Total Median Response Time" => Rule::Median,
            "Requests/s"
            | "Failures/s"
            | "Total Average Response Time"
            | "Total Average Content Size" => Rule::Mean,
            c if c.ends_with('%') => Rule::Max,
            c if c.starts_with("Total ") && c.ends_with(" Count") => Rule::Sum,
            _ => Rule::Mean,
        }
    }

    fn apply(self, values: &[f64]) -> f64 {
        match self {
            Rule::Max => stats::max(values),
            Rule::Min => stats::min(values),
            Rule::Mean => stats::mean(values),
            Rule::Median => stats::median(values),
            Rule::Sum => stats::sum(values),
        }
    }
}

#[allow(clippy::cast_possible_truncation)]
fn parse_timestamp(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    raw.parse::<i64>()
        .ok()
        .or_else(|| raw.parse::<f64>().ok().filter(|f| f.is_finite()).map(|f| f.round() as i64))
}

/// Read load-test statistics history from `reader` into a minute-aligned
/// frame, every column name led by `prefix`.
///
/// # Errors
///
/// Returns an error if the CSV is malformed, lacks the `Timestamp` or
/// `Name` column, or has a non-numeric timestamp. Non-numeric statistic
/// cells, such as `N/A`, are missing values.
pub fn read_stats<R: io::Read>(reader: R, granularity: u32, prefix: &str) -> Result<Frame, Error> {
    let granularity = i64::from(granularity);
    let mut reader = csv::Reader::from_reader(reader);
    let header: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    let position = |name: &'static str| {
        header
            .iter()
            .position(|h| h == name)
            .ok_or(Error::MissingColumn(name))
    };
    let ts_idx = position(TIMESTAMP)?;
    let name_idx = position(NAME)?;
    let value_columns: Vec<(usize, &str)> = header
        .iter()
        .enumerate()
        .filter(|(_, h)| !matches!(h.as_str(), TIMESTAMP | TYPE | NAME))
        .map(|(i, h)| (i, h.as_str()))
        .collect();

    let mut buckets: BTreeMap<i64, Vec<Vec<f64>>> = BTreeMap::new();
    let mut kept = 0_usize;
    for (row, record) in reader.records().enumerate() {
        let record = record?;
        if record.get(name_idx) != Some(AGGREGATED) {
            continue;
        }
        let raw = record.get(ts_idx).unwrap_or("");
        let ts = parse_timestamp(raw).ok_or_else(|| Error::Timestamp {
            row: row + 1,
            raw: raw.to_string(),
        })?;
        let cells = buckets
            .entry(round_timestamp(ts, granularity))
            .or_insert_with(|| vec![Vec::new(); value_columns.len()]);
        for (cell, (idx, _)) in cells.iter_mut().zip(&value_columns) {
            let value = record
                .get(*idx)
                .and_then(|v| v.trim().parse::<f64>().ok())
                .unwrap_or(f64::NAN);
            cell.push(value);
        }
        kept += 1;
    }
    debug!("{kept} aggregated load-test rows in {} minutes", buckets.len());

    let mut frame = Frame::with_timestamps(buckets.keys().copied().collect());
    for (n, (_, column)) in value_columns.iter().enumerate() {
        let rule = Rule::for_column(column);
        let values = buckets.values().map(|cells| rule.apply(&cells[n])).collect();
        frame.push_column(format!("{prefix}{column}"), values)?;
    }
    Ok(frame)
}

/// Read the load-test statistics file at `path`.
///
/// # Errors
///
/// See [`read_stats`]; additionally fails if the file cannot be opened.
pub fn read_stats_file(path: &Path, granularity: u32, prefix: &str) -> Result<Frame, Error> {
    let fp = fs::File::open(path)?;
    let frame = read_stats(io::BufReader::new(fp), granularity, prefix)?;
    info!(
        "Load-test statistics {}: {} rows x {} columns",
        path.display(),
        frame.num_rows(),
        frame.num_columns()
    );
    Ok(frame)
}
