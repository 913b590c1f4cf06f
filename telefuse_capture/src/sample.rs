//! Raw samples and per-KPI sample tables
//!
//! A sample table is a CSV file holding one KPI's samples. Its header
//! decides the [`ValueKind`] once, at ingestion: `timestamp,value` is a
//! scalar series, `timestamp,count,mean,sum_of_squared_deviation` is a
//! distribution series. Downstream code carries the kind along rather than
//! guessing it from column names again.

use std::fs;
use std::io::{Read, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Header name of the timestamp column shared by every table.
pub const TIMESTAMP: &str = "timestamp";

const SCALAR_HEADER: [&str; 1] = ["value"];
const DISTRIBUTION_HEADER: [&str; 3] = ["count", "mean", "sum_of_squared_deviation"];
const SCALAR_SUFFIXES: [&str; 1] = ["value"];
const DISTRIBUTION_SUFFIXES: [&str; 3] = ["count", "mean", "sd"];

/// Errors produced when reading or writing sample tables
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// CSV errors
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    /// The header does not describe a supported value kind.
    #[error("unsupported sample table header: {0:?}")]
    UnsupportedSchema(Vec<String>),
    /// A cell could not be parsed as a number.
    #[error("row {row}: cannot parse {column} from {raw:?}")]
    Parse {
        /// 1-based data row
        row: usize,
        /// Column name
        column: String,
        /// The offending cell
        raw: String,
    },
    /// A sample of the wrong kind was handed to a writer.
    #[error("expected a {expected:?} sample, got {found:?}")]
    KindMismatch {
        /// Kind of the table
        expected: ValueKind,
        /// Kind of the sample
        found: ValueKind,
    },
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
/// The shape of the values in a series.
pub enum ValueKind {
    /// One number per timestamp.
    Scalar,
    /// Count, mean and sum of squared deviation per timestamp.
    Distribution,
}

impl ValueKind {
    /// Number of numeric components per sample.
    #[must_use]
    pub fn width(self) -> usize {
        self.header().len()
    }

    /// Sample table column names, timestamp excluded.
    #[must_use]
    pub fn header(self) -> &'static [&'static str] {
        match self {
            ValueKind::Scalar => &SCALAR_HEADER,
            ValueKind::Distribution => &DISTRIBUTION_HEADER,
        }
    }

    /// Short component names used as column suffixes in merged and
    /// aggregated tables, e.g. `kpi-3-value` or `agg-kpi-1-sd`.
    #[must_use]
    pub fn suffixes(self) -> &'static [&'static str] {
        match self {
            ValueKind::Scalar => &SCALAR_SUFFIXES,
            ValueKind::Distribution => &DISTRIBUTION_SUFFIXES,
        }
    }

    fn from_header(columns: &[String]) -> Option<(Self, usize, Vec<usize>)> {
        let position = |name: &str| columns.iter().position(|c| c == name);
        let timestamp = position(TIMESTAMP)?;
        for kind in [ValueKind::Scalar, ValueKind::Distribution] {
            if columns.len() != kind.width() + 1 {
                continue;
            }
            let indices: Option<Vec<usize>> = kind.header().iter().map(|&h| position(h)).collect();
            if let Some(indices) = indices {
                return Some((kind, timestamp, indices));
            }
        }
        None
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
/// A histogram-like summary of many observations.
pub struct Distribution {
    /// Number of observations
    pub count: f64,
    /// Mean of the observations
    pub mean: f64,
    /// Sum of squared deviation from the mean
    pub sum_of_squared_deviation: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
/// The value of a single sample.
pub enum Value {
    /// A plain number
    Scalar(f64),
    /// A distribution summary
    Distribution(Distribution),
}

impl Value {
    /// The kind of this value.
    #[must_use]
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Scalar(_) => ValueKind::Scalar,
            Value::Distribution(_) => ValueKind::Distribution,
        }
    }

    /// The numeric components in [`ValueKind::header`] order.
    #[must_use]
    pub fn components(&self) -> Vec<f64> {
        match self {
            Value::Scalar(v) => vec![*v],
            Value::Distribution(d) => vec![d.count, d.mean, d.sum_of_squared_deviation],
        }
    }

    /// Rebuild a value of `kind` from its components. Missing components
    /// are read as NaN.
    #[must_use]
    pub fn from_components(kind: ValueKind, components: &[f64]) -> Self {
        let at = |i: usize| components.get(i).copied().unwrap_or(f64::NAN);
        match kind {
            ValueKind::Scalar => Value::Scalar(at(0)),
            ValueKind::Distribution => Value::Distribution(Distribution {
                count: at(0),
                mean: at(1),
                sum_of_squared_deviation: at(2),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
/// One observation of a KPI.
pub struct RawSample {
    /// Seconds since the unix epoch
    pub timestamp: i64,
    /// The observed value
    pub value: Value,
}

impl RawSample {
    /// Create a scalar sample.
    #[must_use]
    pub fn scalar(timestamp: i64, value: f64) -> Self {
        Self {
            timestamp,
            value: Value::Scalar(value),
        }
    }

    /// Create a distribution sample.
    #[must_use]
    pub fn distribution(timestamp: i64, count: f64, mean: f64, sum_of_squared_deviation: f64) -> Self {
        Self {
            timestamp,
            value: Value::Distribution(Distribution {
                count,
                mean,
                sum_of_squared_deviation,
            }),
        }
    }
}

/// The contents of one per-KPI sample table.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleTable {
    /// Kind decided by the table header
    pub kind: ValueKind,
    /// Samples in file order
    pub samples: Vec<RawSample>,
}

/// Parse a numeric cell. Empty cells are missing values.
pub(crate) fn parse_cell(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    if raw.is_empty() || raw.eq_ignore_ascii_case("nan") {
        return Some(f64::NAN);
    }
    raw.parse::<f64>().ok()
}

/// Render a numeric cell. Missing values become empty cells.
pub(crate) fn format_cell(value: f64) -> String {
    if value.is_nan() {
        String::new()
    } else {
        value.to_string()
    }
}

/// Parse an integer timestamp cell, tolerating a float rendering such as
/// `1700000000.0`.
#[allow(clippy::cast_possible_truncation)]
pub(crate) fn parse_timestamp(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    raw.parse::<i64>()
        .ok()
        .or_else(|| raw.parse::<f64>().ok().filter(|f| f.is_finite()).map(|f| f as i64))
}

/// Read a sample table from `reader`.
///
/// # Errors
///
/// Returns an error if the CSV is malformed, the header is not a supported
/// schema or a cell is not numeric.
pub fn read_samples<R: Read>(reader: R) -> Result<SampleTable, Error> {
    let mut reader = csv::Reader::from_reader(reader);
    let header: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    let (kind, ts_idx, value_idx) =
        ValueKind::from_header(&header).ok_or_else(|| Error::UnsupportedSchema(header.clone()))?;

    let mut samples = Vec::new();
    for (row, record) in reader.records().enumerate() {
        let record = record?;
        let row = row + 1;
        let cell = |idx: usize| record.get(idx).unwrap_or("");
        let timestamp = parse_timestamp(cell(ts_idx)).ok_or_else(|| Error::Parse {
            row,
            column: TIMESTAMP.to_string(),
            raw: cell(ts_idx).to_string(),
        })?;
        let mut components = Vec::with_capacity(value_idx.len());
        for &idx in &value_idx {
            let value = parse_cell(cell(idx)).ok_or_else(|| Error::Parse {
                row,
                column: header[idx].clone(),
                raw: cell(idx).to_string(),
            })?;
            components.push(value);
        }
        samples.push(RawSample {
            timestamp,
            value: Value::from_components(kind, &components),
        });
    }
    Ok(SampleTable { kind, samples })
}

/// Read a sample table from the file at `path`.
///
/// # Errors
///
/// See [`read_samples`]; additionally fails if the file cannot be opened.
pub fn read_samples_file(path: &Path) -> Result<SampleTable, Error> {
    let fp = fs::File::open(path)?;
    read_samples(std::io::BufReader::new(fp))
}

/// Write a sample table to `writer`.
///
/// # Errors
///
/// Returns an error if a sample does not match `kind` or writing fails.
pub fn write_samples<W: Write>(writer: W, kind: ValueKind, samples: &[RawSample]) -> Result<(), Error> {
    let mut writer = csv::Writer::from_writer(writer);
    let mut header = vec![TIMESTAMP];
    header.extend_from_slice(kind.header());
    writer.write_record(&header)?;
    for sample in samples {
        if sample.value.kind() != kind {
            return Err(Error::KindMismatch {
                expected: kind,
                found: sample.value.kind(),
            });
        }
        let mut record = vec![sample.timestamp.to_string()];
        record.extend(sample.value.components().into_iter().map(format_cell));
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

/// Write a sample table to the file at `path`, replacing it.
///
/// # Errors
///
/// See [`write_samples`]; additionally fails if the file cannot be created.
pub fn write_samples_file(path: &Path, kind: ValueKind, samples: &[RawSample]) -> Result<(), Error> {
    let fp = fs::File::create(path)?;
    write_samples(std::io::BufWriter::new(fp), kind, samples)
}
