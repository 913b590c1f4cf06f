//! Timestamp-indexed numeric frames
//!
//! A [`Frame`] is a table of named `f64` columns sharing one `i64` timestamp
//! index. Merged, aggregated and final wide tables are all frames; on disk
//! they are CSV files whose first column is `timestamp` and whose missing
//! cells are empty.

use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::sample::{TIMESTAMP, format_cell, parse_cell, parse_timestamp};

/// Errors produced by [`Frame`]
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    /// CSV errors
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    /// A column's length differs from the timestamp index.
    #[error("column {name:?} has {found} values, frame has {expected} rows")]
    LengthMismatch {
        /// Column name
        name: String,
        /// Number of rows in the frame
        expected: usize,
        /// Number of values offered
        found: usize,
    },
    /// A column name is already taken.
    #[error("duplicate column {0:?}")]
    DuplicateColumn(String),
    /// A join was attempted on a frame whose index is not unique.
    #[error("timestamp {0} appears more than once")]
    DuplicateTimestamp(i64),
    /// The CSV header does not start with `timestamp`.
    #[error("frame header must start with \"timestamp\", got {0:?}")]
    MissingTimestamp(Option<String>),
    /// A cell could not be parsed.
    #[error("row {row}: cannot parse {column} from {raw:?}")]
    Parse {
        /// 1-based data row
        row: usize,
        /// Column name
        column: String,
        /// The offending cell
        raw: String,
    },
}

/// One named column of a [`Frame`].
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    /// Column name, unique within its frame
    pub name: String,
    /// One value per frame row, NaN when missing
    pub values: Vec<f64>,
}

/// A timestamp-indexed table of numeric columns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    timestamps: Vec<i64>,
    columns: Vec<Column>,
}

impl Frame {
    /// Create a frame with the given index and no columns.
    #[must_use]
    pub fn with_timestamps(timestamps: Vec<i64>) -> Self {
        Self {
            timestamps,
            columns: Vec::new(),
        }
    }

    /// Add a column.
    ///
    /// # Errors
    ///
    /// Fails if `values` does not have one entry per row or the name is
    /// already used.
    pub fn push_column<S: Into<String>>(&mut self, name: S, values: Vec<f64>) -> Result<(), Error> {
        let name = name.into();
        if values.len() != self.timestamps.len() {
            return Err(Error::LengthMismatch {
                name,
                expected: self.timestamps.len(),
                found: values.len(),
            });
        }
        if self.column(&name).is_some() {
            return Err(Error::DuplicateColumn(name));
        }
        self.columns.push(Column { name, values });
        Ok(())
    }

    /// The timestamp index.
    #[must_use]
    pub fn timestamps(&self) -> &[i64] {
        &self.timestamps
    }

    /// Columns in insertion order.
    #[must_use]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Look up a column by name.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Number of rows.
    #[must_use]
    pub fn num_rows(&self) -> usize {
        self.timestamps.len()
    }

    /// Number of columns, the index excluded.
    #[must_use]
    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    /// Whether the frame has no columns or no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty() || self.timestamps.is_empty()
    }

    /// Values of row `row`, one per column.
    #[must_use]
    pub fn row(&self, row: usize) -> Vec<f64> {
        self.columns.iter().map(|c| c.values[row]).collect()
    }

    /// Keep only the named columns, in the order given. Unknown names are
    /// ignored.
    #[must_use]
    pub fn select(&self, names: &[&str]) -> Frame {
        let columns = names
            .iter()
            .filter_map(|name| self.column(name).cloned())
            .collect();
        Frame {
            timestamps: self.timestamps.clone(),
            columns,
        }
    }

    /// Prefix every column name with `prefix`.
    pub fn add_prefix(&mut self, prefix: &str) {
        for column in &mut self.columns {
            column.name = format!("{prefix}{}", column.name);
        }
    }

    /// Replace every NaN cell with `value`.
    pub fn fill_nan(&mut self, value: f64) {
        self.map_values(|cell| if cell.is_nan() { value } else { cell });
    }

    /// Rewrite every cell with `f`, missing cells included.
    pub fn map_values<F: Fn(f64) -> f64>(&mut self, f: F) {
        for column in &mut self.columns {
            for cell in &mut column.values {
                *cell = f(*cell);
            }
        }
    }

    /// Rewrite every timestamp with `f`. Rows are not reordered.
    pub fn map_timestamps<F: Fn(i64) -> i64>(&mut self, f: F) {
        for ts in &mut self.timestamps {
            *ts = f(*ts);
        }
    }

    /// Sort rows by ascending timestamp. Rows with equal timestamps keep
    /// their relative order.
    pub fn sort_by_timestamp(&mut self) {
        let mut order: Vec<usize> = (0..self.timestamps.len()).collect();
        order.sort_by_key(|&i| self.timestamps[i]);
        self.timestamps = order.iter().map(|&i| self.timestamps[i]).collect();
        for column in &mut self.columns {
            column.values = order.iter().map(|&i| column.values[i]).collect();
        }
    }

    /// Collapse rows sharing a timestamp into one row, column by column,
    /// with `reduce`. The result is sorted by timestamp. `reduce` receives
    /// the colliding values in row order and is only called for groups of
    /// two or more rows.
    #[must_use]
    pub fn collapse_duplicates<F: Fn(&[f64]) -> f64>(&self, reduce: F) -> Frame {
        let mut positions: FxHashMap<i64, Vec<usize>> = FxHashMap::default();
        for (i, ts) in self.timestamps.iter().enumerate() {
            positions.entry(*ts).or_default().push(i);
        }
        let mut timestamps: Vec<i64> = positions.keys().copied().collect();
        timestamps.sort_unstable();

        let columns = self
            .columns
            .iter()
            .map(|column| {
                let values = timestamps
                    .iter()
                    .map(|ts| {
                        let rows = &positions[ts];
                        if let [only] = rows.as_slice() {
                            column.values[*only]
                        } else {
                            let cells: Vec<f64> = rows.iter().map(|&i| column.values[i]).collect();
                            reduce(&cells)
                        }
                    })
                    .collect();
                Column {
                    name: column.name.clone(),
                    values,
                }
            })
            .collect();

        Frame {
            timestamps,
            columns,
        }
    }

    /// Outer-join `other` onto `self` by timestamp. The result index is the
    /// sorted union of both indices; cells absent from either side are NaN.
    ///
    /// # Errors
    ///
    /// Fails if either index has duplicate timestamps or the two frames
    /// share a column name.
    pub fn outer_join(&self, other: &Frame) -> Result<Frame, Error> {
        let ours = index_of(&self.timestamps)?;
        let theirs = index_of(&other.timestamps)?;

        let mut timestamps: Vec<i64> = ours.keys().chain(theirs.keys()).copied().collect();
        timestamps.sort_unstable();
        timestamps.dedup();

        let mut joined = Frame::with_timestamps(timestamps);
        for (side, positions) in [(self, &ours), (other, &theirs)] {
            for column in &side.columns {
                let values = joined
                    .timestamps
                    .iter()
                    .map(|ts| positions.get(ts).map_or(f64::NAN, |&i| column.values[i]))
                    .collect();
                joined.push_column(column.name.clone(), values)?;
            }
        }
        Ok(joined)
    }

    /// Write the frame as CSV.
    ///
    /// # Errors
    ///
    /// Returns an error if writing fails.
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<(), Error> {
        let mut writer = csv::Writer::from_writer(writer);
        let mut header = vec![TIMESTAMP];
        header.extend(self.columns.iter().map(|c| c.name.as_str()));
        writer.write_record(&header)?;
        for (row, ts) in self.timestamps.iter().enumerate() {
            let mut record = Vec::with_capacity(self.columns.len() + 1);
            record.push(ts.to_string());
            record.extend(self.columns.iter().map(|c| format_cell(c.values[row])));
            writer.write_record(&record)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Write the frame to `path`, replacing it.
    ///
    /// # Errors
    ///
    /// See [`Frame::write_csv`]; additionally fails if the file cannot be
    /// created.
    pub fn write_csv_file(&self, path: &Path) -> Result<(), Error> {
        let fp = fs::File::create(path)?;
        self.write_csv(io::BufWriter::new(fp))
    }

    /// Read a frame from CSV.
    ///
    /// # Errors
    ///
    /// Fails if the first column is not `timestamp`, a cell is not numeric
    /// or a column name repeats.
    pub fn read_csv<R: Read>(reader: R) -> Result<Frame, Error> {
        let mut reader = csv::Reader::from_reader(reader);
        let header: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
        match header.first() {
            Some(first) if first == TIMESTAMP => {}
            other => return Err(Error::MissingTimestamp(other.cloned())),
        }

        let mut timestamps = Vec::new();
        let mut values: Vec<Vec<f64>> = vec![Vec::new(); header.len() - 1];
        for (row, record) in reader.records().enumerate() {
            let record = record?;
            let row = row + 1;
            let cell = |idx: usize| record.get(idx).unwrap_or("");
            let ts = parse_timestamp(cell(0)).ok_or_else(|| Error::Parse {
                row,
                column: TIMESTAMP.to_string(),
                raw: cell(0).to_string(),
            })?;
            timestamps.push(ts);
            for (idx, column) in values.iter_mut().enumerate() {
                let raw = cell(idx + 1);
                let value = parse_cell(raw).ok_or_else(|| Error::Parse {
                    row,
                    column: header[idx + 1].clone(),
                    raw: raw.to_string(),
                })?;
                column.push(value);
            }
        }

        let mut frame = Frame::with_timestamps(timestamps);
        for (name, column) in header.into_iter().skip(1).zip(values) {
            frame.push_column(name, column)?;
        }
        Ok(frame)
    }

    /// Read the frame at `path`.
    ///
    /// # Errors
    ///
    /// See [`Frame::read_csv`]; additionally fails if the file cannot be
    /// opened.
    pub fn read_csv_file(path: &Path) -> Result<Frame, Error> {
        let fp = fs::File::open(path)?;
        Frame::read_csv(io::BufReader::new(fp))
    }
}

fn index_of(timestamps: &[i64]) -> Result<FxHashMap<i64, usize>, Error> {
    let mut seen = FxHashSet::default();
    let mut positions = FxHashMap::default();
    for (i, ts) in timestamps.iter().enumerate() {
        if !seen.insert(*ts) {
            return Err(Error::DuplicateTimestamp(*ts));
        }
        positions.insert(*ts, i);
    }
    Ok(positions)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(timestamps: &[i64], columns: &[(&str, &[f64])]) -> Frame {
        let mut frame = Frame::with_timestamps(timestamps.to_vec());
        for (name, values) in columns {
            frame.push_column(*name, values.to_vec()).expect("valid column");
        }
        frame
    }

    #[test]
    fn push_column_checks_length_and_name() {
        let mut f = frame(&[1, 2], &[("a", &[1.0, 2.0])]);
        assert!(matches!(
            f.push_column("b", vec![1.0]),
            Err(Error::LengthMismatch { expected: 2, found: 1, .. })
        ));
        assert!(matches!(
            f.push_column("a", vec![1.0, 2.0]),
            Err(Error::DuplicateColumn(_))
        ));
    }

    #[test]
    fn outer_join_unions_index_with_nan() {
        let left = frame(&[60, 120], &[("a", &[1.0, 2.0])]);
        let right = frame(&[120, 180], &[("b", &[3.0, 4.0])]);
        let joined = left.outer_join(&right).expect("join");
        assert_eq!(joined.timestamps(), &[60, 120, 180]);
        let a = &joined.column("a").expect("a").values;
        let b = &joined.column("b").expect("b").values;
        assert_eq!(a[..2], [1.0, 2.0]);
        assert!(a[2].is_nan());
        assert!(b[0].is_nan());
        assert_eq!(b[1..], [3.0, 4.0]);
    }

    #[test]
    fn outer_join_rejects_shared_names_and_duplicate_index() {
        let left = frame(&[60], &[("a", &[1.0])]);
        assert!(matches!(
            left.outer_join(&left),
            Err(Error::DuplicateColumn(_))
        ));
        let dup = frame(&[60, 60], &[("b", &[1.0, 2.0])]);
        assert!(matches!(
            left.outer_join(&dup),
            Err(Error::DuplicateTimestamp(60))
        ));
    }

    #[test]
    fn collapse_duplicates_sorts_and_reduces() {
        let f = frame(&[120, 60, 120], &[("a", &[1.0, 5.0, 3.0])]);
        let collapsed = f.collapse_duplicates(|cells| cells.iter().sum());
        assert_eq!(collapsed.timestamps(), &[60, 120]);
        assert_eq!(collapsed.column("a").expect("a").values, vec![5.0, 4.0]);
    }

    #[test]
    fn sort_is_stable_and_moves_all_columns() {
        let mut f = frame(&[3, 1, 2], &[("a", &[30.0, 10.0, 20.0]), ("b", &[3.0, 1.0, 2.0])]);
        f.sort_by_timestamp();
        assert_eq!(f.timestamps(), &[1, 2, 3]);
        assert_eq!(f.row(0), vec![10.0, 1.0]);
        assert_eq!(f.row(2), vec![30.0, 3.0]);
    }

    #[test]
    fn prefix_fill_and_select() {
        let mut f = frame(&[1], &[("a", &[f64::NAN]), ("b", &[2.0])]);
        f.add_prefix("metric-1-");
        f.fill_nan(0.0);
        let picked = f.select(&["metric-1-b", "missing", "metric-1-a"]);
        let names: Vec<&str> = picked.columns().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["metric-1-b", "metric-1-a"]);
        assert_eq!(picked.row(0), vec![2.0, 0.0]);
    }

    #[test]
    fn csv_round_trip_keeps_missing_cells() {
        let f = frame(&[60, 120], &[("kpi-1-value", &[1.5, f64::NAN]), ("kpi-2-value", &[0.0, 7.0])]);
        let mut buffer = Vec::new();
        f.write_csv(&mut buffer).expect("write");
        let text = String::from_utf8(buffer.clone()).expect("utf8");
        assert_eq!(text, "timestamp,kpi-1-value,kpi-2-value\n60,1.5,0\n120,,7\n");

        let back = Frame::read_csv(buffer.as_slice()).expect("read");
        assert_eq!(back.timestamps(), f.timestamps());
        assert!(back.column("kpi-1-value").expect("col").values[1].is_nan());
        assert_eq!(back.column("kpi-2-value"), f.column("kpi-2-value"));
    }

    #[test]
    fn read_requires_timestamp_first() {
        let input = "value,timestamp\n1,2\n";
        assert!(matches!(
            Frame::read_csv(input.as_bytes()),
            Err(Error::MissingTimestamp(Some(_)))
        ));
    }
}
