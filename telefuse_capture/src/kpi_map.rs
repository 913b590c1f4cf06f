//! KPI/label maps
//!
//! A KPI map pairs a numeric index with the [`LabelSet`] it stands for. The
//! collection side appends one JSON object per line (`kpi_map.jsonl`); the
//! merge and aggregation stages write the whole map as one JSON array side
//! file next to their numeric tables.

use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::labels::LabelSet;

/// Errors produced when reading or writing KPI maps
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    /// JSON errors outside of line-oriented reads
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    /// A line of a JSONL map could not be decoded.
    #[error("line {line}: {source}")]
    Line {
        /// 1-based line number
        line: usize,
        /// Underlying JSON error
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// One KPI map record, `{"index": 3, "kpi": {"pod": "p1"}}`.
pub struct Record {
    /// Index of the KPI within its metric type
    pub index: u32,
    /// The labels identifying the KPI
    pub kpi: LabelSet,
}

/// JSONL writer for KPI map records
#[derive(Debug)]
pub struct JsonlWriter<W: Write> {
    writer: W,
}

impl<W: Write> JsonlWriter<W> {
    /// Create a new instance of `JsonlWriter`
    #[must_use]
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Write a single record followed by a newline
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or writing fails
    pub fn write_record(&mut self, record: &Record) -> Result<(), Error> {
        let payload = serde_json::to_string(record)?;
        self.writer.write_all(payload.as_bytes())?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    /// Flush any buffered data
    ///
    /// # Errors
    ///
    /// Returns an error if flushing fails
    pub fn flush(&mut self) -> Result<(), Error> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Read every record of a JSONL map. Blank lines are ignored.
///
/// # Errors
///
/// Returns [`Error::Line`] for the first line that is not a valid record.
pub fn read_jsonl<R: BufRead>(reader: R) -> Result<Vec<Record>, Error> {
    let mut records = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(&line).map_err(|source| Error::Line {
            line: idx + 1,
            source,
        })?;
        records.push(record);
    }
    Ok(records)
}

/// Read the JSONL map at `path`.
///
/// # Errors
///
/// See [`read_jsonl`]; additionally fails if the file cannot be opened.
pub fn read_jsonl_file(path: &Path) -> Result<Vec<Record>, Error> {
    let fp = fs::File::open(path)?;
    read_jsonl(BufReader::new(fp))
}

/// Append `record` to the JSONL map at `path`, creating it if needed.
///
/// # Errors
///
/// Returns an error if the file cannot be opened or written.
pub fn append_jsonl_file(path: &Path, record: &Record) -> Result<(), Error> {
    let fp = OpenOptions::new().create(true).append(true).open(path)?;
    let mut writer = JsonlWriter::new(BufWriter::new(fp));
    writer.write_record(record)?;
    writer.flush()
}

/// Write `records` as a single JSON array to `path`, replacing it.
///
/// # Errors
///
/// Returns an error if the file cannot be created or written.
pub fn write_json_file(path: &Path, records: &[Record]) -> Result<(), Error> {
    let fp = fs::File::create(path)?;
    let mut writer = BufWriter::new(fp);
    serde_json::to_writer(&mut writer, records)?;
    writer.flush()?;
    Ok(())
}

/// Read a JSON array map from `path`.
///
/// # Errors
///
/// Returns an error if the file cannot be read or is not a record array.
pub fn read_json_file(path: &Path) -> Result<Vec<Record>, Error> {
    let fp = fs::File::open(path)?;
    Ok(serde_json::from_reader(BufReader::new(fp))?)
}
