//! The metric-type catalog
//!
//! Every collection run numbers the metric types it discovers and records
//! `index,metric_type` rows in an append-only CSV file. Runs that are later
//! merged must agree on that numbering, see [`Catalog::union`].

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Errors produced by [`Catalog`]
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    /// CSV errors
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    /// The same index was recorded with two different metric types.
    #[error("metric type index {index} recorded as both {first:?} and {second:?}")]
    Conflict {
        /// Catalog index
        index: u32,
        /// Metric type recorded first
        first: String,
        /// Metric type recorded second
        second: String,
    },
    /// Two catalogs that must be identical are not.
    #[error("catalog mismatch at index {index}: expected {expected:?}, found {found:?}")]
    Mismatch {
        /// Catalog index
        index: u32,
        /// Metric type in the reference catalog
        expected: String,
        /// Metric type in the compared catalog
        found: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// One row of the catalog.
pub struct Entry {
    /// Index assigned to the metric type in its collection run
    pub index: u32,
    /// The metric type name
    pub metric_type: String,
}

/// An ordered `index -> metric_type` mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalog {
    entries: Vec<Entry>,
}

impl Catalog {
    /// Read the catalog at `path`. A missing file is an empty catalog.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be parsed, or if it
    /// records one index twice with different metric types.
    pub fn open(path: &Path) -> Result<Self, Error> {
        match fs::File::open(path) {
            Ok(fp) => Self::from_reader(fp),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(err.into()),
        }
    }

    /// Parse a catalog from CSV.
    ///
    /// # Errors
    ///
    /// See [`Catalog::open`].
    pub fn from_reader<R: io::Read>(reader: R) -> Result<Self, Error> {
        let mut reader = csv::Reader::from_reader(reader);
        let mut catalog = Self::default();
        for entry in reader.deserialize::<Entry>() {
            catalog.insert(entry?)?;
        }
        Ok(catalog)
    }

    /// Add an entry, keeping the catalog ordered by index. Re-inserting an
    /// identical entry is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Conflict`] if `entry.index` is already taken by a
    /// different metric type.
    pub fn insert(&mut self, entry: Entry) -> Result<(), Error> {
        match self.entries.binary_search_by_key(&entry.index, |e| e.index) {
            Ok(pos) => {
                let existing = &self.entries[pos];
                if existing.metric_type == entry.metric_type {
                    Ok(())
                } else {
                    Err(Error::Conflict {
                        index: entry.index,
                        first: existing.metric_type.clone(),
                        second: entry.metric_type,
                    })
                }
            }
            Err(pos) => {
                self.entries.insert(pos, entry);
                Ok(())
            }
        }
    }

    /// Whether the exact `(index, metric_type)` pair is recorded.
    #[must_use]
    pub fn contains(&self, index: u32, metric_type: &str) -> bool {
        self.get(index) == Some(metric_type)
    }

    /// Metric type recorded for `index`.
    #[must_use]
    pub fn get(&self, index: u32) -> Option<&str> {
        self.entries
            .binary_search_by_key(&index, |e| e.index)
            .ok()
            .map(|pos| self.entries[pos].metric_type.as_str())
    }

    /// Index recorded for `metric_type`.
    #[must_use]
    pub fn index_of(&self, metric_type: &str) -> Option<u32> {
        self.entries
            .iter()
            .find(|e| e.metric_type == metric_type)
            .map(|e| e.index)
    }

    /// Highest index in the catalog, 0 when empty.
    #[must_use]
    pub fn max_index(&self) -> u32 {
        self.entries.last().map_or(0, |e| e.index)
    }

    /// Entries in index order.
    pub fn iter(&self) -> impl Iterator<Item = &Entry> {
        self.entries.iter()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the catalog has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Add every entry of `other`, which must number metric types the way
    /// `self` does. Indices only one side knows are fine; a collection run
    /// may have stopped early.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Mismatch`] for the first index the two catalogs
    /// assign to different metric types. `self` is left unchanged.
    pub fn union(&mut self, other: &Catalog) -> Result<(), Error> {
        for theirs in &other.entries {
            match self.get(theirs.index) {
                Some(ours) if ours != theirs.metric_type => {
                    return Err(Error::Mismatch {
                        index: theirs.index,
                        expected: ours.to_string(),
                        found: theirs.metric_type.clone(),
                    });
                }
                _ => {}
            }
        }
        for theirs in &other.entries {
            self.insert(theirs.clone())?;
        }
        Ok(())
    }

    /// Append `entry` to the catalog file at `path`, writing the header if
    /// the file is new.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or written.
    pub fn append(path: &Path, entry: &Entry) -> Result<(), Error> {
        let is_new = !path.exists();
        let fp = OpenOptions::new().create(true).append(true).open(path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(is_new)
            .from_writer(fp);
        writer.serialize(entry)?;
        writer.flush()?;
        Ok(())
    }

    /// Write the whole catalog to `writer`.
    ///
    /// # Errors
    ///
    /// Returns an error if writing fails.
    pub fn write<W: Write>(&self, writer: W) -> Result<(), Error> {
        let mut writer = csv::Writer::from_writer(writer);
        for entry in &self.entries {
            writer.serialize(entry)?;
        }
        writer.flush()?;
        Ok(())
    }
}
