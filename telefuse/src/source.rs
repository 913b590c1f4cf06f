//! Collection runs on disk
//!
//! A collection run is a directory laid out as:
//!
//! ```text
//! <root>/metric_type_map.csv
//! <root>/metric-type-<i>/kpi_map.jsonl
//! <root>/metric-type-<i>/kpi-<n>.csv
//! ```
//!
//! where `<i>` is the catalog index of a metric type and `<n>` the local
//! index of a KPI within it.

use std::path::{Path, PathBuf};

use telefuse_capture::{
    catalog::{self, Catalog},
    kpi_map,
    sample::{self, SampleTable},
};

/// Name of the catalog file in a run directory.
pub const CATALOG_FILE: &str = "metric_type_map.csv";
/// Name of the KPI map file in a metric type directory.
pub const KPI_MAP_FILE: &str = "kpi_map.jsonl";

/// Errors produced when reading a collection run
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The catalog could not be read.
    #[error("catalog {path:?}: {source}")]
    Catalog {
        /// Catalog path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: catalog::Error,
    },
    /// A KPI map could not be read.
    #[error("KPI map {path:?}: {source}")]
    KpiMap {
        /// KPI map path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: kpi_map::Error,
    },
    /// A sample table could not be read.
    #[error("sample table {path:?}: {source}")]
    Samples {
        /// Sample table path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: sample::Error,
    },
}

/// Directory holding everything collected for metric type `index`.
#[must_use]
pub fn metric_type_dir(root: &Path, index: u32) -> PathBuf {
    root.join(format!("metric-type-{index}"))
}

/// Path of the sample table of KPI `local_index`.
#[must_use]
pub fn sample_path(root: &Path, metric_index: u32, local_index: u32) -> PathBuf {
    metric_type_dir(root, metric_index).join(format!("kpi-{local_index}.csv"))
}

/// Read access to one collection run.
pub trait Store {
    /// Identifier of the run
    fn id(&self) -> &str;

    /// The run's metric type catalog.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog cannot be read.
    fn catalog(&self) -> Result<Catalog, Error>;

    /// KPI map records of metric type `metric_index`.
    ///
    /// # Errors
    ///
    /// Returns an error if the map is missing or malformed.
    fn kpi_map(&self, metric_index: u32) -> Result<Vec<kpi_map::Record>, Error>;

    /// Samples of KPI `local_index` of metric type `metric_index`.
    ///
    /// # Errors
    ///
    /// Returns an error if the table is missing or malformed.
    fn samples(&self, metric_index: u32, local_index: u32) -> Result<SampleTable, Error>;
}

impl<S: Store + ?Sized> Store for &S {
    fn id(&self) -> &str {
        (**self).id()
    }

    fn catalog(&self) -> Result<Catalog, Error> {
        (**self).catalog()
    }

    fn kpi_map(&self, metric_index: u32) -> Result<Vec<kpi_map::Record>, Error> {
        (**self).kpi_map(metric_index)
    }

    fn samples(&self, metric_index: u32, local_index: u32) -> Result<SampleTable, Error> {
        (**self).samples(metric_index, local_index)
    }
}

/// A collection run read from its directory.
#[derive(Debug, Clone)]
pub struct RunDir {
    id: String,
    root: PathBuf,
}

impl RunDir {
    /// Create a new instance of `RunDir`
    #[must_use]
    pub fn new<S: Into<String>, P: Into<PathBuf>>(id: S, root: P) -> Self {
        Self {
            id: id.into(),
            root: root.into(),
        }
    }

    /// Root directory of the run.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Store for RunDir {
    fn id(&self) -> &str {
        &self.id
    }

    fn catalog(&self) -> Result<Catalog, Error> {
        let path = self.root.join(CATALOG_FILE);
        Catalog::open(&path).map_err(|source| Error::Catalog { path, source })
    }

    fn kpi_map(&self, metric_index: u32) -> Result<Vec<kpi_map::Record>, Error> {
        let path = metric_type_dir(&self.root, metric_index).join(KPI_MAP_FILE);
        kpi_map::read_jsonl_file(&path).map_err(|source| Error::KpiMap { path, source })
    }

    fn samples(&self, metric_index: u32, local_index: u32) -> Result<SampleTable, Error> {
        let path = sample_path(&self.root, metric_index, local_index);
        sample::read_samples_file(&path).map_err(|source| Error::Samples { path, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use telefuse_capture::{
        catalog::Entry,
        sample::{RawSample, ValueKind, write_samples_file},
    };

    #[test]
    fn reads_back_a_run_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let run = RunDir::new("day-1", dir.path());
        Catalog::append(
            &dir.path().join(CATALOG_FILE),
            &Entry {
                index: 1,
                metric_type: "node_load1".to_string(),
            },
        )
        .expect("catalog");
        std::fs::create_dir_all(metric_type_dir(dir.path(), 1)).expect("mkdir");
        let record = kpi_map::Record {
            index: 1,
            kpi: [("instance", "n1")].into_iter().collect(),
        };
        kpi_map::append_jsonl_file(
            &metric_type_dir(dir.path(), 1).join(KPI_MAP_FILE),
            &record,
        )
        .expect("kpi map");
        write_samples_file(
            &sample_path(dir.path(), 1, 1),
            ValueKind::Scalar,
            &[RawSample::scalar(60, 0.5)],
        )
        .expect("samples");

        assert_eq!(run.id(), "day-1");
        assert!(run.catalog().expect("catalog").contains(1, "node_load1"));
        assert_eq!(run.kpi_map(1).expect("kpi map"), vec![record]);
        let table = run.samples(1, 1).expect("samples");
        assert_eq!(table.samples, vec![RawSample::scalar(60, 0.5)]);
    }

    #[test]
    fn missing_files_name_their_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let run = RunDir::new("day-1", dir.path());
        assert!(run.catalog().expect("missing catalog is empty").is_empty());
        match run.samples(2, 5) {
            Err(Error::Samples { path, .. }) => {
                assert!(path.ends_with("metric-type-2/kpi-5.csv"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(run.kpi_map(2), Err(Error::KpiMap { .. })));
    }
}
