//! Collection of KPI samples into a run directory
//!
//! A poller exposes the metric types it knows and, per type, the time series
//! observed in a window. [`Collector`] drives any such poller and writes the
//! result in the layout [`crate::source::RunDir`] reads back. Metric types
//! already present in the run's catalog are skipped, so an interrupted
//! collection resumes where it stopped.

use std::{fs, io, path::PathBuf, thread, time::Duration};

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use telefuse_capture::{
    catalog::{self, Catalog, Entry},
    kpi_map,
    labels::LabelSet,
    sample::{self, RawSample, ValueKind},
};
use tracing::{debug, info, warn};

use crate::source::{CATALOG_FILE, KPI_MAP_FILE, metric_type_dir, sample_path};

/// Time range of a collection, seconds since the unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    /// Inclusive start
    pub start: i64,
    /// Exclusive end
    pub end: i64,
}

/// One time series returned by a poller.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedSeries {
    /// Monitored resource type, if the backend reports one
    pub resource_type: Option<String>,
    /// Labels of the monitored resource
    pub resource_labels: FxHashMap<String, String>,
    /// Labels of the metric itself
    pub metric_labels: FxHashMap<String, String>,
    /// Kind of every sample in `samples`
    pub kind: ValueKind,
    /// Observations in the window
    pub samples: Vec<RawSample>,
}

/// Failure reported by a poller.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Worth retrying, e.g. rate limiting or a timeout.
    #[error("transient fetch failure: {0}")]
    Transient(String),
    /// Retrying will not help.
    #[error("fetch failure: {0}")]
    Permanent(String),
}

/// Source of KPI samples.
pub trait Fetch {
    /// Every metric type the backend knows, in a stable order.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be listed.
    fn metric_types(&mut self) -> Result<Vec<String>, FetchError>;

    /// Every series of `metric_type` observed within `window`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be queried.
    fn fetch_time_series(
        &mut self,
        metric_type: &str,
        window: Window,
    ) -> Result<Vec<FetchedSeries>, FetchError>;
}

/// How transient fetch failures are retried
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BackoffBehavior {
    /// Retry with exponential backoff
    Obey {
        /// Maximum number of retry attempts
        max_retries: u16,
        /// Delay before the first retry
        base_millis: u64,
        /// Upper bound of any single delay
        max_millis: u64,
    },
    /// Fail on the first error
    Ignore,
}

impl Default for BackoffBehavior {
    fn default() -> Self {
        Self::Obey {
            max_retries: 5,
            base_millis: 500,
            max_millis: 30_000,
        }
    }
}

struct Backoff {
    behavior: BackoffBehavior,
    attempts: u16,
}

impl Backoff {
    fn new(behavior: BackoffBehavior) -> Self {
        Self {
            behavior,
            attempts: 0,
        }
    }

    /// Sleep before the next attempt. Returns `None` once retries are
    /// exhausted.
    fn wait(&mut self) -> Option<()> {
        match self.behavior {
            BackoffBehavior::Obey {
                max_retries,
                base_millis,
                max_millis,
            } => {
                if self.attempts >= max_retries {
                    return None;
                }
                // base * 2^attempts, capped at max_millis
                let factor = 1_u64.checked_shl(u32::from(self.attempts)).unwrap_or(u64::MAX);
                let delay_ms = base_millis.saturating_mul(factor).min(max_millis);
                self.attempts = self.attempts.saturating_add(1);
                thread::sleep(Duration::from_millis(delay_ms));
                Some(())
            }
            BackoffBehavior::Ignore => None,
        }
    }
}

/// A [`Fetch`] that retries transient failures of the wrapped poller.
#[derive(Debug)]
pub struct RetryingFetch<F> {
    inner: F,
    behavior: BackoffBehavior,
}

impl<F: Fetch> RetryingFetch<F> {
    /// Wrap `inner`, retrying according to `behavior`.
    #[must_use]
    pub fn new(inner: F, behavior: BackoffBehavior) -> Self {
        Self { inner, behavior }
    }

    /// Unwrap the poller.
    #[must_use]
    pub fn into_inner(self) -> F {
        self.inner
    }

    fn retry<T>(
        &mut self,
        what: &str,
        mut op: impl FnMut(&mut F) -> Result<T, FetchError>,
    ) -> Result<T, FetchError> {
        let mut backoff = Backoff::new(self.behavior);
        loop {
            match op(&mut self.inner) {
                Err(FetchError::Transient(msg)) => {
                    if backoff.wait().is_none() {
                        return Err(FetchError::Transient(msg));
                    }
                    debug!("Retrying {what} after transient failure: {msg}");
                }
                other => return other,
            }
        }
    }
}

impl<F: Fetch> Fetch for RetryingFetch<F> {
    fn metric_types(&mut self) -> Result<Vec<String>, FetchError> {
        self.retry("metric type listing", F::metric_types)
    }

    fn fetch_time_series(
        &mut self,
        metric_type: &str,
        window: Window,
    ) -> Result<Vec<FetchedSeries>, FetchError> {
        self.retry(metric_type, |inner| inner.fetch_time_series(metric_type, window))
    }
}

/// Errors produced while collecting
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    /// The run catalog could not be read or updated.
    #[error(transparent)]
    Catalog(#[from] catalog::Error),
    /// A KPI map could not be written.
    #[error(transparent)]
    KpiMap(#[from] kpi_map::Error),
    /// A sample table could not be written.
    #[error(transparent)]
    Samples(#[from] sample::Error),
    /// The poller could not list metric types.
    #[error(transparent)]
    Fetch(#[from] FetchError),
}

/// Outcome of one [`Collector::collect`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Collected {
    /// Metric types written in this call
    pub metric_types: usize,
    /// Metric types skipped because the catalog already holds them
    pub resumed: usize,
    /// Metric types the poller failed on
    pub failed: usize,
    /// KPIs written
    pub kpis: usize,
}

/// Writes one collection run directory.
#[derive(Debug, Clone)]
pub struct Collector {
    root: PathBuf,
    window: Window,
}

impl Collector {
    /// Create a new instance of `Collector`
    #[must_use]
    pub fn new<P: Into<PathBuf>>(root: P, window: Window) -> Self {
        Self {
            root: root.into(),
            window,
        }
    }

    /// Collect every metric type `fetch` lists.
    ///
    /// The catalog entry of a metric type is appended only after all its
    /// KPIs are on disk; a metric type interrupted halfway is collected again
    /// from scratch on the next call.
    ///
    /// # Errors
    ///
    /// Returns an error if metric types cannot be listed, if the listing
    /// disagrees with the run's catalog or if the run directory cannot be
    /// written. A metric type the poller fails on is logged and skipped.
    pub fn collect<F: Fetch>(&self, fetch: &mut F) -> Result<Collected, Error> {
        fs::create_dir_all(&self.root)?;
        let catalog_path = self.root.join(CATALOG_FILE);
        let mut catalog = Catalog::open(&catalog_path)?;
        let metric_types = fetch.metric_types()?;
        let total = metric_types.len();
        let mut collected = Collected::default();

        for (position, metric_type) in metric_types.into_iter().enumerate() {
            let index = u32::try_from(position + 1).unwrap_or(u32::MAX);
            if catalog.contains(index, &metric_type) {
                debug!("[{index}/{total}] {metric_type} already collected");
                collected.resumed += 1;
                continue;
            }
            let entry = Entry {
                index,
                metric_type,
            };
            catalog.insert(entry.clone())?;
            info!("[{index}/{total}] Collecting {}", entry.metric_type);

            let series = match fetch.fetch_time_series(&entry.metric_type, self.window) {
                Ok(series) => series,
                Err(e) => {
                    warn!("Skipping {}: {e}", entry.metric_type);
                    collected.failed += 1;
                    continue;
                }
            };
            collected.kpis += self.write_metric_type(index, &series)?;
            Catalog::append(&catalog_path, &entry)?;
            collected.metric_types += 1;
        }
        Ok(collected)
    }

    fn write_metric_type(&self, index: u32, series: &[FetchedSeries]) -> Result<usize, Error> {
        let dir = metric_type_dir(&self.root, index);
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }
        fs::create_dir_all(&dir)?;
        let map_path = dir.join(KPI_MAP_FILE);

        let mut local: u32 = 0;
        for s in series {
            if s.samples.is_empty() {
                continue;
            }
            let kpi = match LabelSet::from_namespaces(
                [&s.resource_labels, &s.metric_labels],
                s.resource_type.as_deref(),
            ) {
                Ok(kpi) => kpi,
                Err(e) => {
                    warn!("Skipping series of metric type {index}: {e}");
                    continue;
                }
            };
            let path = sample_path(&self.root, index, local + 1);
            match sample::write_samples_file(&path, s.kind, &s.samples) {
                Ok(()) => {}
                Err(sample::Error::KindMismatch { expected, found }) => {
                    warn!("Skipping series {kpi}: declared {expected:?}, holds {found:?}");
                    fs::remove_file(&path)?;
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
            local += 1;
            kpi_map::append_jsonl_file(&map_path, &kpi_map::Record { index: local, kpi })?;
        }
        Ok(local as usize)
    }
}
