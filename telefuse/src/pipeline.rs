//! The batch driver
//!
//! [`Pipeline::run`] walks the metric-type catalog shared by every
//! configured collection run. For each metric type not yet processed it
//! merges the KPIs of all runs, rounds them to the minute grid, drops empty
//! and constant series, groups and aggregates the rest and checkpoints the
//! result. The aggregated tables on
//! disk are then joined into the wide table.
//!
//! Every artifact is written before the metric type is recorded in the
//! processed catalog, so an interrupted run can be restarted as is.

use std::fs;

use telefuse_capture::{
    catalog::{self, Catalog, Entry},
    frame::{self, Frame},
    kpi_map,
    sample::ValueKind,
};
use tracing::{debug, info, warn};

use crate::{
    aggregate::aggregate,
    assemble::{align_with, assemble},
    canonical::{self, CanonicalKpi},
    config::{self, Config},
    constant::is_constant,
    family::{self, ValueTransform},
    group::{self, group},
    loadtest,
    merge::merge,
    source::{RunDir, Store},
    stats,
};

/// Errors produced by [`Pipeline`]
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Configuration errors
    #[error(transparent)]
    Config(#[from] config::Error),
    /// Two collection runs number metric types differently.
    #[error("source {source_id} is not comparable with the sources before it: {source}")]
    CatalogMismatch {
        /// Id of the offending source, `output` for the processed catalog
        source_id: String,
        /// The disagreement
        #[source]
        source: catalog::Error,
    },
    /// The processed catalog could not be read or written.
    #[error(transparent)]
    Catalog(#[from] catalog::Error),
    /// A table could not be built or written.
    #[error(transparent)]
    Frame(#[from] frame::Error),
    /// A KPI map could not be written.
    #[error(transparent)]
    KpiMap(#[from] kpi_map::Error),
}

/// Counts describing one [`Pipeline::run`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Summary {
    /// Metric types processed in this run
    pub processed: usize,
    /// Metric types skipped because an earlier run processed them
    pub skipped: usize,
    /// Processed metric types that produced no aggregated table
    pub empty: usize,
    /// Distinct KPIs seen in processed metric types
    pub kpis: usize,
    /// KPIs left after dropping empty and constant series
    pub retained: usize,
    /// Aggregation groups written
    pub groups: usize,
    /// Rows of the wide table
    pub rows: usize,
    /// Columns of the wide table, timestamp excluded
    pub columns: usize,
}

#[derive(Debug, Default)]
struct Outcome {
    kpis: usize,
    retained: usize,
    groups: usize,
}

/// Fuses the configured collection runs into the wide table.
#[derive(Debug)]
pub struct Pipeline<S = RunDir> {
    config: Config,
    stores: Vec<S>,
    families: family::Registry,
    context: group::Context,
}

impl Pipeline<RunDir> {
    /// Create a pipeline reading the run directories named in `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if `config` does not validate.
    pub fn new(config: Config) -> Result<Self, Error> {
        let stores = config
            .sources
            .iter()
            .map(|s| RunDir::new(s.id.clone(), s.path.clone()))
            .collect();
        Self::with_stores(config, stores)
    }
}

impl<S: Store> Pipeline<S> {
    /// Create a pipeline over `stores`, in source-enumeration order.
    ///
    /// # Errors
    ///
    /// Returns an error if `config` does not validate.
    pub fn with_stores(config: Config, stores: Vec<S>) -> Result<Self, Error> {
        config.validate()?;
        let context = group::Context::from_config(&config)?;
        let families = family::Registry::new(config.families.clone());
        Ok(Self {
            config,
            stores,
            families,
            context,
        })
    }

    /// Process every pending metric type and rebuild the wide table.
    ///
    /// # Errors
    ///
    /// Returns an error if the sources number metric types inconsistently
    /// or the output directory cannot be written. Sources whose catalog
    /// cannot be read take no part in the run; unreadable KPI maps and
    /// sample tables are logged and skipped.
    pub fn run(&self) -> Result<Summary, Error> {
        fs::create_dir_all(self.config.combined_dir())?;
        fs::create_dir_all(self.config.aggregated_dir())?;

        let processed_path = self.config.processed_catalog();
        let processed = Catalog::open(&processed_path)?;
        let (reference, stores) = self.reference_catalog(&processed)?;

        let mut summary = Summary::default();
        let total = reference.len();
        for (n, entry) in reference.iter().enumerate() {
            if processed.contains(entry.index, &entry.metric_type) {
                debug!("[{}/{total}] {} already processed", n + 1, entry.metric_type);
                summary.skipped += 1;
                continue;
            }
            info!("[{}/{total}] Processing {}", n + 1, entry.metric_type);
            let outcome = self.process(entry, &stores)?;
            Catalog::append(&processed_path, entry)?;

            summary.processed += 1;
            summary.kpis += outcome.kpis;
            summary.retained += outcome.retained;
            summary.groups += outcome.groups;
            if outcome.groups == 0 {
                summary.empty += 1;
            }
        }

        let wide = self.assemble(&reference)?;
        wide.write_csv_file(&self.config.wide_table())?;
        summary.rows = wide.num_rows();
        summary.columns = wide.num_columns();
        info!(
            "Wrote {}: {} rows x {} columns",
            self.config.wide_table().display(),
            summary.rows,
            summary.columns
        );
        Ok(summary)
    }

    /// The union of every readable source catalog and the processed catalog,
    /// with the stores that contributed. The catalogs must agree wherever
    /// they overlap.
    fn reference_catalog(&self, processed: &Catalog) -> Result<(Catalog, Vec<&S>), Error> {
        let mut reference = Catalog::default();
        let mut readable = Vec::with_capacity(self.stores.len());
        for store in &self.stores {
            let catalog = match store.catalog() {
                Ok(catalog) => catalog,
                Err(e) => {
                    warn!("Leaving out source {}: {e}", store.id());
                    continue;
                }
            };
            if catalog.is_empty() {
                warn!("Source {} has an empty catalog", store.id());
            }
            reference
                .union(&catalog)
                .map_err(|source| Error::CatalogMismatch {
                    source_id: store.id().to_string(),
                    source,
                })?;
            readable.push(store);
        }
        reference
            .union(processed)
            .map_err(|source| Error::CatalogMismatch {
                source_id: "output".to_string(),
                source,
            })?;
        Ok((reference, readable))
    }

    fn process(&self, entry: &Entry, stores: &[&S]) -> Result<Outcome, Error> {
        let index = entry.index;
        let family = self.families.lookup(&entry.metric_type);
        let granularity = i64::from(self.config.thresholds.minute_seconds);

        let mut registry = canonical::Registry::new();
        for store in stores {
            match store.kpi_map(index) {
                Ok(records) => {
                    for record in records {
                        registry.register(store.id(), record.index, record.kpi);
                    }
                }
                Err(e) => warn!("Skipping source {} for {}: {e}", store.id(), entry.metric_type),
            }
        }
        let mut outcome = Outcome {
            kpis: registry.len(),
            ..Outcome::default()
        };
        if registry.is_empty() {
            info!("No KPIs for {}", entry.metric_type);
            return Ok(outcome);
        }

        let mut combined = Frame::default();
        let mut kind: Option<ValueKind> = None;
        let mut retained: Vec<&CanonicalKpi> = Vec::new();
        let (mut empty, mut constant) = (0_usize, 0_usize);
        for kpi in registry.kpis() {
            let Some(series) = merge(kpi, stores, index, family.semantics)? else {
                empty += 1;
                continue;
            };
            let reduce: fn(&[f64]) -> f64 = match series.kind {
                ValueKind::Scalar => stats::mean,
                ValueKind::Distribution => stats::median,
            };
            let frame = align_with(series.frame, granularity, reduce);
            // A presence series is all ones until joined with its siblings.
            if family.transform == ValueTransform::Identity && is_constant(&frame) {
                constant += 1;
                continue;
            }
            let expected = *kind.get_or_insert(series.kind);
            if series.kind != expected {
                warn!(
                    "Skipping KPI {} of {}: {:?} values, expected {expected:?}",
                    kpi.index, entry.metric_type, series.kind
                );
                continue;
            }
            combined = combined.outer_join(&frame)?;
            retained.push(kpi);
        }
        if family.transform != ValueTransform::Identity {
            combined.map_values(|v| family.transform.apply(v));
        }
        outcome.retained = retained.len();
        debug!(
            "{}: {} KPIs, {empty} empty, {constant} constant",
            entry.metric_type,
            registry.len()
        );
        let Some(kind) = kind else {
            info!("No varying KPIs for {}", entry.metric_type);
            return Ok(outcome);
        };

        let records: Vec<kpi_map::Record> = registry.kpis().iter().map(CanonicalKpi::record).collect();
        let combined_dir = self.config.combined_dir();
        combined.write_csv_file(&combined_dir.join(format!("metric-{index}.csv")))?;
        kpi_map::write_json_file(&combined_dir.join(format!("metric-{index}-kpi-map.json")), &records)?;

        let groups = group(&family.policy, &retained, &self.context);
        let Some(aggregated) = aggregate(&groups, &combined, kind)? else {
            info!("Nothing aggregated for {}", entry.metric_type);
            return Ok(outcome);
        };
        outcome.groups = aggregated.kpi_map.len();
        let aggregated_dir = self.config.aggregated_dir();
        aggregated
            .frame
            .write_csv_file(&aggregated_dir.join(format!("metric-{index}.csv")))?;
        kpi_map::write_json_file(
            &aggregated_dir.join(format!("metric-{index}-kpi-map.json")),
            &aggregated.kpi_map,
        )?;
        info!(
            "{}: {} KPIs retained in {} groups",
            entry.metric_type, outcome.retained, outcome.groups
        );
        Ok(outcome)
    }

    /// Join every aggregated table on disk, plus the load-test statistics
    /// when configured.
    fn assemble(&self, reference: &Catalog) -> Result<Frame, Error> {
        let aggregated_dir = self.config.aggregated_dir();
        let mut frames = Vec::new();
        for entry in reference.iter() {
            let path = aggregated_dir.join(format!("metric-{}.csv", entry.index));
            if !path.exists() {
                continue;
            }
            match Frame::read_csv_file(&path) {
                Ok(frame) if is_constant(&frame) => {
                    debug!("Dropping constant table of {}", entry.metric_type);
                }
                Ok(frame) => frames.push((entry.index, frame)),
                Err(e) => warn!("Skipping {}: {e}", path.display()),
            }
        }

        let mut extras = Vec::new();
        if let Some(load_test) = &self.config.load_test {
            let granularity = self.config.thresholds.minute_seconds;
            match loadtest::read_stats_file(&load_test.path, granularity, &load_test.prefix) {
                Ok(frame) => extras.push(frame),
                Err(e) => warn!("Skipping load-test statistics {}: {e}", load_test.path.display()),
            }
        }
        Ok(assemble(frames, extras, self.config.thresholds.minute_seconds)?)
    }
}
