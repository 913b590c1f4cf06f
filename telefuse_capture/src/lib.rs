//! Crate regarding telefuse's on-disk formats
//!
//! Collection runs, the merge stage and the aggregation stage exchange data
//! through plain files: a metric-type catalog, KPI/label maps, per-KPI sample
//! tables and timestamp-indexed frames. This crate owns those formats and the
//! small data model they carry. Nothing in here knows about merging or
//! grouping policy.

#![deny(clippy::all)]
#![deny(clippy::cargo)]
#![deny(clippy::perf)]
#![deny(clippy::suspicious)]
#![deny(clippy::complexity)]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]

pub mod catalog;
pub mod frame;
pub mod kpi_map;
pub mod labels;
pub mod sample;
