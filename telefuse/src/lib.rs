//! The telefuse KPI fusion engine.
//!
//! This library supports the telefuse binary found elsewhere in this project.
//! It reads the KPI samples written by several independent collection runs,
//! decides which of them describe the same KPI, merges them, folds related
//! KPIs into summary statistics and joins everything into one minute-aligned
//! wide table.

#![deny(clippy::all)]
#![deny(clippy::cargo)]
#![deny(clippy::pedantic)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]
#![deny(clippy::dbg_macro)]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]
#![deny(missing_debug_implementations)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::multiple_crate_versions)]

pub mod aggregate;
pub mod assemble;
pub mod canonical;
pub mod config;
pub mod constant;
pub mod family;
pub mod fetch;
pub mod group;
pub mod loadtest;
pub mod merge;
pub mod pipeline;
pub mod source;
pub(crate) mod stats;
