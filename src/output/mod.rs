//! Output module for run reports and statistics
//!
//! This module handles:
//! - The end-of-run summary and the process exit status derived from it
//! - Harvest statistics for the `--stats` mode

pub mod stats;
mod summary;

pub use stats::{load_statistics, print_statistics, HarvestStatistics};
pub use summary::{ExitStatus, HaltReason, RunSummary};
