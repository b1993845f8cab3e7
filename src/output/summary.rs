//! Run outcome reporting

use crate::crawler::Trip;
use crate::state::PageId;
use std::fmt;

/// How a run ended, as seen by the calling process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// Every dispatched page was harvested
    Success,
    /// The run finished or halted with some pages left unharvested
    PartialFailure,
    /// The run could not start
    FatalError,
}

impl ExitStatus {
    pub fn code(self) -> i32 {
        match self {
            ExitStatus::Success => 0,
            ExitStatus::PartialFailure => 1,
            ExitStatus::FatalError => 2,
        }
    }
}

/// Why dispatch stopped early
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HaltReason {
    CircuitOpen(Trip),
    Cancelled,
}

impl fmt::Display for HaltReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HaltReason::CircuitOpen(trip) => write!(f, "circuit breaker opened ({})", trip),
            HaltReason::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Counters for one harvest run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub halt_reason: Option<HaltReason>,
    /// Tasks handed to workers
    pub dispatched: u64,
    /// Pages persisted and marked visited
    pub pages_visited: u64,
    /// Pages that ended in a terminal failure; they stay unvisited
    pub failed_pages: Vec<PageId>,
    /// Pages that parsed to zero reviews
    pub pages_empty: u64,
    pub records_saved: u64,
    /// First page found past the end of the listing
    pub end_of_listing: Option<PageId>,
}

impl RunSummary {
    pub fn pages_failed(&self) -> u64 {
        self.failed_pages.len() as u64
    }

    pub fn status(&self) -> ExitStatus {
        if self.halt_reason.is_none() && self.failed_pages.is_empty() {
            ExitStatus::Success
        } else {
            ExitStatus::PartialFailure
        }
    }

    /// Logs the end-of-run report
    pub fn log(&self) {
        tracing::info!(
            "Run finished: {} dispatched, {} visited, {} failed, {} empty, {} reviews saved",
            self.dispatched,
            self.pages_visited,
            self.pages_failed(),
            self.pages_empty,
            self.records_saved
        );
        if let Some(reason) = &self.halt_reason {
            tracing::warn!("Run halted early: {}", reason);
        }
        if let Some(end) = self.end_of_listing {
            tracing::info!("Listing ends before page {}", end);
        }
        if !self.failed_pages.is_empty() {
            let pages: Vec<String> = self.failed_pages.iter().map(|p| p.to_string()).collect();
            tracing::warn!("Unharvested pages: {}", pages.join(", "));
        }
    }
}
