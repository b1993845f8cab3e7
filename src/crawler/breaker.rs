//! Run-level circuit breaker
//!
//! Opens once failures pile up, either as an unbroken streak or as too high a
//! share of the most recent outcomes. An open breaker stays open for the rest
//! of the run.

use crate::config::CrawlerConfig;
use std::collections::VecDeque;
use std::fmt;

/// Breaker thresholds
#[derive(Clone, Debug, PartialEq)]
pub struct BreakerConfig {
    /// Consecutive failures that open the breaker
    pub failure_threshold: u32,
    /// Number of recent outcomes considered for the rate
    pub failure_window: usize,
    /// Failure share of a full window that opens the breaker when exceeded
    pub failure_rate: f64,
}

impl BreakerConfig {
    pub fn from_config(config: &CrawlerConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold,
            failure_window: config.failure_window as usize,
            failure_rate: config.failure_rate,
        }
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self::from_config(&CrawlerConfig::default())
    }
}

/// Why the breaker opened
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Trip {
    Consecutive(u32),
    Rate { failures: usize, window: usize },
}

impl fmt::Display for Trip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trip::Consecutive(n) => write!(f, "{} consecutive failures", n),
            Trip::Rate { failures, window } => {
                write!(f, "{} failures in the last {} pages", failures, window)
            }
        }
    }
}

#[derive(Debug)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    consecutive: u32,
    /// true = failure
    recent: VecDeque<bool>,
    tripped: Option<Trip>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            recent: VecDeque::with_capacity(config.failure_window),
            config,
            consecutive: 0,
            tripped: None,
        }
    }

    pub fn record_success(&mut self) {
        self.consecutive = 0;
        self.push(false);
    }

    /// Records a failure, returning the trip reason if this one opened the breaker
    pub fn record_failure(&mut self) -> Option<Trip> {
        self.consecutive += 1;
        self.push(true);

        if self.tripped.is_some() {
            return None;
        }

        let trip = if self.consecutive >= self.config.failure_threshold {
            Some(Trip::Consecutive(self.consecutive))
        } else {
            self.rate_trip()
        };
        self.tripped = trip;
        trip
    }

    pub fn is_open(&self) -> bool {
        self.tripped.is_some()
    }

    pub fn trip(&self) -> Option<Trip> {
        self.tripped
    }

    fn push(&mut self, failed: bool) {
        if self.config.failure_window == 0 {
            return;
        }
        if self.recent.len() == self.config.failure_window {
            self.recent.pop_front();
        }
        self.recent.push_back(failed);
    }

    fn rate_trip(&self) -> Option<Trip> {
        let window = self.recent.len();
        if window == 0 || window < self.config.failure_window {
            return None;
        }
        let failures = self.recent.iter().filter(|&&failed| failed).count();
        if failures as f64 / window as f64 > self.config.failure_rate {
            Some(Trip::Rate { failures, window })
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32, window: usize, rate: f64) -> CircuitBreaker {
        CircuitBreaker::new(BreakerConfig {
            failure_threshold: threshold,
            failure_window: window,
            failure_rate: rate,
        })
    }

    #[test]
    fn test_consecutive_failures_trip() {
        let mut b = breaker(3, 20, 1.0);
        assert_eq!(b.record_failure(), None);
        assert_eq!(b.record_failure(), None);
        assert_eq!(b.record_failure(), Some(Trip::Consecutive(3)));
        assert!(b.is_open());
    }

    #[test]
    fn test_success_resets_streak() {
        let mut b = breaker(3, 20, 1.0);
        b.record_failure();
        b.record_failure();
        b.record_success();
        assert_eq!(b.record_failure(), None);
        assert_eq!(b.record_failure(), None);
        assert!(!b.is_open());
    }

    #[test]
    fn test_rate_trips_only_on_full_window() {
        let mut b = breaker(100, 4, 0.5);
        b.record_failure();
        b.record_success();
        assert_eq!(b.record_failure(), None);
        // Window is now full: 3 of 4 failed
        assert_eq!(
            b.record_failure(),
            Some(Trip::Rate {
                failures: 3,
                window: 4
            })
        );
    }

    #[test]
    fn test_rate_at_threshold_does_not_trip() {
        let mut b = breaker(100, 4, 0.5);
        b.record_failure();
        b.record_success();
        b.record_success();
        assert_eq!(b.record_failure(), None);
        assert!(!b.is_open());
    }

    #[test]
    fn test_open_breaker_reports_trip_once() {
        let mut b = breaker(1, 20, 1.0);
        assert!(b.record_failure().is_some());
        assert_eq!(b.record_failure(), None);
        assert_eq!(b.trip(), Some(Trip::Consecutive(1)));
    }
}
