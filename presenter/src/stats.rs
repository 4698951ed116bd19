//! Presentation statistics tracking
//!
//! Counters for the overlay path, logged periodically:
//! - Frames presented and end-of-stream drains
//! - Failed imports and failed commits
//! - Handles currently held by the generation ring

use std::time::{Duration, Instant};

/// Tracks overlay presentation statistics
#[derive(Debug)]
pub struct PresentStats {
    /// Frames successfully handed to the display
    pub(crate) frames_presented: u64,

    /// Frames aborted because a buffer could not be imported
    pub(crate) import_failures: u64,

    /// Frames aborted because the display rejected the update
    pub(crate) commit_failures: u64,

    /// Number of end-of-stream drains
    pub(crate) drains: u64,

    /// GEM handles alive across the ring after the last update
    pub(crate) live_handles: usize,

    /// Last time stats were logged
    last_stats_log: Instant,
}

impl Default for PresentStats {
    fn default() -> Self {
        Self::new()
    }
}

impl PresentStats {
    pub fn new() -> Self {
        Self {
            frames_presented: 0,
            import_failures: 0,
            commit_failures: 0,
            drains: 0,
            live_handles: 0,
            last_stats_log: Instant::now(),
        }
    }

    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }

    pub fn import_failures(&self) -> u64 {
        self.import_failures
    }

    pub fn commit_failures(&self) -> u64 {
        self.commit_failures
    }

    pub fn drains(&self) -> u64 {
        self.drains
    }

    pub fn live_handles(&self) -> usize {
        self.live_handles
    }

    /// Failed frames as a percentage of all attempts
    pub fn failure_rate(&self) -> f64 {
        let failed = self.import_failures + self.commit_failures;
        let total = self.frames_presented + failed;
        if total == 0 {
            0.0
        } else {
            (failed as f64 / total as f64) * 100.0
        }
    }

    /// Log statistics if interval has elapsed
    pub fn maybe_log_stats(&mut self, interval: Duration) {
        if self.last_stats_log.elapsed() < interval {
            return;
        }

        log::info!(
            "Overlay stats: {} presented, {} import failures, {} commit failures ({:.1}% failed), {} live handles",
            self.frames_presented,
            self.import_failures,
            self.commit_failures,
            self.failure_rate(),
            self.live_handles
        );

        self.last_stats_log = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_rate() {
        let mut stats = PresentStats::new();
        assert_eq!(stats.failure_rate(), 0.0);

        stats.frames_presented = 3;
        stats.import_failures = 1;
        assert_eq!(stats.failure_rate(), 25.0);
    }
}
