//! Per-host consecutive-transport-error counter.
//!
//! Grounded on the original crawler's `monitoring/error_tracker.cpp`:
//! increment on transport failure, reset on success, and expose a
//! threshold check the fetch worker uses to decide when to hand a host to
//! the [`crate::blacklist::DomainBlacklist`].

use dashmap::DashMap;

const DEFAULT_THRESHOLD: u32 = 5;

pub struct ErrorTracker {
    counts: DashMap<String, u32>,
    threshold: u32,
}

impl Default for ErrorTracker {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD)
    }
}

impl ErrorTracker {
    pub fn new(threshold: u32) -> Self {
        Self { counts: DashMap::new(), threshold }
    }

    /// Increments the host's consecutive-error count and returns true if
    /// it has now crossed the blacklist threshold.
    pub fn record_error(&self, host: &str) -> bool {
        let mut entry = self.counts.entry(host.to_string()).or_insert(0);
        *entry += 1;
        *entry >= self.threshold
    }

    pub fn record_success(&self, host: &str) {
        self.counts.remove(host);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crosses_threshold_after_n_errors() {
        let tracker = ErrorTracker::new(3);
        assert!(!tracker.record_error("flaky.example"));
        assert!(!tracker.record_error("flaky.example"));
        assert!(tracker.record_error("flaky.example"));
    }

    #[test]
    fn success_resets_count() {
        let tracker = ErrorTracker::new(3);
        tracker.record_error("flaky.example");
        tracker.record_error("flaky.example");
        tracker.record_success("flaky.example");
        assert!(!tracker.record_error("flaky.example"));
    }
}
