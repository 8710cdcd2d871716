//! Domain blacklist: hosts a fetch worker should refuse to even attempt.
//!
//! Two tiers, per the design's admission-check step: a persistent set
//! (loaded once at startup, e.g. known-bad hosts from configuration) and a
//! temporary set populated by the [`crate::error_tracker::ErrorTracker`]
//! when a host's consecutive transport-error count crosses the threshold.
//! Temporary entries are not evicted automatically; a fresh process start
//! clears them.

use std::collections::HashSet;
use std::time::Instant;

use dashmap::DashMap;

pub struct DomainBlacklist {
    persistent: HashSet<String>,
    temporary: DashMap<String, Instant>,
}

impl DomainBlacklist {
    pub fn new(persistent: impl IntoIterator<Item = String>) -> Self {
        Self {
            persistent: persistent.into_iter().collect(),
            temporary: DashMap::new(),
        }
    }

    pub fn is_blacklisted(&self, host: &str) -> bool {
        self.persistent.contains(host) || self.temporary.contains_key(host)
    }

    pub fn add_temporary(&self, host: &str) {
        self.temporary.insert(host.to_string(), Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persistent_entries_are_blacklisted() {
        let bl = DomainBlacklist::new(["bad.example".to_string()]);
        assert!(bl.is_blacklisted("bad.example"));
        assert!(!bl.is_blacklisted("good.example"));
    }

    #[test]
    fn temporary_entries_can_be_added() {
        let bl = DomainBlacklist::new(std::iter::empty());
        assert!(!bl.is_blacklisted("flaky.example"));
        bl.add_temporary("flaky.example");
        assert!(bl.is_blacklisted("flaky.example"));
    }
}
