//! Per-host waitlists for URLs blocked on an in-flight robots.txt fetch.
//!
//! This is distinct from the waitlist embedded in
//! [`crate::robots::RobotsGatekeeper`] itself: the gatekeeper's internal
//! waitlist is what `check`/`update_cache` use to guarantee the
//! replay-or-observe atomicity property. This store is the fetch-worker-
//! facing staging area for URLs a worker has decided to defer while it
//! goes and issues the robots.txt fetch on the frontier's behalf.

use parking_lot::Mutex;
use std::collections::HashMap;

use crate::types::UrlInfo;

#[derive(Default)]
pub struct DeferredUrlStore {
    by_host: Mutex<HashMap<String, Vec<UrlInfo>>>,
}

impl DeferredUrlStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn defer(&self, host: &str, url: UrlInfo) {
        self.by_host.lock().entry(host.to_string()).or_default().push(url);
    }

    /// Atomically removes and returns every URL waiting on `host`.
    pub fn drain(&self, host: &str) -> Vec<UrlInfo> {
        self.by_host.lock().remove(host).unwrap_or_default()
    }

    /// True if at least one URL is currently waiting on `host`. Read-only —
    /// does not drain.
    pub fn is_waiting(&self, host: &str) -> bool {
        self.by_host.lock().get(host).map(|v| !v.is_empty()).unwrap_or(false)
    }

    pub fn total_waiting(&self) -> usize {
        self.by_host.lock().values().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_returns_all_deferred_urls_for_host() {
        let store = DeferredUrlStore::new();
        store.defer("test", UrlInfo::new("http://test/a", 1.0, 0, "test"));
        store.defer("test", UrlInfo::new("http://test/b", 1.0, 0, "test"));
        store.defer("other", UrlInfo::new("http://other/a", 1.0, 0, "other"));

        let drained = store.drain("test");
        assert_eq!(drained.len(), 2);
        assert!(store.drain("test").is_empty());
        assert_eq!(store.total_waiting(), 1);
    }
}
