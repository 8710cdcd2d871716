//! Shared pool of per-host FIFOs for URLs parked on a rate-limit window.
//!
//! When a fetch worker dequeues a URL whose host isn't yet ready per the
//! [`crate::ratelimit::RateLimiter`], the URL is parked here rather than
//! round-tripping through the frontier — cheaper, and it keeps the
//! frontier's priority ordering meaningful for URLs that are actually
//! ready to go.

use std::collections::VecDeque;

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::ratelimit::RateLimiter;
use crate::types::UrlInfo;

const MAX_PER_HOST: usize = 100;

#[derive(Default)]
pub struct DomainQueueManager {
    queues: DashMap<String, Mutex<VecDeque<UrlInfo>>>,
}

impl DomainQueueManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `url` to `host`'s FIFO if it has fewer than 100 entries.
    pub fn try_queue_for_host(&self, host: &str, url: UrlInfo) -> bool {
        let entry = self.queues.entry(host.to_string()).or_default();
        let mut queue = entry.lock();
        if queue.len() >= MAX_PER_HOST {
            return false;
        }
        queue.push_back(url);
        true
    }

    /// Scans the map and returns the first URL whose host now passes
    /// `rate_limiter.can_request_now`. Because this is the only path that
    /// removes URLs from here, a URL returned by this call is never
    /// re-parked immediately by construction — its host was confirmed
    /// ready at the moment of the dequeue.
    pub fn try_dequeue_from_available(&self, rate_limiter: &RateLimiter) -> Option<(UrlInfo, String)> {
        for entry in self.queues.iter() {
            let host = entry.key().clone();
            if !rate_limiter.can_request_now(&host) {
                continue;
            }
            let mut queue = entry.value().lock();
            if let Some(url) = queue.pop_front() {
                return Some((url, host));
            }
        }
        None
    }

    pub fn total_queued(&self) -> usize {
        self.queues.iter().map(|e| e.value().lock().len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parks_and_releases_when_ready() {
        let mgr = DomainQueueManager::new();
        let rl = RateLimiter::new();
        assert!(mgr.try_queue_for_host("test", UrlInfo::new("http://test/a", 1.0, 0, "test")));
        assert!(mgr.try_dequeue_from_available(&rl).is_some());
    }

    #[test]
    fn respects_per_host_cap() {
        let mgr = DomainQueueManager::new();
        for i in 0..100 {
            assert!(mgr.try_queue_for_host("test", UrlInfo::new(format!("http://test/{i}"), 1.0, 0, "test")));
        }
        assert!(!mgr.try_queue_for_host("test", UrlInfo::new("http://test/overflow", 1.0, 0, "test")));
    }

    #[test]
    fn does_not_release_when_host_not_ready() {
        let mgr = DomainQueueManager::new();
        let rl = RateLimiter::new();
        mgr.try_queue_for_host("test", UrlInfo::new("http://test/a", 1.0, 0, "test"));
        rl.record_request("test");
        assert!(mgr.try_dequeue_from_available(&rl).is_none());
    }
}
