//! Per-host minimum request spacing with failure-driven backoff.
//!
//! State is sharded into 256 independent cells (`hash(host) % 256`) so that
//! hosts hashing to different cells never contend on the same lock. Each
//! cell is a `parking_lot::Mutex` over a small `HashMap`, which keeps the
//! common case (a handful of hosts per cell under realistic load) wait-free
//! in practice without the overhead of a lock-free hash table.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::time::Instant;

use parking_lot::Mutex;

const SHARD_COUNT: usize = 256;
const MIN_SPACING_NANOS: u64 = 50_000_000; // 50ms, i.e. 20 req/s/host
const BASE_GAP_NANOS: u64 = 2_000_000; // 2ms
const K_NANOS: u64 = 2_000_000; // 2ms per failure
const MAX_EXTRA_GAP_NANOS: u64 = 20_000_000; // 20ms cap

#[derive(Debug, Default, Clone, Copy)]
struct HostState {
    next_allowed_nanos: u128,
    consecutive_failure_count: u32,
    /// A server-declared `Crawl-delay` from robots.txt, applied as a floor
    /// on top of the ordinary failure-driven gap. Zero means "none set".
    crawl_delay_nanos: u64,
}

pub struct RateLimiter {
    shards: Vec<Mutex<HashMap<String, HostState>>>,
    epoch: Instant,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        let mut shards = Vec::with_capacity(SHARD_COUNT);
        shards.resize_with(SHARD_COUNT, || Mutex::new(HashMap::new()));
        Self { shards, epoch: Instant::now() }
    }

    fn shard_for(&self, host: &str) -> &Mutex<HashMap<String, HostState>> {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        host.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % SHARD_COUNT]
    }

    fn now_nanos(&self) -> u128 {
        self.epoch.elapsed().as_nanos()
    }

    /// True iff at least 50ms have elapsed since the last request to
    /// `host` (or `host` has never been seen), and no explicit throttle is
    /// still in effect.
    pub fn can_request_now(&self, host: &str) -> bool {
        let shard = self.shard_for(host);
        let map = shard.lock();
        match map.get(host) {
            Some(state) => self.now_nanos() >= state.next_allowed_nanos,
            None => true,
        }
    }

    /// Records a request having just been sent, advancing the next-allowed
    /// time by the spacing implied by this host's current failure count.
    pub fn record_request(&self, host: &str) {
        let shard = self.shard_for(host);
        let mut map = shard.lock();
        let now = self.now_nanos();
        let entry = map.entry(host.to_string()).or_default();
        let gap = required_gap_nanos(entry.consecutive_failure_count).max(entry.crawl_delay_nanos);
        entry.next_allowed_nanos = now + gap as u128;
    }

    /// Installs a per-host minimum spacing parsed from that host's
    /// `Crawl-delay` robots.txt directive, floored against the ordinary
    /// failure-driven gap on every subsequent `record_request`. Does not
    /// retroactively push out an already-computed `next_allowed_nanos`.
    pub fn set_crawl_delay(&self, host: &str, seconds: u64) {
        let shard = self.shard_for(host);
        let mut map = shard.lock();
        let entry = map.entry(host.to_string()).or_default();
        entry.crawl_delay_nanos = seconds.saturating_mul(1_000_000_000);
    }

    pub fn record_success(&self, host: &str) {
        let shard = self.shard_for(host);
        let mut map = shard.lock();
        if let Some(entry) = map.get_mut(host) {
            entry.consecutive_failure_count = 0;
        }
    }

    pub fn record_failure(&self, host: &str) {
        let shard = self.shard_for(host);
        let mut map = shard.lock();
        let entry = map.entry(host.to_string()).or_default();
        entry.consecutive_failure_count += 1;
    }

    /// Forces the next-allowed time forward by `duration`, used on
    /// HTTP 429/503 to throttle a misbehaving host harder than the
    /// ordinary spacing would.
    pub fn throttle(&self, host: &str, duration: std::time::Duration) {
        let shard = self.shard_for(host);
        let mut map = shard.lock();
        let now = self.now_nanos();
        let entry = map.entry(host.to_string()).or_default();
        let candidate = now + duration.as_nanos();
        entry.next_allowed_nanos = entry.next_allowed_nanos.max(candidate);
    }
}

/// `base_gap + min(fail_count * k, max_gap)`, floored at the unconditional
/// 50ms minimum spacing.
fn required_gap_nanos(consecutive_failure_count: u32) -> u64 {
    let extra = (consecutive_failure_count as u64 * K_NANOS).min(MAX_EXTRA_GAP_NANOS);
    (BASE_GAP_NANOS + extra).max(MIN_SPACING_NANOS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unseen_host_is_ready() {
        let rl = RateLimiter::new();
        assert!(rl.can_request_now("example.com"));
    }

    #[test]
    fn spacing_enforced_after_request() {
        let rl = RateLimiter::new();
        rl.record_request("example.com");
        assert!(!rl.can_request_now("example.com"));
    }

    #[test]
    fn failure_increases_required_gap() {
        let rl = RateLimiter::new();
        for _ in 0..10 {
            rl.record_failure("slow.example.com");
        }
        rl.record_request("slow.example.com");
        // gap now base+cap = 2ms+20ms = 22ms > 50ms floor, so floor of 50ms holds
        assert!(!rl.can_request_now("slow.example.com"));
    }

    #[test]
    fn success_clears_failure_count() {
        let rl = RateLimiter::new();
        rl.record_failure("example.com");
        rl.record_failure("example.com");
        rl.record_success("example.com");
        let shard = rl.shard_for("example.com");
        let map = shard.lock();
        assert_eq!(map.get("example.com").unwrap().consecutive_failure_count, 0);
    }

    #[test]
    fn throttle_pushes_next_allowed_forward() {
        let rl = RateLimiter::new();
        rl.record_request("example.com");
        rl.throttle("example.com", std::time::Duration::from_secs(5));
        assert!(!rl.can_request_now("example.com"));
    }

    #[test]
    fn crawl_delay_floors_the_required_gap() {
        let rl = RateLimiter::new();
        rl.set_crawl_delay("slow.example.com", 1);
        rl.record_request("slow.example.com");
        let shard = rl.shard_for("slow.example.com");
        let next_allowed = shard.lock().get("slow.example.com").unwrap().next_allowed_nanos;
        assert!(next_allowed >= 1_000_000_000, "crawl-delay of 1s should floor the gap at 1s");
    }

    #[test]
    fn zero_crawl_delay_leaves_ordinary_spacing_unaffected() {
        let rl = RateLimiter::new();
        rl.set_crawl_delay("example.com", 0);
        rl.record_request("example.com");
        let shard = rl.shard_for("example.com");
        let next_allowed = shard.lock().get("example.com").unwrap().next_allowed_nanos;
        assert!(next_allowed < 1_000_000_000);
    }
}
