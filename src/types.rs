//! Core data types that flow through the crawl pipeline.
//!
//! `UrlInfo` is transient and cheap to clone; `UrlMetadata` and `HostState`
//! are durable and persisted to the embedded stores in [`crate::metadata`]
//! and [`crate::robots`]; `EnrichedRecord` is the JSON-serialized output
//! shape described in the network/storage contract.

use std::cmp::Ordering;
use std::time::Instant;

use serde::{Deserialize, Serialize};

/// A URL awaiting fetch, ranked by priority then depth.
///
/// `Ord`/`PartialOrd` are implemented so that a `BinaryHeap<UrlInfo>` pops
/// the highest-priority, lowest-depth item first — higher priority wins,
/// ties broken by shallower depth.
#[derive(Debug, Clone)]
pub struct UrlInfo {
    pub url: String,
    pub priority: f64,
    pub depth: u32,
    pub referring_host: String,
    pub discovered_at: Instant,
}

impl UrlInfo {
    pub fn new(url: impl Into<String>, priority: f64, depth: u32, referring_host: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            priority: priority.clamp(0.1, 2.0),
            depth,
            referring_host: referring_host.into(),
            discovered_at: Instant::now(),
        }
    }
}

impl PartialEq for UrlInfo {
    fn eq(&self, other: &Self) -> bool {
        self.url == other.url
    }
}
impl Eq for UrlInfo {}

impl PartialOrd for UrlInfo {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for UrlInfo {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .partial_cmp(&other.priority)
            .unwrap_or(Ordering::Equal)
            .then_with(|| other.depth.cmp(&self.depth))
    }
}

/// Durable per-URL crawl history. Owned exclusively by the metadata store;
/// every other component only sees snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UrlMetadata {
    pub content_hash: String,
    pub last_crawl_time: chrono::DateTime<chrono::Utc>,
    pub previous_change_time: chrono::DateTime<chrono::Utc>,
    pub expected_next_crawl: chrono::DateTime<chrono::Utc>,
    pub backoff_multiplier: u32,
    pub crawl_count: u32,
    pub change_frequency: f64,
}

impl UrlMetadata {
    /// A freshly-initialized record for a URL the metadata store has never
    /// seen. `expected_next_crawl == last_crawl_time` satisfies the
    /// invariant trivially until the first crawl completes.
    pub fn fresh() -> Self {
        let now = chrono::Utc::now();
        Self {
            content_hash: String::new(),
            last_crawl_time: now,
            previous_change_time: now,
            expected_next_crawl: now,
            backoff_multiplier: 1,
            crawl_count: 0,
            change_frequency: 0.0,
        }
    }
}

/// Durable per-host robots.txt cache entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostRobots {
    pub raw_robots_text: String,
    pub fetched_at: chrono::DateTime<chrono::Utc>,
    pub fetch_status: u16,
    pub is_valid: bool,
    pub parsed_sitemap_urls: Vec<String>,
    pub parsed_crawl_delay: Option<u64>,
    /// Longest-prefix disallow/allow rules for the `*` and matching
    /// user-agent sections, pre-parsed so `check` is a pure lookup.
    pub rules: Vec<RobotsRule>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RobotsRule {
    pub prefix: String,
    pub allow: bool,
}

/// The outcome of a robots.txt check for a given (host, path).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RobotsDecision {
    Allowed,
    Disallowed,
    DeferredFetchStarted,
}

/// What kind of request a [`FetchContext`] represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchKind {
    Page,
    RobotsTxt,
}

/// One in-flight HTTP request. Cheap metadata only — the actual response
/// body/headers are owned by the future driving the request inside the
/// fetch worker's `JoinSet`, since that's where this crate's "multiplex
/// client" lives.
#[derive(Debug, Clone)]
pub struct FetchContext {
    pub url_info: UrlInfo,
    pub kind: FetchKind,
    pub retry_count: u8,
}

/// A fetched HTML page handed from a fetch worker to an HTML worker.
#[derive(Debug, Clone)]
pub struct HtmlTask {
    pub html_body: String,
    pub url: String,
    pub host: String,
    pub depth: u32,
    pub fetch_start_time: std::time::Instant,
    pub http_status: u16,
}

/// The JSON-serialized record written to the raw HTML archive, per the
/// network contract's EnrichedRecord schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichedRecord {
    pub url: String,
    pub host: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub depth: u32,
    pub http_status_code: u16,
    pub content_length: usize,
    pub content_hash: String,
    pub last_crawl_time: chrono::DateTime<chrono::Utc>,
    pub previous_change_time: chrono::DateTime<chrono::Utc>,
    pub expected_next_crawl: chrono::DateTime<chrono::Utc>,
    pub backoff_multiplier: u32,
    pub crawl_count: u32,
    pub change_frequency: f64,
    pub content: String,
}

/// Normalizes a URL's authority into the "host" the spec means everywhere
/// else: lowercase, leading `www.` stripped.
pub fn normalize_host(host: &str) -> String {
    let lower = host.to_ascii_lowercase();
    lower.strip_prefix("www.").unwrap_or(&lower).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn higher_priority_sorts_first() {
        let a = UrlInfo::new("http://a", 1.5, 2, "a");
        let b = UrlInfo::new("http://b", 0.8, 0, "a");
        assert!(a > b);
    }

    #[test]
    fn ties_broken_by_lower_depth() {
        let shallow = UrlInfo::new("http://a", 1.0, 0, "a");
        let deep = UrlInfo::new("http://b", 1.0, 3, "a");
        assert!(shallow > deep);
    }

    #[test]
    fn priority_is_clamped() {
        let hi = UrlInfo::new("http://a", 10.0, 0, "a");
        let lo = UrlInfo::new("http://b", -5.0, 0, "a");
        assert_eq!(hi.priority, 2.0);
        assert_eq!(lo.priority, 0.1);
    }

    #[test]
    fn normalize_host_strips_www_and_lowercases() {
        assert_eq!(normalize_host("WWW.Example.com"), "example.com");
        assert_eq!(normalize_host("example.com"), "example.com");
    }
}
