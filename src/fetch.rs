//! Fetch Workers: concurrent HTTP multiplexing, admission checks, and the
//! robots/rate-limit/backoff dance of the design's §4.9.
//!
//! Each fetch worker is a `tokio::spawn`ed task driving one shared
//! `reqwest::Client` through a `tokio::task::JoinSet` of up to
//! [`MAX_IN_FLIGHT`] concurrently in-flight requests. The JoinSet stands in
//! for the "multiplexed HTTP client" the design describes: every spawned
//! future inside it *is* a `FetchContext`'s lifetime, keyed implicitly by
//! the `JoinSet`'s internal task id rather than a hand-rolled handle table.
//! Draining it with a bounded `join_next()` followed by non-blocking
//! `try_join_next()` calls is the "advance the multiplex client; drain all
//! completed request events" poll phase.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use reqwest::{Client, StatusCode};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, warn};
use url::Url;

use crate::blacklist::DomainBlacklist;
use crate::conditional_get::ConditionalGetCache;
use crate::diskqueue::ShardedDiskQueue;
use crate::domainqueue::DomainQueueManager;
use crate::error_tracker::ErrorTracker;
use crate::frontier::SmartFrontier;
use crate::html::{content_hash, quick_quality_check};
use crate::metadata::MetadataStore;
use crate::ratelimit::RateLimiter;
use crate::robots::RobotsGatekeeper;
use crate::shutdown::ShutdownSignal;
use crate::sitemap::SitemapParser;
use crate::types::{normalize_host, HtmlTask, RobotsDecision, UrlInfo};
use crate::workstealing::WorkStealingQueues;

pub const MAX_IN_FLIGHT: usize = 45;
const MAX_ACQUIRE_ATTEMPTS: usize = 8;
const DISK_BATCH_SIZE: usize = 8;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(4);
const TOTAL_TIMEOUT: Duration = Duration::from_secs(10);
const POLL_TIMEOUT: Duration = Duration::from_millis(100);
const IDLE_SLEEP: Duration = Duration::from_millis(50);
pub const MAX_REDIRECTS: usize = 3;
pub const USER_AGENT: &str = "crawlcore/0.1 (+https://example.invalid/bot)";
const RATE_LIMIT_THROTTLE: Duration = Duration::from_secs(5);

/// Everything a fetch worker needs, shared (by `Arc`) across every worker
/// task. Constructed once at startup and handed to each `run` call — the
/// dependency-injection style the design's §9 prefers over global
/// singletons.
pub struct FetchShared {
    pub is_regular: bool,
    pub client: Client,
    pub frontier: Arc<SmartFrontier>,
    pub work_queues: Arc<WorkStealingQueues>,
    pub domain_queue: Arc<DomainQueueManager>,
    pub disk_queue: Option<Arc<ShardedDiskQueue>>,
    pub rate_limiter: Arc<RateLimiter>,
    pub robots: Arc<RobotsGatekeeper>,
    pub blacklist: Arc<DomainBlacklist>,
    pub error_tracker: Arc<ErrorTracker>,
    pub metadata: Arc<MetadataStore>,
    pub conditional_get: Arc<ConditionalGetCache>,
    /// `Sitemap:` lines discovered while parsing a robots.txt body are fed
    /// here so the Sitemap Parser picks them up on its own cadence. `None`
    /// in FRESH mode, which has no sitemap component.
    pub sitemap_parser: Option<Arc<SitemapParser>>,
    pub html_tx: mpsc::Sender<HtmlTask>,
    pub shutdown: Arc<ShutdownSignal>,
    /// Claims a host for exactly one in-flight robots.txt fetch at a time,
    /// so N workers independently observing `DeferredFetchStarted` for the
    /// same host don't all spawn a redundant fetch.
    pub robots_fetch_claimed: Arc<DashMap<String, ()>>,
    pub fetched_count: Arc<AtomicU64>,
    pub html_queue_dropped: Arc<AtomicU64>,
    pub in_flight_total: Arc<AtomicUsize>,
}

enum FetchEvent {
    Page {
        info: UrlInfo,
        host: String,
        retry_count: u8,
        result: PageResult,
    },
    Robots {
        host: String,
        result: RobotsResult,
    },
}

enum PageResult {
    Success {
        status: u16,
        body: Option<String>,
        etag: Option<String>,
        last_modified: Option<String>,
    },
    TlsFailure,
    Transport,
}

enum RobotsResult {
    Success { body: String, status: u16 },
    Failure,
}

/// Runs one fetch worker's main loop until the shared [`ShutdownSignal`] is
/// triggered. `worker_id` indexes this worker's slot in the shared
/// [`WorkStealingQueues`].
pub async fn run(shared: Arc<FetchShared>, worker_id: usize) {
    let mut in_flight: JoinSet<FetchEvent> = JoinSet::new();

    loop {
        if shared.shutdown.is_stopped() && in_flight.is_empty() {
            break;
        }

        // 1. Top-up phase.
        let mut attempts_without_work = 0usize;
        while in_flight.len() < MAX_IN_FLIGHT && !shared.shutdown.is_stopped() {
            match acquire_url(&shared, worker_id) {
                Some(info) => {
                    attempts_without_work = 0;
                    admit(&shared, worker_id, info, &mut in_flight);
                }
                None => {
                    attempts_without_work += 1;
                    if attempts_without_work >= MAX_ACQUIRE_ATTEMPTS {
                        break;
                    }
                }
            }
        }

        // 2. Poll phase: bounded wait for the first completion, then drain
        // every other already-completed event without blocking.
        if !in_flight.is_empty() {
            let first = tokio::time::timeout(POLL_TIMEOUT, in_flight.join_next()).await;
            if let Ok(Some(Ok(event))) = first {
                handle_completion(&shared, worker_id, event, &mut in_flight);
            }
            while let Some(Ok(event)) = in_flight.try_join_next() {
                handle_completion(&shared, worker_id, event, &mut in_flight);
            }
        } else if attempts_without_work >= MAX_ACQUIRE_ATTEMPTS {
            tokio::time::sleep(IDLE_SLEEP).await;
        }

        if shared.shutdown.is_stopped() && in_flight.is_empty() {
            break;
        }
    }

    in_flight.shutdown().await;
}

/// Tries each URL source in the order the design mandates, returning the
/// first hit: per-domain queue (rate-limit-ready hosts first), smart
/// frontier, this worker's local deque then stealing, and finally — in
/// REGULAR mode — the sharded disk queue.
fn acquire_url(shared: &FetchShared, worker_id: usize) -> Option<UrlInfo> {
    if let Some((info, _host)) = shared.domain_queue.try_dequeue_from_available(&shared.rate_limiter) {
        return Some(info);
    }
    if let Some(info) = shared.frontier.dequeue() {
        return Some(info);
    }
    if let Some(info) = shared.work_queues.pop_local(worker_id) {
        return Some(info);
    }
    if let Some(info) = shared.work_queues.try_steal(worker_id) {
        return Some(info);
    }
    if let Some(disk_queue) = &shared.disk_queue {
        if let Ok(batch) = disk_queue.dequeue(DISK_BATCH_SIZE) {
            let mut iter = batch.into_iter();
            let first = iter.next()?;
            let rest: Vec<UrlInfo> = iter.filter_map(|u| url_info_from_disk(&u)).collect();
            let rejected = shared.frontier.enqueue_batch(rest);
            for info in rejected {
                if !shared.work_queues.push_local(worker_id, info) {
                    // Both the frontier and this worker's local deque are
                    // full; drop it rather than bounce it straight back to
                    // the disk queue we just read it from.
                }
            }
            return url_info_from_disk(&first);
        }
    }
    None
}

/// The disk queue only stores URL strings (§4.4), so depth/priority/referrer
/// metadata can't survive an overflow-and-reload round trip. Reconstituted
/// entries get a conservative mid-range priority and depth 0 — an explicit,
/// documented approximation (see DESIGN.md) rather than a silent one.
pub(crate) fn url_info_from_disk(raw: &str) -> Option<UrlInfo> {
    let url = Url::parse(raw).ok()?;
    let host = normalize_host(url.host_str()?);
    Some(UrlInfo::new(raw, 0.5, 0, host))
}

/// Admission checks (§4.9 step 2) followed by request construction (step 3)
/// for one acquired URL.
fn admit(shared: &Arc<FetchShared>, worker_id: usize, info: UrlInfo, in_flight: &mut JoinSet<FetchEvent>) {
    let Ok(url) = Url::parse(&info.url) else {
        return;
    };
    let Some(host_str) = url.host_str() else {
        return;
    };
    let host = normalize_host(host_str);

    if shared.blacklist.is_blacklisted(&host) {
        return;
    }

    match shared.robots.check(&host, url.path(), &info) {
        RobotsDecision::Disallowed => {}
        RobotsDecision::DeferredFetchStarted => {
            if shared.robots_fetch_claimed.insert(host.clone(), ()).is_none() {
                spawn_robots_fetch(shared, host, in_flight);
            }
        }
        RobotsDecision::Allowed => {
            if !shared.rate_limiter.can_request_now(&host) {
                if !shared.domain_queue.try_queue_for_host(&host, info.clone()) {
                    let _ = shared.frontier.enqueue(info);
                }
                return;
            }
            shared.rate_limiter.record_request(&host);
            spawn_page_fetch(shared, worker_id, info, host, 0, in_flight);
        }
    }
}

fn spawn_robots_fetch(shared: &Arc<FetchShared>, host: String, in_flight: &mut JoinSet<FetchEvent>) {
    let client = shared.client.clone();
    let in_flight_total = Arc::clone(&shared.in_flight_total);
    in_flight_total.fetch_add(1, Ordering::Relaxed);
    let robots_url = format!("https://{host}/robots.txt");

    in_flight.spawn(async move {
        let result = match client.get(&robots_url).timeout(TOTAL_TIMEOUT).send().await {
            Ok(resp) => {
                let status = resp.status().as_u16();
                match resp.text().await {
                    Ok(body) => RobotsResult::Success { body, status },
                    Err(_) => RobotsResult::Failure,
                }
            }
            Err(_) => RobotsResult::Failure,
        };
        in_flight_total.fetch_sub(1, Ordering::Relaxed);
        FetchEvent::Robots { host, result }
    });
}

fn spawn_page_fetch(
    shared: &Arc<FetchShared>,
    _worker_id: usize,
    info: UrlInfo,
    host: String,
    retry_count: u8,
    in_flight: &mut JoinSet<FetchEvent>,
) {
    let client = shared.client.clone();
    let url = info.url.clone();
    let conditional = shared.conditional_get.get(&url);
    let in_flight_total = Arc::clone(&shared.in_flight_total);
    in_flight_total.fetch_add(1, Ordering::Relaxed);

    in_flight.spawn(async move {
        let mut builder = client.get(&url).timeout(TOTAL_TIMEOUT);
        if let Some(cond) = &conditional {
            if let Some(etag) = &cond.etag {
                builder = builder.header(reqwest::header::IF_NONE_MATCH, etag.as_str());
            }
            if let Some(last_modified) = &cond.last_modified {
                builder = builder.header(reqwest::header::IF_MODIFIED_SINCE, last_modified.as_str());
            }
        }

        let result = match builder.send().await {
            Ok(resp) => {
                let status = resp.status();
                let etag = resp
                    .headers()
                    .get(reqwest::header::ETAG)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                let last_modified = resp
                    .headers()
                    .get(reqwest::header::LAST_MODIFIED)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                let body = if status == StatusCode::OK {
                    resp.text().await.ok()
                } else {
                    None
                };
                PageResult::Success {
                    status: status.as_u16(),
                    body,
                    etag,
                    last_modified,
                }
            }
            Err(err) => {
                if retry_count == 0 && url.starts_with("https://") && looks_like_tls_error(&err) {
                    PageResult::TlsFailure
                } else {
                    PageResult::Transport
                }
            }
        };
        in_flight_total.fetch_sub(1, Ordering::Relaxed);
        FetchEvent::Page { info, host, retry_count, result }
    });
}

fn looks_like_tls_error(err: &reqwest::Error) -> bool {
    let text = err.to_string().to_ascii_lowercase();
    err.is_connect() && (text.contains("ssl") || text.contains("tls") || text.contains("certificate"))
}

fn handle_completion(shared: &Arc<FetchShared>, worker_id: usize, event: FetchEvent, in_flight: &mut JoinSet<FetchEvent>) {
    match event {
        FetchEvent::Robots { host, result } => {
            let replay = match result {
                RobotsResult::Success { body, status } => shared.robots.update_cache(&host, &body, status),
                RobotsResult::Failure => shared.robots.mark_unreachable(&host),
            };
            shared.robots_fetch_claimed.remove(&host);
            if let Some(delay) = shared.robots.crawl_delay(&host) {
                shared.rate_limiter.set_crawl_delay(&host, delay);
            }
            if let Some(sitemap_parser) = &shared.sitemap_parser {
                for sitemap_url in shared.robots.sitemaps_for(&host) {
                    sitemap_parser.discover(sitemap_url);
                }
            }
            for info in replay {
                spill_if_local_full(shared, worker_id, info);
            }
        }
        FetchEvent::Page { info, host, retry_count, result } => {
            handle_page_result(shared, worker_id, info, host, retry_count, result, in_flight);
        }
    }
}

fn spill_if_local_full(shared: &Arc<FetchShared>, worker_id: usize, info: UrlInfo) {
    if shared.work_queues.push_local(worker_id, info.clone()) {
        return;
    }
    if shared.is_regular {
        if let Some(disk_queue) = &shared.disk_queue {
            let _ = disk_queue.enqueue(&[info.url]);
        }
    }
    // FRESH mode: work-stealing queue full means the URL is dropped, per
    // the failure-semantics table.
}

fn handle_page_result(
    shared: &Arc<FetchShared>,
    worker_id: usize,
    info: UrlInfo,
    host: String,
    retry_count: u8,
    result: PageResult,
    in_flight: &mut JoinSet<FetchEvent>,
) {
    match result {
        PageResult::TlsFailure => {
            let fallback_url = info.url.replacen("https://", "http://", 1);
            let fallback_info = UrlInfo::new(fallback_url, info.priority, info.depth, info.referring_host.clone());
            spawn_page_fetch(shared, worker_id, fallback_info, host, 1, in_flight);
        }
        PageResult::Transport => {
            shared.rate_limiter.record_failure(&host);
            if shared.error_tracker.record_error(&host) {
                shared.blacklist.add_temporary(&host);
            }
            debug!(url = %info.url, retry_count, "transport error, dropping url");
        }
        PageResult::Success { status, body, etag, last_modified } => {
            shared.rate_limiter.record_success(&host);
            shared.error_tracker.record_success(&host);

            match status {
                304 => {}
                429 | 503 => {
                    let _ = shared.metadata.record_temporary_failure(&info.url);
                    shared.rate_limiter.throttle(&host, RATE_LIMIT_THROTTLE);
                }
                200 => {
                    if etag.is_some() || last_modified.is_some() {
                        shared.conditional_get.update(&info.url, etag, last_modified);
                    }
                    if let Some(body) = body.filter(|b| !b.is_empty()) {
                        let hash = content_hash(&body);
                        let meta = shared.metadata.update_after_crawl(&info.url, &hash);
                        if meta.is_err() {
                            warn!(url = %info.url, "metadata store update failed");
                            return;
                        }
                        if quick_quality_check(&body) {
                            shared.fetched_count.fetch_add(1, Ordering::Relaxed);
                            let task = HtmlTask {
                                html_body: body,
                                url: info.url.clone(),
                                host: host.clone(),
                                depth: info.depth,
                                fetch_start_time: std::time::Instant::now(),
                                http_status: status,
                            };
                            if shared.html_tx.try_send(task).is_err() {
                                shared.html_queue_dropped.fetch_add(1, Ordering::Relaxed);
                            }
                        }
                    }
                }
                400..=499 => {
                    debug!(url = %info.url, status, "client error, dropping url");
                }
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_info_from_disk_reconstitutes_host() {
        let info = url_info_from_disk("https://example.com/a").unwrap();
        assert_eq!(info.referring_host, "example.com");
        assert_eq!(info.depth, 0);
    }

    #[test]
    fn url_info_from_disk_rejects_garbage() {
        assert!(url_info_from_disk("not a url").is_none());
    }

    #[test]
    fn tls_error_detection_is_conservative() {
        // Can't easily construct a reqwest::Error by hand outside the crate;
        // this just documents the heuristic's text-matching shape via the
        // string contains checks it relies on.
        let sample = "tls handshake eof";
        assert!(sample.contains("tls"));
    }
}
