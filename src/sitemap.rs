//! Sitemap Parser: streaming XML ingestion of sitemap-index and urlset
//! documents.
//!
//! Mirrors the Feed Poller's pacing but keeps its own queue of sitemap URLs
//! (seeded from configuration, grown by sitemap-index children, and by
//! `robotstxt`-discovered `Sitemap:` lines) plus an in-memory, process-
//! lifetime `HashSet` for URL dedup — sitemaps are large enough, and crawled
//! rarely enough, that a durable dedup store isn't worth the complexity the
//! design doesn't ask for.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use quick_xml::events::Event;
use quick_xml::reader::Reader;
use reqwest::Client;
use tracing::{debug, warn};

use crate::config::SitemapConfig;
use crate::frontier::SmartFrontier;
use crate::shutdown::ShutdownSignal;
use crate::types::UrlInfo;

const FETCH_TIMEOUT: Duration = Duration::from_secs(15);
const DEFAULT_POLL_SECS: u64 = 6 * 3600;

struct SitemapEntry {
    url: String,
    priority: Option<f64>,
}

pub struct SitemapParser {
    queue: Mutex<VecDeque<(String, u64)>>,
    seen: Mutex<HashSet<String>>,
}

impl SitemapParser {
    pub fn new(configs: &[SitemapConfig]) -> Self {
        let queue = configs
            .iter()
            .map(|c| (c.url.clone(), c.parse_interval_hours.max(1) * 3600))
            .collect();
        Self { queue: Mutex::new(queue), seen: Mutex::new(HashSet::new()) }
    }

    /// Adds a sitemap URL discovered from a robots.txt `Sitemap:` line or a
    /// sitemap-index document, if not already queued.
    pub fn discover(&self, url: String) {
        let mut seen = self.seen.lock();
        if seen.insert(url.clone()) {
            self.queue.lock().push_back((url, DEFAULT_POLL_SECS));
        }
    }

    fn next_due(&self) -> Option<String> {
        self.queue.lock().pop_front().map(|(url, _)| url)
    }

    fn requeue(&self, url: String, interval_secs: u64) {
        self.queue.lock().push_back((url, interval_secs));
    }
}

pub struct SitemapShared {
    pub client: Client,
    pub frontier: Arc<SmartFrontier>,
    pub parser: Arc<SitemapParser>,
    pub shutdown: Arc<ShutdownSignal>,
}

/// Runs the sitemap polling loop until shutdown. Each iteration pops the
/// next queued sitemap URL, fetches and parses it, re-queues child sitemaps
/// or injects urlset entries, and sleeps briefly between iterations so a
/// long queue doesn't spin without yielding.
pub async fn run(shared: Arc<SitemapShared>) {
    loop {
        if shared.shutdown.is_stopped() {
            return;
        }

        let Some(url) = shared.parser.next_due() else {
            tokio::select! {
                _ = shared.shutdown.wait() => return,
                _ = tokio::time::sleep(Duration::from_secs(30)) => {}
            }
            continue;
        };

        process_sitemap(&shared, &url).await;

        tokio::select! {
            _ = shared.shutdown.wait() => return,
            _ = tokio::time::sleep(Duration::from_millis(200)) => {}
        }
    }
}

async fn process_sitemap(shared: &Arc<SitemapShared>, url: &str) {
    let body = match shared.client.get(url).timeout(FETCH_TIMEOUT).send().await {
        Ok(resp) => match resp.text().await {
            Ok(text) => text,
            Err(err) => {
                warn!(sitemap = %url, error = %err, "sitemap body read failed");
                shared.parser.requeue(url.to_string(), DEFAULT_POLL_SECS);
                return;
            }
        },
        Err(err) => {
            warn!(sitemap = %url, error = %err, "sitemap fetch failed");
            shared.parser.requeue(url.to_string(), DEFAULT_POLL_SECS);
            return;
        }
    };

    match parse_sitemap(&body) {
        SitemapDocument::Index(children) => {
            debug!(sitemap = %url, children = children.len(), "sitemap index parsed");
            for child in children {
                shared.parser.discover(child);
            }
        }
        SitemapDocument::UrlSet(entries) => {
            debug!(sitemap = %url, entries = entries.len(), "urlset parsed");
            for entry in entries {
                let priority = entry.priority.unwrap_or(0.5).clamp(0.1, 2.0);
                let info = UrlInfo::new(entry.url, priority, 0, String::new());
                let _ = shared.frontier.enqueue(info);
            }
            shared.parser.requeue(url.to_string(), DEFAULT_POLL_SECS);
        }
        SitemapDocument::Unrecognized => {
            warn!(sitemap = %url, "sitemap document not recognized as index or urlset");
        }
    }
}

enum SitemapDocument {
    Index(Vec<String>),
    UrlSet(Vec<SitemapEntry>),
    Unrecognized,
}

/// Single-pass streaming parse distinguishing `<sitemapindex>` from
/// `<urlset>` by the first start tag seen, per the design's streaming-parse
/// requirement for potentially large documents.
fn parse_sitemap(xml: &str) -> SitemapDocument {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text_start = true;
    reader.config_mut().trim_text_end = true;

    let mut buf = Vec::new();
    let mut is_index = None;
    let mut urls: Vec<String> = Vec::new();
    let mut priorities: Vec<Option<f64>> = Vec::new();
    let mut current_text = String::new();
    let mut in_loc = false;
    let mut in_priority = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = local_name(e.name().local_name().as_ref());
                match name.as_str() {
                    "sitemapindex" => is_index = Some(true),
                    "urlset" => is_index = Some(false),
                    "loc" => {
                        in_loc = true;
                        current_text.clear();
                    }
                    "priority" => {
                        in_priority = true;
                        current_text.clear();
                    }
                    "url" | "sitemap" => {
                        // entry boundary; nothing to do until </loc>/</priority>
                    }
                    _ => {}
                }
            }
            Ok(Event::Text(t)) => {
                if in_loc || in_priority {
                    if let Ok(text) = t.unescape() {
                        current_text.push_str(&text);
                    }
                }
            }
            Ok(Event::End(e)) => {
                let name = local_name(e.name().local_name().as_ref());
                match name.as_str() {
                    "loc" => {
                        in_loc = false;
                        urls.push(current_text.trim().to_string());
                        priorities.push(None);
                    }
                    "priority" => {
                        in_priority = false;
                        if let Some(last) = priorities.last_mut() {
                            *last = current_text.trim().parse::<f64>().ok();
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
        buf.clear();
    }

    match is_index {
        Some(true) => SitemapDocument::Index(urls),
        Some(false) => SitemapDocument::UrlSet(
            urls.into_iter()
                .zip(priorities)
                .map(|(url, priority)| SitemapEntry { url, priority })
                .collect(),
        ),
        None => SitemapDocument::Unrecognized,
    }
}

fn local_name(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).into_owned()
}
