//! `crawlcore`: a polite, high-throughput web crawler core.
//!
//! The crate is organized leaf-first: durable stores ([`metadata`],
//! [`robots`]), the rate limiter, the four URL queues
//! ([`frontier`], [`workstealing`], [`domainqueue`], [`diskqueue`]), the
//! fetch and HTML worker pipelines, the discovery background tasks
//! ([`feed`], [`sitemap`]), and finally [`supervisor`], which observes all of
//! the above. [`CrawlEngine`] wires these together in the fixed
//! initialization order the design calls for: metadata store, robots cache,
//! rate limiter, queues, connection pool, workers, supervisor.

pub mod blacklist;
pub mod cli;
pub mod conditional_get;
pub mod config;
pub mod deferred;
pub mod diskqueue;
pub mod domainqueue;
pub mod error;
pub mod error_tracker;
pub mod feed;
pub mod fetch;
pub mod frontier;
pub mod html;
pub mod htmlworker;
pub mod linkextract;
pub mod metadata;
pub mod ratelimit;
pub mod robots;
pub mod shutdown;
pub mod sitemap;
pub mod storage;
pub mod supervisor;
pub mod types;
pub mod workstealing;

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use reqwest::redirect::Policy;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tracing::{info, warn};

pub use error::{CoreError, CoreResult};

use blacklist::DomainBlacklist;
use cli::Cli;
use conditional_get::ConditionalGetCache;
use config::CrawlConfig;
use diskqueue::ShardedDiskQueue;
use domainqueue::DomainQueueManager;
use error_tracker::ErrorTracker;
use fetch::FetchShared;
use frontier::SmartFrontier;
use htmlworker::HtmlWorkerShared;
use metadata::MetadataStore;
use ratelimit::RateLimiter;
use robots::RobotsGatekeeper;
use shutdown::ShutdownSignal;
use sitemap::{SitemapParser, SitemapShared};
use storage::ArchiveWriter;
use types::UrlInfo;
use workstealing::WorkStealingQueues;

const HTML_QUEUE_CAPACITY: usize = 10_000;
/// FRESH mode runs a fixed small fetch-worker count rather than deriving it
/// from `--max-threads`, per the design's component table.
const FRESH_FETCH_WORKERS: usize = 4;

/// Every durable/shared component the crawl pipeline needs, plus the
/// fetch/HTML worker counts and runtime knobs resolved from the CLI. Built
/// once by [`CrawlEngine::init`] in the fixed order §9 of the design
/// mandates, then handed by `Arc` to every worker task `run` spawns.
pub struct CrawlEngine {
    is_regular: bool,
    metadata: Arc<MetadataStore>,
    robots: Arc<RobotsGatekeeper>,
    rate_limiter: Arc<RateLimiter>,
    frontier: Arc<SmartFrontier>,
    work_queues: Arc<WorkStealingQueues>,
    domain_queue: Arc<DomainQueueManager>,
    disk_queue: Option<Arc<ShardedDiskQueue>>,
    conditional_get: Arc<ConditionalGetCache>,
    blacklist: Arc<DomainBlacklist>,
    error_tracker: Arc<ErrorTracker>,
    archive: Arc<ArchiveWriter>,
    client: reqwest::Client,
    config: CrawlConfig,
    sitemap_parser: Option<Arc<SitemapParser>>,
    shutdown: Arc<ShutdownSignal>,
    fetch_worker_count: usize,
    html_worker_count: usize,
    max_runtime: Option<Duration>,
}

impl CrawlEngine {
    /// Initializes every durable/shared component in the order the design
    /// fixes in §9: metadata store, robots cache, rate limiter, queues,
    /// connection pool. A `sled` store that fails to open here is a fatal
    /// `CoreError::Startup`, matching the `StartupFailure` row of the
    /// failure-semantics table.
    pub fn init(cli: &Cli) -> CoreResult<Self> {
        let is_regular = cli.mode.is_regular();
        let config = CrawlConfig::load(&cli.config_dir)?;

        let metadata = Arc::new(MetadataStore::open(&cli.data_dir)?);
        let robots = Arc::new(RobotsGatekeeper::open(&cli.data_dir, fetch::USER_AGENT)?);
        let rate_limiter = Arc::new(RateLimiter::new());

        let fetch_worker_count = if is_regular { cli.resolved_max_threads() } else { FRESH_FETCH_WORKERS };
        let html_worker_count = if is_regular { (fetch_worker_count / 3).max(1) } else { 2 };

        let frontier = Arc::new(SmartFrontier::new(cli.resolved_max_depth(), cli.resolved_max_queue_size()));
        let work_queues = Arc::new(WorkStealingQueues::new(fetch_worker_count));
        let domain_queue = Arc::new(DomainQueueManager::new());
        let disk_queue = if is_regular {
            Some(Arc::new(ShardedDiskQueue::open(&cli.data_dir)?))
        } else {
            None
        };

        let conditional_get = Arc::new(ConditionalGetCache::new());
        let blacklist = Arc::new(DomainBlacklist::new(std::iter::empty()));
        let error_tracker = Arc::new(ErrorTracker::default());
        let archive = Arc::new(ArchiveWriter::open(&cli.data_dir)?);

        let client = reqwest::Client::builder()
            .user_agent(fetch::USER_AGENT)
            .gzip(true)
            .deflate(true)
            .connect_timeout(Duration::from_secs(4))
            .redirect(Policy::limited(fetch::MAX_REDIRECTS))
            .build()
            .map_err(|e| CoreError::Startup(format!("cannot build http client: {e}")))?;

        let sitemap_parser = if is_regular {
            Some(Arc::new(SitemapParser::new(&config.sitemaps)))
        } else {
            None
        };

        Ok(Self {
            is_regular,
            metadata,
            robots,
            rate_limiter,
            frontier,
            work_queues,
            domain_queue,
            disk_queue,
            conditional_get,
            blacklist,
            error_tracker,
            archive,
            client,
            config,
            sitemap_parser,
            shutdown: ShutdownSignal::new(),
            fetch_worker_count,
            html_worker_count,
            max_runtime: cli.resolved_max_runtime(),
        })
    }

    /// Seeds the frontier from `seeds.json` (REGULAR only — FRESH relies
    /// entirely on the Feed Poller to prime its queues).
    fn seed(&self) {
        if !self.is_regular {
            return;
        }
        for url in &self.config.seeds {
            let host = url::Url::parse(url)
                .ok()
                .and_then(|u| u.host_str().map(types::normalize_host))
                .unwrap_or_default();
            let _ = self.frontier.enqueue(UrlInfo::new(url.clone(), 1.0, 0, host));
        }
        info!(seeds = self.config.seeds.len(), "seeded frontier");
    }

    /// Spawns every worker task, waits for shutdown, then returns once the
    /// fetch/HTML pipeline has drained. Does not itself install a signal
    /// handler — callers that want SIGINT/SIGTERM handling should spawn one
    /// that calls [`ShutdownSignal::record_signal`] on `self.shutdown()`.
    pub async fn run(self) -> CoreResult<()> {
        self.seed();

        let (html_tx, html_rx) = mpsc::channel(HTML_QUEUE_CAPACITY);
        let html_queue: Arc<htmlworker::SharedHtmlQueue> = Arc::new(AsyncMutex::new(html_rx));

        let fetched_count = Arc::new(AtomicU64::new(0));
        let html_queue_dropped = Arc::new(AtomicU64::new(0));
        let in_flight_total = Arc::new(AtomicUsize::new(0));

        let fetch_shared = Arc::new(FetchShared {
            is_regular: self.is_regular,
            client: self.client.clone(),
            frontier: Arc::clone(&self.frontier),
            work_queues: Arc::clone(&self.work_queues),
            domain_queue: Arc::clone(&self.domain_queue),
            disk_queue: self.disk_queue.clone(),
            rate_limiter: Arc::clone(&self.rate_limiter),
            robots: Arc::clone(&self.robots),
            blacklist: Arc::clone(&self.blacklist),
            error_tracker: Arc::clone(&self.error_tracker),
            metadata: Arc::clone(&self.metadata),
            conditional_get: Arc::clone(&self.conditional_get),
            sitemap_parser: self.sitemap_parser.clone(),
            html_tx,
            shutdown: Arc::clone(&self.shutdown),
            robots_fetch_claimed: Arc::new(DashMap::new()),
            fetched_count: Arc::clone(&fetched_count),
            html_queue_dropped: Arc::clone(&html_queue_dropped),
            in_flight_total: Arc::clone(&in_flight_total),
        });

        let domain_configs = self.config.domain_configs.clone();
        let html_worker_shared = Arc::new(HtmlWorkerShared {
            is_regular: self.is_regular,
            frontier: Arc::clone(&self.frontier),
            metadata: Arc::clone(&self.metadata),
            archive: Arc::clone(&self.archive),
            domain_multiplier: Arc::new(move |host: &str| {
                domain_configs.get(host).map(|c| c.priority_multiplier).unwrap_or(1.0)
            }),
            shutdown: Arc::clone(&self.shutdown),
        });

        let mut handles = Vec::new();

        for worker_id in 0..self.fetch_worker_count {
            let shared = Arc::clone(&fetch_shared);
            handles.push(tokio::spawn(async move { fetch::run(shared, worker_id).await }));
        }

        for _ in 0..self.html_worker_count {
            let shared = Arc::clone(&html_worker_shared);
            let queue = Arc::clone(&html_queue);
            handles.push(tokio::spawn(async move { htmlworker::run(shared, queue).await }));
        }

        if self.is_regular {
            let feed_shared = Arc::new(feed::FeedPollerShared {
                is_regular: true,
                client: self.client.clone(),
                frontier: Arc::clone(&self.frontier),
                work_queues: Arc::clone(&self.work_queues),
                shutdown: Arc::clone(&self.shutdown),
            });
            let feeds = self.config.feeds.clone();
            handles.push(tokio::spawn(async move { feed::run(feed_shared, feeds).await }));

            if let Some(sitemap_parser) = self.sitemap_parser.clone() {
                let sitemap_shared = Arc::new(SitemapShared {
                    client: self.client.clone(),
                    frontier: Arc::clone(&self.frontier),
                    parser: sitemap_parser,
                    shutdown: Arc::clone(&self.shutdown),
                });
                handles.push(tokio::spawn(async move { sitemap::run(sitemap_shared).await }));
            }
        } else {
            let feed_shared = Arc::new(feed::FeedPollerShared {
                is_regular: false,
                client: self.client.clone(),
                frontier: Arc::clone(&self.frontier),
                work_queues: Arc::clone(&self.work_queues),
                shutdown: Arc::clone(&self.shutdown),
            });
            let feeds = self.config.feeds.clone();
            handles.push(tokio::spawn(async move { feed::run(feed_shared, feeds).await }));
        }

        let supervisor_shared = Arc::new(supervisor::SupervisorShared {
            is_regular: self.is_regular,
            frontier: Arc::clone(&self.frontier),
            disk_queue: self.disk_queue.clone(),
            work_queues: Arc::clone(&self.work_queues),
            html_tx: fetch_shared.html_tx.clone(),
            html_queue_capacity: HTML_QUEUE_CAPACITY,
            fetched_count: Arc::clone(&fetched_count),
            in_flight_total: Arc::clone(&in_flight_total),
            emergency_seeds: self.config.emergency_seeds.clone(),
            max_runtime: self.max_runtime,
            shutdown: Arc::clone(&self.shutdown),
        });
        handles.push(tokio::spawn(async move { supervisor::run(supervisor_shared).await }));

        // The engine itself doesn't block on `shutdown.wait()` here: the
        // fetch/HTML/feed/sitemap/supervisor tasks all observe the signal on
        // their own, and we simply join everything, which only resolves
        // once they've all wound down.
        for handle in handles {
            if let Err(err) = handle.await {
                warn!(error = %err, "a worker task panicked");
            }
        }

        self.metadata.flush()?;
        info!(
            fetched = fetched_count.load(Ordering::Relaxed),
            html_queue_dropped = html_queue_dropped.load(Ordering::Relaxed),
            "crawl engine shut down cleanly"
        );
        Ok(())
    }

    pub fn shutdown(&self) -> Arc<ShutdownSignal> {
        Arc::clone(&self.shutdown)
    }
}
