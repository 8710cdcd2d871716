//! Feed Poller: periodic RSS/Atom ingestion.
//!
//! One dedicated task cycles through every configured feed, always waking
//! for whichever feed is due soonest. A feed's `poll_interval` doubles (up
//! to one hour) on fetch/parse failure and the feed is disabled — but kept,
//! never removed — after 5 consecutive failures, per the design's retained-
//! not-removed policy.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Client;
use tracing::{debug, warn};

use crate::config::FeedConfig;
use crate::frontier::SmartFrontier;
use crate::shutdown::ShutdownSignal;
use crate::types::UrlInfo;
use crate::workstealing::WorkStealingQueues;

const MAX_CONSECUTIVE_FAILURES: u32 = 5;
const MAX_BACKOFF_MINUTES: u64 = 60;
const FEED_PRIORITY: f64 = 0.8;
const FETCH_TIMEOUT: Duration = Duration::from_secs(10);
const MIN_SLEEP_WHEN_IDLE: Duration = Duration::from_secs(30);

struct FeedEntry {
    link: String,
    published_at: DateTime<Utc>,
}

struct FeedState {
    config: FeedConfig,
    current_interval_minutes: u64,
    consecutive_failure_count: u32,
    disabled: bool,
    next_due: DateTime<Utc>,
}

pub struct FeedPollerShared {
    pub is_regular: bool,
    pub client: Client,
    pub frontier: Arc<SmartFrontier>,
    pub work_queues: Arc<WorkStealingQueues>,
    pub shutdown: Arc<ShutdownSignal>,
}

/// Runs the feed poller loop until shutdown is triggered. Consumes the
/// initial config list once at startup; there is no hot-reload.
pub async fn run(shared: Arc<FeedPollerShared>, configs: Vec<FeedConfig>) {
    let mut feeds: Vec<FeedState> = configs
        .into_iter()
        .map(|config| FeedState {
            current_interval_minutes: config.poll_interval_minutes.max(1),
            config,
            consecutive_failure_count: 0,
            disabled: false,
            next_due: Utc::now(),
        })
        .collect();

    if feeds.is_empty() {
        return;
    }

    loop {
        if shared.shutdown.is_stopped() {
            return;
        }

        let sleep_for = next_sleep_duration(&feeds);
        tokio::select! {
            _ = shared.shutdown.wait() => return,
            _ = tokio::time::sleep(sleep_for) => {}
        }

        if shared.shutdown.is_stopped() {
            return;
        }

        let now = Utc::now();
        for feed in feeds.iter_mut().filter(|f| !f.disabled && f.next_due <= now) {
            poll_one(&shared, feed).await;
        }
    }
}

fn next_sleep_duration(feeds: &[FeedState]) -> Duration {
    let now = Utc::now();
    let earliest = feeds
        .iter()
        .filter(|f| !f.disabled)
        .map(|f| f.next_due)
        .min();

    match earliest {
        Some(due) if due > now => (due - now).to_std().unwrap_or(MIN_SLEEP_WHEN_IDLE),
        Some(_) => Duration::from_millis(0),
        None => MIN_SLEEP_WHEN_IDLE,
    }
}

async fn poll_one(shared: &Arc<FeedPollerShared>, feed: &mut FeedState) {
    let max_age = if shared.is_regular {
        chrono::Duration::hours(24)
    } else {
        chrono::Duration::hours(48)
    };

    match fetch_and_parse(&shared.client, &feed.config.url).await {
        Ok(entries) => {
            feed.consecutive_failure_count = 0;
            feed.current_interval_minutes = feed.config.poll_interval_minutes.max(1);
            feed.next_due = Utc::now() + chrono::Duration::minutes(feed.current_interval_minutes as i64);

            let now = Utc::now();
            let fresh: Vec<&FeedEntry> = entries.iter().filter(|e| now - e.published_at <= max_age).collect();
            debug!(feed = %feed.config.url, fresh = fresh.len(), total = entries.len(), "feed polled");

            for entry in fresh {
                inject(shared, &entry.link);
            }
        }
        Err(err) => {
            feed.consecutive_failure_count += 1;
            feed.current_interval_minutes = (feed.current_interval_minutes * 2).min(MAX_BACKOFF_MINUTES);
            feed.next_due = Utc::now() + chrono::Duration::minutes(feed.current_interval_minutes as i64);
            if feed.consecutive_failure_count >= MAX_CONSECUTIVE_FAILURES {
                feed.disabled = true;
            }
            warn!(feed = %feed.config.url, error = %err, failures = feed.consecutive_failure_count, "feed poll failed");
        }
    }
}

fn inject(shared: &Arc<FeedPollerShared>, link: &str) {
    let host = host_of(link);
    let info = UrlInfo::new(link.to_string(), FEED_PRIORITY, 0, host);

    if shared.is_regular {
        let _ = shared.frontier.enqueue(info);
    } else {
        let worker_count = shared.work_queues.worker_count().max(1);
        let mut hasher = DefaultHasher::new();
        link.hash(&mut hasher);
        let worker_id = (hasher.finish() as usize) % worker_count;
        let _ = shared.work_queues.push_local(worker_id, info);
    }
}

async fn fetch_and_parse(client: &Client, feed_url: &str) -> Result<Vec<FeedEntry>, String> {
    let body = client
        .get(feed_url)
        .timeout(FETCH_TIMEOUT)
        .send()
        .await
        .map_err(|e| e.to_string())?
        .bytes()
        .await
        .map_err(|e| e.to_string())?;

    if let Ok(channel) = rss::Channel::read_from(&body[..]) {
        return Ok(channel
            .items()
            .iter()
            .filter_map(|item| {
                let link = item.link()?.to_string();
                let published_at = item
                    .pub_date()
                    .and_then(|d| DateTime::parse_from_rfc2822(d).ok())
                    .map(|d| d.with_timezone(&Utc))
                    .unwrap_or_else(Utc::now);
                Some(FeedEntry { link, published_at })
            })
            .collect());
    }

    if let Ok(feed) = atom_syndication::Feed::read_from(&body[..]) {
        return Ok(feed
            .entries()
            .iter()
            .filter_map(|entry| {
                let link = entry.links().first()?.href().to_string();
                let published_at = entry
                    .published()
                    .map(|d| d.with_timezone(&Utc))
                    .unwrap_or_else(|| entry.updated().with_timezone(&Utc));
                Some(FeedEntry { link, published_at })
            })
            .collect());
    }

    Err(format!("could not parse {feed_url} as RSS or Atom"))
}

fn host_of(raw: &str) -> String {
    url::Url::parse(raw)
        .ok()
        .and_then(|u| u.host_str().map(crate::types::normalize_host))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_state(interval: u64) -> FeedState {
        FeedState {
            config: FeedConfig { url: "http://test/feed".into(), priority: 5, poll_interval_minutes: interval },
            current_interval_minutes: interval,
            consecutive_failure_count: 0,
            disabled: false,
            next_due: Utc::now(),
        }
    }

    #[test]
    fn sleep_duration_is_zero_when_a_feed_is_already_due() {
        let feeds = vec![feed_state(10)];
        assert_eq!(next_sleep_duration(&feeds), Duration::from_millis(0));
    }

    #[test]
    fn sleep_duration_falls_back_when_all_disabled() {
        let mut f = feed_state(10);
        f.disabled = true;
        assert_eq!(next_sleep_duration(&[f]), MIN_SLEEP_WHEN_IDLE);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let mut feed = feed_state(10);
        feed.current_interval_minutes = (feed.current_interval_minutes * 2).min(MAX_BACKOFF_MINUTES);
        assert_eq!(feed.current_interval_minutes, 20);
        feed.current_interval_minutes = 50;
        feed.current_interval_minutes = (feed.current_interval_minutes * 2).min(MAX_BACKOFF_MINUTES);
        assert_eq!(feed.current_interval_minutes, 60);
    }

    #[test]
    fn disables_after_max_consecutive_failures() {
        let mut feed = feed_state(10);
        for _ in 0..MAX_CONSECUTIVE_FAILURES {
            feed.consecutive_failure_count += 1;
        }
        if feed.consecutive_failure_count >= MAX_CONSECUTIVE_FAILURES {
            feed.disabled = true;
        }
        assert!(feed.disabled);
    }

    #[test]
    fn host_of_extracts_normalized_host() {
        assert_eq!(host_of("https://WWW.Example.com/a"), "example.com");
        assert_eq!(host_of("not a url"), "");
    }
}
