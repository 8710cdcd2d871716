//! Durable per-URL crawl history, backed by an embedded key-value store.
//!
//! `sled` gives us the "embedded key-value store" the design calls for
//! without committing to a SQL schema: one tree, keyed by URL, values
//! bincode-encoded [`UrlMetadata`]. A missing `sled::Db` at startup is
//! fatal (`CoreError::Startup`), matching the design's `StartupFailure`
//! row in the failure table.

use std::path::Path;

use chrono::{DateTime, Utc};

use crate::error::{CoreError, CoreResult};
use crate::types::UrlMetadata;

const BASE_INTERVAL_SECS: i64 = 24 * 3600;
const MAX_BACKOFF_MULTIPLIER: u32 = 64;

/// Owns the URL → [`UrlMetadata`] mapping. All mutation goes through
/// `update_after_crawl` / `record_temporary_failure`; everyone else reads
/// through `get_or_create`.
pub struct MetadataStore {
    tree: sled::Tree,
}

impl MetadataStore {
    pub fn open(data_dir: impl AsRef<Path>) -> CoreResult<Self> {
        let db = sled::open(data_dir.as_ref().join("metadata"))
            .map_err(|e| CoreError::Startup(format!("cannot open metadata store: {e}")))?;
        let tree = db
            .open_tree("url_metadata")
            .map_err(|e| CoreError::Startup(format!("cannot open metadata tree: {e}")))?;
        Ok(Self { tree })
    }

    /// Returns the existing record for `url`, or a freshly-initialized one
    /// if absent. Never fails: absence is not an error.
    pub fn get_or_create(&self, url: &str) -> CoreResult<UrlMetadata> {
        match self.tree.get(url)? {
            Some(bytes) => Ok(bincode::deserialize(&bytes)
                .map_err(|e| CoreError::ParseFailure { what: "metadata", reason: e.to_string() })?),
            None => {
                let fresh = UrlMetadata::fresh();
                self.store(url, &fresh)?;
                Ok(fresh)
            }
        }
    }

    /// HTTP 200 completion path. If `new_content_hash` matches the stored
    /// hash, doubles the backoff multiplier (capped at 64); otherwise
    /// resets backoff to 1 and records the change time. Always advances
    /// `last_crawl_time` and `expected_next_crawl`.
    pub fn update_after_crawl(&self, url: &str, new_content_hash: &str) -> CoreResult<UrlMetadata> {
        let mut meta = self.get_or_create(url)?;
        let now = Utc::now();

        if meta.content_hash == new_content_hash && !meta.content_hash.is_empty() {
            meta.backoff_multiplier = (meta.backoff_multiplier * 2).min(MAX_BACKOFF_MULTIPLIER);
        } else {
            let interval = (now - meta.last_crawl_time).num_seconds().max(1) as f64;
            meta.change_frequency = ewma(meta.change_frequency, interval, meta.crawl_count);
            meta.previous_change_time = meta.last_crawl_time;
            meta.backoff_multiplier = 1;
            meta.content_hash = new_content_hash.to_string();
        }

        meta.crawl_count += 1;
        meta.last_crawl_time = now;
        meta.expected_next_crawl = next_crawl_time(now, meta.backoff_multiplier);

        self.store(url, &meta)?;
        Ok(meta)
    }

    /// HTTP 429/503 completion path: treated as "content unchanged" for
    /// backoff purposes, without touching `content_hash`.
    pub fn record_temporary_failure(&self, url: &str) -> CoreResult<UrlMetadata> {
        let mut meta = self.get_or_create(url)?;
        let now = Utc::now();
        meta.backoff_multiplier = (meta.backoff_multiplier * 2).min(MAX_BACKOFF_MULTIPLIER);
        meta.last_crawl_time = now;
        meta.expected_next_crawl = next_crawl_time(now, meta.backoff_multiplier);
        self.store(url, &meta)?;
        Ok(meta)
    }

    fn store(&self, url: &str, meta: &UrlMetadata) -> CoreResult<()> {
        let bytes = bincode::serialize(meta)
            .map_err(|e| CoreError::StorageWriteFailure(e.to_string()))?;
        self.tree.insert(url, bytes)?;
        Ok(())
    }

    pub fn flush(&self) -> CoreResult<()> {
        self.tree.flush()?;
        Ok(())
    }
}

fn next_crawl_time(now: DateTime<Utc>, backoff_multiplier: u32) -> DateTime<Utc> {
    now + chrono::Duration::seconds(BASE_INTERVAL_SECS * backoff_multiplier as i64)
}

/// Exponential moving average of observed inter-change intervals. The
/// first observation seeds the average directly; afterwards a fixed
/// smoothing factor blends in the new sample.
fn ewma(previous: f64, sample: f64, observation_count: u32) -> f64 {
    if observation_count == 0 || previous == 0.0 {
        return sample;
    }
    const ALPHA: f64 = 0.3;
    ALPHA * sample + (1.0 - ALPHA) * previous
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> MetadataStore {
        let dir = tempfile::tempdir().unwrap();
        MetadataStore::open(dir.path()).unwrap()
    }

    #[test]
    fn fresh_record_satisfies_invariant() {
        let s = store();
        let m = s.get_or_create("http://test/a").unwrap();
        assert!(m.expected_next_crawl >= m.last_crawl_time);
    }

    #[test]
    fn unchanged_hash_doubles_backoff_each_time() {
        let s = store();
        s.get_or_create("http://test/p").unwrap();
        let m1 = s.update_after_crawl("http://test/p", "H").unwrap();
        let m2 = s.update_after_crawl("http://test/p", "H").unwrap();
        let m3 = s.update_after_crawl("http://test/p", "H").unwrap();
        assert_eq!(m1.backoff_multiplier, 1);
        assert_eq!(m2.backoff_multiplier, 2);
        assert_eq!(m3.backoff_multiplier, 4);
        assert!(m3.expected_next_crawl > m2.expected_next_crawl);
    }

    #[test]
    fn changed_hash_resets_backoff() {
        let s = store();
        s.update_after_crawl("http://test/p", "H1").unwrap();
        s.update_after_crawl("http://test/p", "H1").unwrap();
        let before = s.get_or_create("http://test/p").unwrap();
        let after = s.update_after_crawl("http://test/p", "H2").unwrap();
        assert_eq!(after.backoff_multiplier, 1);
        assert_eq!(after.previous_change_time, before.last_crawl_time);
    }

    #[test]
    fn backoff_caps_at_64() {
        let s = store();
        s.get_or_create("http://test/p").unwrap();
        let mut last = s.update_after_crawl("http://test/p", "H").unwrap();
        for _ in 0..8 {
            last = s.update_after_crawl("http://test/p", "H").unwrap();
        }
        assert_eq!(last.backoff_multiplier, 64);
        let again = s.update_after_crawl("http://test/p", "H").unwrap();
        assert_eq!(again.backoff_multiplier, 64);
    }

    #[test]
    fn temporary_failure_does_not_touch_hash() {
        let s = store();
        s.update_after_crawl("http://test/p", "H").unwrap();
        let after = s.record_temporary_failure("http://test/p").unwrap();
        assert_eq!(after.content_hash, "H");
        assert_eq!(after.backoff_multiplier, 2);
    }
}
