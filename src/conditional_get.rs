//! Conditional-GET validator cache.
//!
//! Kept as its own small component — mirroring the original crawler's
//! standalone `conditional_get.cpp`/`.h` pair — rather than folding ETag/
//! Last-Modified bookkeeping into the metadata store. Fetch workers
//! consult this before building a request (to attach `If-None-Match` /
//! `If-Modified-Since`) and update it after a 200 response.

use dashmap::DashMap;

#[derive(Debug, Clone, Default)]
pub struct ConditionalGetEntry {
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

#[derive(Default)]
pub struct ConditionalGetCache {
    entries: DashMap<String, ConditionalGetEntry>,
}

impl ConditionalGetCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, url: &str) -> Option<ConditionalGetEntry> {
        self.entries.get(url).map(|e| e.clone())
    }

    pub fn update(&self, url: &str, etag: Option<String>, last_modified: Option<String>) {
        if etag.is_none() && last_modified.is_none() {
            return;
        }
        self.entries.insert(url.to_string(), ConditionalGetEntry { etag, last_modified });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_validators() {
        let cache = ConditionalGetCache::new();
        assert!(cache.get("http://test/a").is_none());
        cache.update("http://test/a", Some("\"abc\"".into()), None);
        let entry = cache.get("http://test/a").unwrap();
        assert_eq!(entry.etag.as_deref(), Some("\"abc\""));
    }
}
