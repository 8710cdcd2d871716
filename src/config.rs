//! JSON configuration loading.
//!
//! Ambient to the CORE pipeline but required by any runnable binary:
//! `seeds.json`, `feeds.json`, `sitemaps.json`, `emergency_seeds.json`, and
//! `domain_configs.json`, all loaded via `serde_json` after a comment-
//! stripping pre-pass (JSON proper has no comments, but the design
//! requires tolerating `//` and `#` line comments in these files).

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::{CoreError, CoreResult};

#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    pub url: String,
    pub priority: u8,
    pub poll_interval_minutes: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SitemapConfig {
    pub url: String,
    pub priority: u8,
    pub parse_interval_hours: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmergencySeeds {
    pub emergency_seeds: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DomainConfig {
    #[serde(default = "default_multiplier")]
    pub priority_multiplier: f64,
    pub snippet_max_chars: Option<usize>,
}

fn default_multiplier() -> f64 {
    1.0
}

/// Everything loaded from the config directory at startup.
#[derive(Debug, Clone, Default)]
pub struct CrawlConfig {
    pub seeds: Vec<String>,
    pub feeds: Vec<FeedConfig>,
    pub sitemaps: Vec<SitemapConfig>,
    pub emergency_seeds: Vec<String>,
    pub domain_configs: HashMap<String, DomainConfig>,
}

impl CrawlConfig {
    /// Loads whichever of the five config files exist under `dir`. A
    /// missing file is treated as empty, not an error — only a malformed
    /// *present* file is a `CoreError::Config`.
    pub fn load(dir: impl AsRef<Path>) -> CoreResult<Self> {
        let dir = dir.as_ref();
        Ok(Self {
            seeds: load_optional(dir.join("seeds.json"))?.unwrap_or_default(),
            feeds: load_optional(dir.join("feeds.json"))?.unwrap_or_default(),
            sitemaps: load_optional(dir.join("sitemaps.json"))?.unwrap_or_default(),
            emergency_seeds: load_optional::<EmergencySeeds>(dir.join("emergency_seeds.json"))?
                .map(|e| e.emergency_seeds)
                .unwrap_or_default(),
            domain_configs: load_optional(dir.join("domain_configs.json"))?.unwrap_or_default(),
        })
    }

    pub fn domain_multiplier(&self, host: &str) -> f64 {
        self.domain_configs.get(host).map(|c| c.priority_multiplier).unwrap_or(1.0)
    }
}

fn load_optional<T: for<'de> Deserialize<'de>>(path: impl AsRef<Path>) -> CoreResult<Option<T>> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(None);
    }
    let raw = std::fs::read_to_string(path)?;
    let stripped = strip_json_comments(&raw);
    let value = serde_json::from_str(&stripped)
        .map_err(|e| CoreError::Config(format!("{}: {e}", path.display())))?;
    Ok(Some(value))
}

/// Strips `//...` and `#...` line comments, respecting double-quoted
/// string literals (including escaped quotes) so that a `#` or `//` inside
/// a URL string is never mistaken for a comment marker.
pub fn strip_json_comments(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    let mut in_string = false;
    let mut escaped = false;

    while let Some(ch) = chars.next() {
        if in_string {
            out.push(ch);
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }

        match ch {
            '"' => {
                in_string = true;
                out.push(ch);
            }
            '/' if chars.peek() == Some(&'/') => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            '#' => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            _ => out.push(ch),
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_line_comments_outside_strings() {
        let input = "{\n  // a comment\n  \"a\": 1, # another\n  \"b\": \"http://x#not-a-comment\"\n}";
        let stripped = strip_json_comments(input);
        let value: serde_json::Value = serde_json::from_str(&stripped).unwrap();
        assert_eq!(value["a"], 1);
        assert_eq!(value["b"], "http://x#not-a-comment");
    }

    #[test]
    fn missing_files_default_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = CrawlConfig::load(dir.path()).unwrap();
        assert!(cfg.seeds.is_empty());
        assert!(cfg.feeds.is_empty());
    }

    #[test]
    fn loads_seeds_with_comments() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("seeds.json"), "[\n  \"http://a\", // seed one\n  \"http://b\"\n]").unwrap();
        let cfg = CrawlConfig::load(dir.path()).unwrap();
        assert_eq!(cfg.seeds, vec!["http://a".to_string(), "http://b".to_string()]);
    }

    #[test]
    fn malformed_present_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("seeds.json"), "not json").unwrap();
        assert!(CrawlConfig::load(dir.path()).is_err());
    }
}
