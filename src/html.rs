//! HTML worker: language filtering, enriched-record construction, and (in
//! REGULAR mode) link extraction hand-off to the frontier.
//!
//! The language filter is deliberately cheap and declared as a filter
//! contract rather than an algorithm, per the design's non-goals: a curated
//! TLD allow-list, the document's `lang` attribute, a non-Latin Unicode-
//! range scan, and a sampled English-stopword ratio. Any implementation
//! that agrees on ALLOWED/REJECTED for clearly-English and clearly-foreign
//! pages satisfies the contract.

use scraper::{Html, Selector};

use crate::types::{EnrichedRecord, HtmlTask, UrlMetadata};

const ENGLISH_TLDS: &[&str] = &["com", "org", "net", "edu", "gov", "co.uk", "us", "io", "ca", "au", "nz"];

const STOPWORDS: &[&str] = &[
    "the", "and", "of", "to", "in", "is", "that", "for", "on", "with", "as", "was", "at", "by",
    "this", "an", "be", "are", "it", "from",
];

const SAMPLE_CHARS: usize = 2000;
const MIN_STOPWORD_RATIO: f64 = 0.02;

/// Quick English-content filter. Not a language detector in the
/// statistical-model sense — a layered set of cheap heuristics that is
/// cheap enough to run on every fetched page.
pub fn looks_english(html: &str, host: &str) -> bool {
    if let Some(lang) = document_lang(html) {
        let lang = lang.to_ascii_lowercase();
        if lang.starts_with("en") {
            return true;
        }
        if !lang.is_empty() && !lang.starts_with("en") {
            return false;
        }
    }

    if host_is_english_tld(host) {
        return true;
    }

    let sample: String = strip_tags(html).chars().take(SAMPLE_CHARS).collect();
    if has_heavy_non_latin(&sample) {
        return false;
    }

    stopword_ratio(&sample) >= MIN_STOPWORD_RATIO
}

fn document_lang(html: &str) -> Option<String> {
    let doc = Html::parse_document(html);
    let selector = Selector::parse("html[lang]").ok()?;
    doc.select(&selector).next()?.value().attr("lang").map(str::to_string)
}

fn host_is_english_tld(host: &str) -> bool {
    ENGLISH_TLDS.iter().any(|tld| host.ends_with(&format!(".{tld}")) || host == *tld)
}

fn strip_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len() / 2);
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(ch),
            _ => {}
        }
    }
    out
}

fn has_heavy_non_latin(sample: &str) -> bool {
    let mut non_latin = 0usize;
    let mut total_alpha = 0usize;
    for ch in sample.chars() {
        if ch.is_alphabetic() {
            total_alpha += 1;
            let cp = ch as u32;
            let is_latin = (0x0041..=0x024F).contains(&cp) || (0x0000..=0x007A).contains(&cp);
            if !is_latin {
                non_latin += 1;
            }
        }
    }
    total_alpha > 0 && (non_latin as f64 / total_alpha as f64) > 0.3
}

fn stopword_ratio(sample: &str) -> f64 {
    let words: Vec<String> = sample
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_ascii_lowercase())
        .filter(|w| !w.is_empty())
        .collect();
    if words.is_empty() {
        return 0.0;
    }
    let hits = words.iter().filter(|w| STOPWORDS.contains(&w.as_str())).count();
    hits as f64 / words.len() as f64
}

/// Builds the JSON-serialized output record for a successfully fetched and
/// filtered page, combining the fetch task with the metadata store's
/// current view of that URL.
pub fn build_enriched_record(task: &HtmlTask, metadata: &UrlMetadata) -> EnrichedRecord {
    EnrichedRecord {
        url: task.url.clone(),
        host: task.host.clone(),
        timestamp: chrono::Utc::now(),
        depth: task.depth,
        http_status_code: task.http_status,
        content_length: task.html_body.len(),
        content_hash: metadata.content_hash.clone(),
        last_crawl_time: metadata.last_crawl_time,
        previous_change_time: metadata.previous_change_time,
        expected_next_crawl: metadata.expected_next_crawl,
        backoff_multiplier: metadata.backoff_multiplier,
        crawl_count: metadata.crawl_count,
        change_frequency: metadata.change_frequency,
        content: task.html_body.clone(),
    }
}

/// Priority for a link discovered at `depth`, combining the base/decrement
/// rule from the design with a per-host reputation multiplier pulled from
/// domain configuration.
pub fn link_priority(depth: u32, host_multiplier: f64) -> f64 {
    let base = 1.0 - 0.15 * depth as f64;
    (base * host_multiplier).clamp(0.1, 2.0)
}

const CONTENT_HASH_SAMPLE_BYTES: usize = 8192;

/// A fixed-width hash over the "key content" of a fetched page: the title,
/// the meta description, and the first `CONTENT_HASH_SAMPLE_BYTES` of
/// stripped body text — the "stable subset" the design calls for rather
/// than hashing the whole, whitespace-noisy raw body. Always 16 lowercase
/// hex characters, satisfying the fixed-width invariant regardless of input.
pub fn content_hash(html: &str) -> String {
    let doc = Html::parse_document(html);
    let mut key_content = String::new();

    if let Ok(sel) = Selector::parse("title") {
        if let Some(title) = doc.select(&sel).next() {
            key_content.push_str(&title.text().collect::<String>());
            key_content.push('\n');
        }
    }
    if let Ok(sel) = Selector::parse(r#"meta[name="description"]"#) {
        if let Some(meta) = doc.select(&sel).next() {
            if let Some(content) = meta.value().attr("content") {
                key_content.push_str(content);
                key_content.push('\n');
            }
        }
    }

    let body_sample: String = strip_tags(html).chars().take(CONTENT_HASH_SAMPLE_BYTES).collect();
    key_content.push_str(&body_sample);

    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    key_content.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

const MIN_BODY_BYTES: usize = 500;
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;
const MIN_TEXT_CHARS: usize = 200;

/// Cheap content-quality gate run on the fetch worker before an `HtmlTask`
/// is ever built: size bounds, a minimum amount of actual text, and basic
/// HTML shape. Declared as a filter contract per the design's non-goals,
/// not a scoring algorithm.
pub fn quick_quality_check(body: &str) -> bool {
    let len = body.len();
    if len < MIN_BODY_BYTES || len > MAX_BODY_BYTES {
        return false;
    }
    let lower = body.to_ascii_lowercase();
    if !lower.contains("<html") && !lower.contains("<body") {
        return false;
    }
    strip_tags(body).chars().filter(|c| !c.is_whitespace()).count() >= MIN_TEXT_CHARS
}
