//! HTML worker loop: language filter, link extraction hand-off, and
//! archive batching.
//!
//! Quality filtering already happened on the fetch worker before a
//! [`HtmlTask`] was ever sent here (see [`crate::html::quick_quality_check`]);
//! this stage only does the work that needs the full parsed document: the
//! English-language filter, link extraction (REGULAR mode only), and
//! building the archived [`EnrichedRecord`].

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tracing::warn;
use url::Url;

use crate::frontier::SmartFrontier;
use crate::html::{build_enriched_record, link_priority, looks_english};
use crate::linkextract::extract_links;
use crate::metadata::MetadataStore;
use crate::shutdown::ShutdownSignal;
use crate::storage::ArchiveWriter;
use crate::types::{EnrichedRecord, HtmlTask, UrlInfo};

const REGULAR_BATCH_SIZE: usize = 25;

pub struct HtmlWorkerShared {
    pub is_regular: bool,
    pub frontier: Arc<SmartFrontier>,
    pub metadata: Arc<MetadataStore>,
    pub archive: Arc<ArchiveWriter>,
    pub domain_multiplier: Arc<dyn Fn(&str) -> f64 + Send + Sync>,
    pub shutdown: Arc<ShutdownSignal>,
}

/// A single HTML Processing Queue receiver shared by every HTML worker.
/// `mpsc::Receiver` only supports one consumer at a time, so the M worker
/// tasks take turns under this lock rather than each owning a private
/// channel — the lock is only ever held across the (cheap) `recv` call
/// itself, never across processing.
pub type SharedHtmlQueue = AsyncMutex<mpsc::Receiver<HtmlTask>>;

/// Runs one HTML worker until the HTML Processing Queue is drained and
/// closed (every fetch worker's sender dropped). Shutdown doesn't need a
/// separate check here: once the fetch workers observe the stop signal and
/// exit, the channel drains and closes on its own. Batches archived records
/// and flushes every [`REGULAR_BATCH_SIZE`] in REGULAR mode, or after every
/// task in FRESH mode.
pub async fn run(shared: Arc<HtmlWorkerShared>, queue: Arc<SharedHtmlQueue>) {
    let mut batch: Vec<EnrichedRecord> = Vec::with_capacity(REGULAR_BATCH_SIZE);

    loop {
        let task = {
            let mut rx = queue.lock().await;
            rx.recv().await
        };
        let Some(task) = task else { break };

        process_task(&shared, &task, &mut batch);

        let flush_threshold = if shared.is_regular { REGULAR_BATCH_SIZE } else { 1 };
        if batch.len() >= flush_threshold {
            flush_batch(&shared, &mut batch);
        }
    }

    flush_batch(&shared, &mut batch);
}

fn process_task(shared: &Arc<HtmlWorkerShared>, task: &HtmlTask, batch: &mut Vec<EnrichedRecord>) {
    if !looks_english(&task.html_body, &task.host) {
        return;
    }

    if shared.is_regular {
        if let Ok(base) = Url::parse(&task.url) {
            let multiplier = (shared.domain_multiplier)(&task.host);
            let links = extract_links(&task.html_body, &base);
            for link in links {
                let priority = link_priority(task.depth + 1, multiplier);
                let info = UrlInfo::new(link.to_string(), priority, task.depth + 1, task.host.clone());
                let _ = shared.frontier.enqueue(info);
            }
        }
    }

    match shared.metadata.get_or_create(&task.url) {
        Ok(meta) => batch.push(build_enriched_record(task, &meta)),
        Err(err) => warn!(url = %task.url, error = %err, "metadata lookup failed, dropping record"),
    }
}

fn flush_batch(shared: &Arc<HtmlWorkerShared>, batch: &mut Vec<EnrichedRecord>) {
    if batch.is_empty() {
        return;
    }
    if let Err(err) = shared.archive.flush(batch) {
        warn!(error = %err, batch_size = batch.len(), "archive flush failed, batch dropped");
    }
    batch.clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::UrlMetadata;

    fn task(url: &str, body: &str) -> HtmlTask {
        HtmlTask {
            html_body: body.to_string(),
            url: url.to_string(),
            host: "example.com".to_string(),
            depth: 0,
            fetch_start_time: std::time::Instant::now(),
            http_status: 200,
        }
    }

    fn shared(is_regular: bool) -> (Arc<HtmlWorkerShared>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let shared = Arc::new(HtmlWorkerShared {
            is_regular,
            frontier: Arc::new(SmartFrontier::new(5, 1000)),
            metadata: Arc::new(MetadataStore::open(dir.path()).unwrap()),
            archive: Arc::new(ArchiveWriter::open(dir.path()).unwrap()),
            domain_multiplier: Arc::new(|_: &str| 1.0),
            shutdown: ShutdownSignal::new(),
        });
        (shared, dir)
    }

    #[test]
    fn non_english_pages_produce_no_record() {
        let (shared, _dir) = shared(true);
        let mut batch = Vec::new();
        let html = r#"<html lang="fr"><body>bonjour le monde, ceci est un test</body></html>"#;
        process_task(&shared, &task("https://example.com/a", html), &mut batch);
        assert!(batch.is_empty());
    }

    #[test]
    fn english_page_enqueues_links_and_builds_record() {
        let (shared, _dir) = shared(true);
        let mut batch = Vec::new();
        let html = r#"<html lang="en"><body><a href="/next">next</a>some english text here</body></html>"#;
        process_task(&shared, &task("https://example.com/a", html), &mut batch);
        assert_eq!(batch.len(), 1);
        assert_eq!(shared.frontier.size(), 1);
    }

    #[test]
    fn fresh_mode_skips_link_extraction() {
        let (shared, _dir) = shared(false);
        let mut batch = Vec::new();
        let html = r#"<html lang="en"><body><a href="/next">next</a>some english text here</body></html>"#;
        process_task(&shared, &task("https://example.com/a", html), &mut batch);
        assert_eq!(batch.len(), 1);
        assert_eq!(shared.frontier.size(), 0);
    }

    #[test]
    fn enriched_record_carries_metadata_fields() {
        let meta = UrlMetadata::fresh();
        let t = task("https://example.com/a", "<html><body>x</body></html>");
        let rec = build_enriched_record(&t, &meta);
        assert_eq!(rec.url, "https://example.com/a");
        assert_eq!(rec.http_status_code, 200);
    }
}
