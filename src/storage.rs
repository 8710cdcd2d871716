//! Raw HTML archive: batches of [`EnrichedRecord`] flushed as JSON array
//! files.
//!
//! One file per flush, named with an ISO timestamp and a monotonic batch
//! id, under `<data_dir>/archive/`. `StorageWriteFailure` retries the
//! flush once before dropping the batch and incrementing a counter, per
//! the failure-semantics table.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{CoreError, CoreResult};
use crate::types::EnrichedRecord;

pub struct ArchiveWriter {
    dir: PathBuf,
    batch_id: AtomicU64,
    dropped_batches: AtomicU64,
}

impl ArchiveWriter {
    pub fn open(data_dir: impl AsRef<Path>) -> CoreResult<Self> {
        let dir = data_dir.as_ref().join("archive");
        fs::create_dir_all(&dir)?;
        Ok(Self { dir, batch_id: AtomicU64::new(0), dropped_batches: AtomicU64::new(0) })
    }

    /// Writes `records` as a single JSON array file. Retries the write
    /// once on failure; on a second failure the batch is dropped and the
    /// drop counter is incremented, matching `StorageWriteFailure`.
    pub fn flush(&self, records: &[EnrichedRecord]) -> CoreResult<()> {
        if records.is_empty() {
            return Ok(());
        }
        let id = self.batch_id.fetch_add(1, Ordering::Relaxed);
        let timestamp = chrono::Utc::now().format("%Y%m%dT%H%M%S%.3fZ");
        let path = self.dir.join(format!("batch-{timestamp}-{id}.json"));

        let body = serde_json::to_vec(records)?;
        if fs::write(&path, &body).is_err() {
            // single retry
            if fs::write(&path, &body).is_err() {
                self.dropped_batches.fetch_add(1, Ordering::Relaxed);
                return Err(CoreError::StorageWriteFailure(format!(
                    "failed to write batch {id} after retry"
                )));
            }
        }
        Ok(())
    }

    pub fn dropped_batches(&self) -> u64 {
        self.dropped_batches.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(url: &str) -> EnrichedRecord {
        EnrichedRecord {
            url: url.to_string(),
            host: "test".to_string(),
            timestamp: Utc::now(),
            depth: 0,
            http_status_code: 200,
            content_length: 5,
            content_hash: "abc".to_string(),
            last_crawl_time: Utc::now(),
            previous_change_time: Utc::now(),
            expected_next_crawl: Utc::now(),
            backoff_multiplier: 1,
            crawl_count: 1,
            change_frequency: 0.0,
            content: "hello".to_string(),
        }
    }

    #[test]
    fn flush_writes_a_readable_json_array() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ArchiveWriter::open(dir.path()).unwrap();
        writer.flush(&[record("http://test/a"), record("http://test/b")]).unwrap();

        let entries: Vec<_> = fs::read_dir(dir.path().join("archive")).unwrap().collect();
        assert_eq!(entries.len(), 1);
        let content = fs::read_to_string(entries[0].as_ref().unwrap().path()).unwrap();
        let parsed: Vec<EnrichedRecord> = serde_json::from_str(&content).unwrap();
        assert_eq!(parsed.len(), 2);
    }

    #[test]
    fn empty_batch_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ArchiveWriter::open(dir.path()).unwrap();
        writer.flush(&[]).unwrap();
        let entries: Vec<_> = fs::read_dir(dir.path().join("archive")).unwrap().collect();
        assert!(entries.is_empty());
    }
}
