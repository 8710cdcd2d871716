//! Durable overflow queue for URLs, used only in REGULAR mode when the
//! in-memory frontier and a worker's local deque are both full.
//!
//! Sixteen shards, each an append-only newline-delimited file plus an
//! in-memory length counter, so that writers partitioned by `hash(url) %
//! 16` never contend with each other. `dequeue` is the "simplest correct
//! implementation" the design explicitly sanctions: read a shard fully,
//! take what's needed, rewrite the remainder.

use std::collections::hash_map::DefaultHasher;
use std::fs::{self, OpenOptions};
use std::hash::{Hash, Hasher};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::error::CoreResult;

const SHARD_COUNT: usize = 16;

struct Shard {
    path: PathBuf,
    lock: Mutex<()>,
    len: AtomicUsize,
}

pub struct ShardedDiskQueue {
    shards: Vec<Shard>,
}

impl ShardedDiskQueue {
    pub fn open(dir: impl AsRef<Path>) -> CoreResult<Self> {
        let dir = dir.as_ref().join("diskqueue");
        fs::create_dir_all(&dir)?;

        let mut shards = Vec::with_capacity(SHARD_COUNT);
        for i in 0..SHARD_COUNT {
            let path = dir.join(format!("shard_{i}"));
            let len = count_lines(&path)?;
            shards.push(Shard { path, lock: Mutex::new(()), len: AtomicUsize::new(len) });
        }
        Ok(Self { shards })
    }

    fn shard_index(url: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        url.hash(&mut hasher);
        (hasher.finish() as usize) % SHARD_COUNT
    }

    pub fn enqueue(&self, urls: &[String]) -> CoreResult<()> {
        let mut by_shard: Vec<Vec<&str>> = vec![Vec::new(); SHARD_COUNT];
        for url in urls {
            by_shard[Self::shard_index(url)].push(url.as_str());
        }

        for (idx, batch) in by_shard.into_iter().enumerate() {
            if batch.is_empty() {
                continue;
            }
            let shard = &self.shards[idx];
            let _guard = shard.lock.lock();
            let mut file = OpenOptions::new().create(true).append(true).open(&shard.path)?;
            for url in &batch {
                writeln!(file, "{url}")?;
            }
            shard.len.fetch_add(batch.len(), Ordering::Relaxed);
        }
        Ok(())
    }

    /// Reads up to `max_count` URLs total, round-robining across shards,
    /// rewriting each consumed shard's file with whatever remained.
    pub fn dequeue(&self, max_count: usize) -> CoreResult<Vec<String>> {
        let mut out = Vec::new();

        for shard in &self.shards {
            if out.len() >= max_count {
                break;
            }
            let _guard = shard.lock.lock();
            if !shard.path.exists() {
                continue;
            }
            let contents = fs::read_to_string(&shard.path)?;
            let mut lines: Vec<String> = contents.lines().map(str::to_string).collect();
            if lines.is_empty() {
                continue;
            }

            let take = (max_count - out.len()).min(lines.len());
            let remainder: Vec<String> = lines.split_off(take);
            out.extend(lines);

            if remainder.is_empty() {
                fs::remove_file(&shard.path)?;
            } else {
                fs::write(&shard.path, remainder.join("\n") + "\n")?;
            }
            shard.len.store(remainder.len(), Ordering::Relaxed);
        }

        Ok(out)
    }

    pub fn total_size(&self) -> usize {
        self.shards.iter().map(|s| s.len.load(Ordering::Relaxed)).sum()
    }

    /// Closes and deletes any shard file that is currently empty. Safe to
    /// call periodically; concurrent enqueues just recreate the file.
    pub fn housekeep(&self) -> CoreResult<()> {
        for shard in &self.shards {
            let _guard = shard.lock.lock();
            if shard.len.load(Ordering::Relaxed) == 0 && shard.path.exists() {
                fs::remove_file(&shard.path)?;
            }
        }
        Ok(())
    }
}

fn count_lines(path: &Path) -> CoreResult<usize> {
    if !path.exists() {
        return Ok(0);
    }
    Ok(fs::read_to_string(path)?.lines().count())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_urls() {
        let dir = tempfile::tempdir().unwrap();
        let q = ShardedDiskQueue::open(dir.path()).unwrap();
        let urls: Vec<String> = (0..40).map(|i| format!("http://test/{i}")).collect();
        q.enqueue(&urls).unwrap();
        assert_eq!(q.total_size(), 40);

        let mut drained = Vec::new();
        loop {
            let batch = q.dequeue(7).unwrap();
            if batch.is_empty() {
                break;
            }
            drained.extend(batch);
        }
        drained.sort();
        let mut expected = urls.clone();
        expected.sort();
        assert_eq!(drained, expected);
        assert_eq!(q.total_size(), 0);
    }

    #[test]
    fn housekeeping_removes_empty_shards() {
        let dir = tempfile::tempdir().unwrap();
        let q = ShardedDiskQueue::open(dir.path()).unwrap();
        q.enqueue(&["http://test/only".to_string()]).unwrap();
        let _ = q.dequeue(10).unwrap();
        q.housekeep().unwrap();
        assert_eq!(q.total_size(), 0);
    }
}
