//! Per-worker local deques, stealable across workers.
//!
//! Built on `crossbeam_deque`: each fetch worker owns a `Worker<UrlInfo>`
//! (LIFO on its own end, which is what `push_local`/`pop_local` use for
//! cache locality) and publishes a `Stealer<UrlInfo>` into the shared
//! registry so idle workers can steal from the *other* end — FIFO from the
//! thief's point of view, exactly as the design specifies. Capacity is
//! soft-bounded at 500 per worker via an explicit counter, since the
//! underlying deque itself has no fixed capacity.

use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_deque::{Steal, Stealer, Worker as CbWorker};
use rand::seq::SliceRandom;

use crate::types::UrlInfo;

const DEFAULT_CAPACITY: usize = 500;

struct WorkerSlot {
    worker: CbWorker<UrlInfo>,
    stealer: Stealer<UrlInfo>,
    len: AtomicUsize,
    capacity: usize,
}

pub struct WorkStealingQueues {
    slots: Vec<WorkerSlot>,
}

impl WorkStealingQueues {
    pub fn new(worker_count: usize) -> Self {
        Self::with_capacity(worker_count, DEFAULT_CAPACITY)
    }

    pub fn with_capacity(worker_count: usize, capacity: usize) -> Self {
        let slots = (0..worker_count)
            .map(|_| {
                let worker = CbWorker::new_lifo();
                let stealer = worker.stealer();
                WorkerSlot { worker, stealer, len: AtomicUsize::new(0), capacity }
            })
            .collect();
        Self { slots }
    }

    pub fn worker_count(&self) -> usize {
        self.slots.len()
    }

    /// Pushes to the back of `worker_id`'s deque; fails if that worker's
    /// soft capacity is already reached.
    pub fn push_local(&self, worker_id: usize, url: UrlInfo) -> bool {
        let slot = &self.slots[worker_id];
        if slot.len.load(Ordering::Relaxed) >= slot.capacity {
            return false;
        }
        slot.worker.push(url);
        slot.len.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Pops from `worker_id`'s own end (LIFO, maximizing cache locality
    /// for the worker that just discovered these links).
    pub fn pop_local(&self, worker_id: usize) -> Option<UrlInfo> {
        let slot = &self.slots[worker_id];
        let popped = slot.worker.pop();
        if popped.is_some() {
            slot.len.fetch_sub(1, Ordering::Relaxed);
        }
        popped
    }

    /// Pops from the front of some other worker's deque, chosen
    /// pseudo-randomly, preserving FIFO order for stolen items.
    pub fn try_steal(&self, thief_id: usize) -> Option<UrlInfo> {
        let mut order: Vec<usize> = (0..self.slots.len()).filter(|&i| i != thief_id).collect();
        order.shuffle(&mut rand::thread_rng());

        for victim in order {
            loop {
                match self.slots[victim].stealer.steal() {
                    Steal::Success(url) => {
                        self.slots[victim].len.fetch_sub(1, Ordering::Relaxed);
                        return Some(url);
                    }
                    Steal::Retry => continue,
                    Steal::Empty => break,
                }
            }
        }
        None
    }

    pub fn len(&self, worker_id: usize) -> usize {
        self.slots[worker_id].len.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self, worker_id: usize) -> bool {
        self.len(worker_id) == 0
    }

    pub fn total_len(&self) -> usize {
        self.slots.iter().map(|s| s.len.load(Ordering::Relaxed)).sum()
    }

    pub fn capacity(&self, worker_id: usize) -> usize {
        self.slots[worker_id].capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_then_pop_local_round_trips() {
        let q = WorkStealingQueues::new(2);
        assert!(q.push_local(0, UrlInfo::new("http://a", 1.0, 0, "a")));
        let popped = q.pop_local(0).unwrap();
        assert_eq!(popped.url, "http://a");
    }

    #[test]
    fn capacity_is_enforced() {
        let q = WorkStealingQueues::with_capacity(1, 2);
        assert!(q.push_local(0, UrlInfo::new("http://a", 1.0, 0, "a")));
        assert!(q.push_local(0, UrlInfo::new("http://b", 1.0, 0, "a")));
        assert!(!q.push_local(0, UrlInfo::new("http://c", 1.0, 0, "a")));
    }

    #[test]
    fn stealing_takes_from_other_workers() {
        let q = WorkStealingQueues::new(2);
        q.push_local(1, UrlInfo::new("http://a", 1.0, 0, "a"));
        let stolen = q.try_steal(0).unwrap();
        assert_eq!(stolen.url, "http://a");
        assert_eq!(q.len(1), 0);
    }

    #[test]
    fn steal_returns_none_when_everyone_empty() {
        let q = WorkStealingQueues::new(3);
        assert!(q.try_steal(0).is_none());
    }
}
