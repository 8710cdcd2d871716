//! Process-wide cancellation.
//!
//! A single atomic `stop` flag plus a [`tokio::sync::Notify`] so that every
//! blocking wait in the system — the fetch worker's poll-and-idle loop, the
//! HTML queue's recv, the feed/sitemap pollers' sleep — wakes up promptly
//! when shutdown is triggered, matching §5's "all workers poll it on each
//! outer-loop iteration and at every blocking-wait wakeup". Grounded on the
//! flag+`Notify` shutdown shape in `crawl_events/bus/shutdown.rs` from the
//! retrieval pack, generalized from an event-bus-local signal to a
//! process-wide one.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

pub struct ShutdownSignal {
    stop: AtomicBool,
    notify: Notify,
    signal_count: AtomicU8,
}

impl ShutdownSignal {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            stop: AtomicBool::new(false),
            notify: Notify::new(),
            signal_count: AtomicU8::new(0),
        })
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Sets the stop flag and wakes every task currently in [`Self::wait`].
    /// Idempotent — safe to call more than once.
    pub fn trigger(&self) {
        self.stop.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Resolves immediately if shutdown has already been triggered;
    /// otherwise resolves the next time [`Self::trigger`] is called.
    /// Race-free: the `notified()` future is constructed and the flag is
    /// rechecked before awaiting it, so a `trigger()` landing between the
    /// first check and the await can never be missed.
    pub async fn wait(&self) {
        loop {
            if self.is_stopped() {
                return;
            }
            let notified = self.notify.notified();
            tokio::pin!(notified);
            if self.is_stopped() {
                return;
            }
            notified.await;
        }
    }

    /// Called from the signal handler. Returns the number of stop signals
    /// received so far (including this one), so the caller can implement
    /// "second signal forces immediate termination, third aborts".
    pub fn record_signal(&self) -> u8 {
        let count = self.signal_count.fetch_add(1, Ordering::SeqCst) + 1;
        self.trigger();
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn wait_resolves_immediately_if_already_stopped() {
        let sig = ShutdownSignal::new();
        sig.trigger();
        tokio::time::timeout(std::time::Duration::from_millis(50), sig.wait())
            .await
            .expect("wait should not block once stopped");
    }

    #[tokio::test]
    async fn wait_resolves_when_triggered_concurrently() {
        let sig = ShutdownSignal::new();
        let waiter = Arc::clone(&sig);
        let handle = tokio::spawn(async move { waiter.wait().await });
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        sig.trigger();
        tokio::time::timeout(std::time::Duration::from_millis(200), handle)
            .await
            .expect("waiter should wake up")
            .unwrap();
    }

    #[test]
    fn record_signal_counts_up() {
        let sig = ShutdownSignal::new();
        assert_eq!(sig.record_signal(), 1);
        assert_eq!(sig.record_signal(), 2);
        assert_eq!(sig.record_signal(), 3);
    }
}
