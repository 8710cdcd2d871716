//! Supervisor/Monitor: the single task that watches queue depths and owns
//! the global stop decision.
//!
//! Runs on a fixed 5s cadence per spec.md §4.14. REGULAR mode gets the full
//! refill/spill/emergency-injection behavior; FRESH mode skips all three and
//! additionally suppresses shutdown detection for an initial 60s grace
//! period so the Feed Poller has time to prime the queues.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::diskqueue::ShardedDiskQueue;
use crate::fetch::url_info_from_disk;
use crate::frontier::SmartFrontier;
use crate::shutdown::ShutdownSignal;
use crate::types::{HtmlTask, UrlInfo};
use crate::workstealing::WorkStealingQueues;

const TICK_INTERVAL: Duration = Duration::from_secs(5);
const FRESH_STARTUP_GRACE: Duration = Duration::from_secs(60);
const REFILL_THRESHOLD: usize = 1000;
const REFILL_BATCH: usize = 1000;
const SPILL_FRACTION: f64 = 0.8;
const SPILL_BATCH: usize = 200;
const EMERGENCY_SMART_SIZE_THRESHOLD: usize = 100;
const EMERGENCY_RATE_THRESHOLD: f64 = 5.0;
const EMERGENCY_CONSECUTIVE_TICKS: u32 = 2;
const MAX_EMERGENCY_INJECTIONS: u32 = 5;
const SHUTDOWN_AVAILABLE_THRESHOLD: usize = 10;
const SHUTDOWN_RATE_THRESHOLD: f64 = 2.0;
const SHUTDOWN_CONSECUTIVE_TICKS: u32 = 3;
const EMA_ALPHA: f64 = 0.4;

pub struct SupervisorShared {
    pub is_regular: bool,
    pub frontier: Arc<SmartFrontier>,
    pub disk_queue: Option<Arc<ShardedDiskQueue>>,
    pub work_queues: Arc<WorkStealingQueues>,
    pub html_tx: mpsc::Sender<HtmlTask>,
    pub html_queue_capacity: usize,
    pub fetched_count: Arc<AtomicU64>,
    pub in_flight_total: Arc<AtomicUsize>,
    pub emergency_seeds: Vec<String>,
    pub max_runtime: Option<Duration>,
    pub shutdown: Arc<ShutdownSignal>,
}

struct TickState {
    last_fetched_count: u64,
    last_tick_at: Instant,
    ema_rate: f64,
    low_rate_ticks: u32,
    starvation_ticks: u32,
    emergency_injections_used: u32,
}

impl TickState {
    fn new() -> Self {
        Self {
            last_fetched_count: 0,
            last_tick_at: Instant::now(),
            ema_rate: 0.0,
            low_rate_ticks: 0,
            starvation_ticks: 0,
            emergency_injections_used: 0,
        }
    }
}

/// Runs the supervisor loop until it sets the shutdown flag itself or
/// observes it already set.
pub async fn run(shared: Arc<SupervisorShared>) {
    let started_at = Instant::now();
    let mut state = TickState::new();
    let mut interval = tokio::time::interval(TICK_INTERVAL);

    loop {
        tokio::select! {
            _ = shared.shutdown.wait() => return,
            _ = interval.tick() => {}
        }

        tick(&shared, &mut state, started_at);

        if shared.shutdown.is_stopped() {
            return;
        }
    }
}

fn tick(shared: &Arc<SupervisorShared>, state: &mut TickState, started_at: Instant) {
    let smart_size = shared.frontier.size();
    let disk_size = shared.disk_queue.as_ref().map(|d| d.total_size()).unwrap_or(0);
    let work_size = shared.work_queues.total_len();
    let html_in_use = shared.html_queue_capacity.saturating_sub(shared.html_tx.capacity());
    let in_flight = shared.in_flight_total.load(Ordering::Relaxed);
    let total_available = smart_size + disk_size + work_size;

    let rate = instantaneous_rate(shared, state);
    state.ema_rate = EMA_ALPHA * rate + (1.0 - EMA_ALPHA) * state.ema_rate;

    info!(
        smart_size,
        disk_size,
        work_size,
        html_in_use,
        in_flight,
        rate = state.ema_rate,
        "supervisor tick"
    );

    if shared.is_regular {
        refill(shared, smart_size, disk_size);
        spill(shared, smart_size);
        maybe_emergency_inject(shared, state, smart_size);
    }

    let grace_active = !shared.is_regular && started_at.elapsed() < FRESH_STARTUP_GRACE;
    if !grace_active {
        maybe_shutdown_on_starvation(shared, state, total_available);
    }

    maybe_shutdown_on_timeout(shared, started_at);
}

fn instantaneous_rate(shared: &Arc<SupervisorShared>, state: &mut TickState) -> f64 {
    let now = Instant::now();
    let elapsed = now.duration_since(state.last_tick_at).as_secs_f64().max(0.001);
    let current = shared.fetched_count.load(Ordering::Relaxed);
    let delta = current.saturating_sub(state.last_fetched_count);
    state.last_fetched_count = current;
    state.last_tick_at = now;
    delta as f64 / elapsed
}

fn refill(shared: &Arc<SupervisorShared>, smart_size: usize, disk_size: usize) {
    if smart_size >= REFILL_THRESHOLD || disk_size == 0 {
        return;
    }
    let Some(disk_queue) = &shared.disk_queue else { return };
    match disk_queue.dequeue(REFILL_BATCH) {
        Ok(urls) => {
            let moved = urls.len();
            let infos: Vec<UrlInfo> = urls.iter().filter_map(|u| url_info_from_disk(u)).collect();
            let rejected = shared.frontier.enqueue_batch(infos);
            if moved > 0 {
                info!(moved, rejected = rejected.len(), "refilled frontier from disk queue");
            }
        }
        Err(err) => warn!(error = %err, "disk queue refill failed"),
    }
}

fn spill(shared: &Arc<SupervisorShared>, smart_size: usize) {
    let Some(disk_queue) = &shared.disk_queue else { return };
    let frontier_cap = shared.frontier.capacity();
    let frontier_hot = frontier_cap > 0 && smart_size as f64 > SPILL_FRACTION * frontier_cap as f64;

    let hottest_worker = (0..shared.work_queues.worker_count())
        .filter(|&w| {
            let cap = shared.work_queues.capacity(w);
            cap > 0 && shared.work_queues.len(w) as f64 > SPILL_FRACTION * cap as f64
        })
        .max_by_key(|&w| shared.work_queues.len(w));

    if !frontier_hot && hottest_worker.is_none() {
        return;
    }

    let mut batch = Vec::new();
    if frontier_hot {
        for _ in 0..SPILL_BATCH {
            match shared.frontier.dequeue() {
                Some(info) => batch.push(info.url),
                None => break,
            }
        }
    } else if let Some(worker_id) = hottest_worker {
        for _ in 0..SPILL_BATCH {
            match shared.work_queues.pop_local(worker_id) {
                Some(info) => batch.push(info.url),
                None => break,
            }
        }
    }

    if !batch.is_empty() {
        let spilled = batch.len();
        if let Err(err) = disk_queue.enqueue(&batch) {
            warn!(error = %err, "disk queue spill failed");
        } else {
            info!(spilled, "spilled urls to disk queue");
        }
    }
}

fn maybe_emergency_inject(shared: &Arc<SupervisorShared>, state: &mut TickState, smart_size: usize) {
    let low = smart_size < EMERGENCY_SMART_SIZE_THRESHOLD && state.ema_rate < EMERGENCY_RATE_THRESHOLD;
    state.low_rate_ticks = if low { state.low_rate_ticks + 1 } else { 0 };

    if state.low_rate_ticks < EMERGENCY_CONSECUTIVE_TICKS {
        return;
    }
    if state.emergency_injections_used >= MAX_EMERGENCY_INJECTIONS {
        return;
    }
    if shared.emergency_seeds.is_empty() {
        return;
    }

    state.emergency_injections_used += 1;
    state.low_rate_ticks = 0;
    let injected = shared.emergency_seeds.len();
    for seed in &shared.emergency_seeds {
        let info = UrlInfo::new(seed.clone(), 1.0, 0, String::new());
        let _ = shared.frontier.enqueue(info);
    }
    warn!(injected, count = state.emergency_injections_used, "injected emergency seeds");
}

fn maybe_shutdown_on_starvation(shared: &Arc<SupervisorShared>, state: &mut TickState, total_available: usize) {
    let starved = total_available < SHUTDOWN_AVAILABLE_THRESHOLD && state.ema_rate < SHUTDOWN_RATE_THRESHOLD;
    state.starvation_ticks = if starved { state.starvation_ticks + 1 } else { 0 };

    if state.starvation_ticks >= SHUTDOWN_CONSECUTIVE_TICKS {
        warn!(total_available, rate = state.ema_rate, "sustained starvation detected, triggering shutdown");
        shared.shutdown.trigger();
    }
}

fn maybe_shutdown_on_timeout(shared: &Arc<SupervisorShared>, started_at: Instant) {
    if let Some(limit) = shared.max_runtime {
        if started_at.elapsed() >= limit {
            warn!(?limit, "safety timeout reached, triggering shutdown");
            shared.shutdown.trigger();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shared(is_regular: bool, max_runtime: Option<Duration>) -> Arc<SupervisorShared> {
        let (tx, _rx) = mpsc::channel(100);
        Arc::new(SupervisorShared {
            is_regular,
            frontier: Arc::new(SmartFrontier::new(5, 1000)),
            disk_queue: None,
            work_queues: Arc::new(WorkStealingQueues::new(2)),
            html_tx: tx,
            html_queue_capacity: 100,
            fetched_count: Arc::new(AtomicU64::new(0)),
            in_flight_total: Arc::new(AtomicUsize::new(0)),
            emergency_seeds: vec!["https://seed.example/a".to_string()],
            max_runtime,
            shutdown: ShutdownSignal::new(),
        })
    }

    #[test]
    fn starvation_triggers_shutdown_after_three_ticks() {
        let shared = shared(true, None);
        let mut state = TickState::new();
        let started = Instant::now();
        for _ in 0..3 {
            maybe_shutdown_on_starvation(&shared, &mut state, 0);
        }
        assert!(shared.shutdown.is_stopped());
        let _ = started;
    }

    #[test]
    fn starvation_counter_resets_when_not_starved() {
        let shared = shared(true, None);
        let mut state = TickState::new();
        maybe_shutdown_on_starvation(&shared, &mut state, 0);
        maybe_shutdown_on_starvation(&shared, &mut state, 500);
        maybe_shutdown_on_starvation(&shared, &mut state, 0);
        assert!(!shared.shutdown.is_stopped());
    }

    #[test]
    fn emergency_injection_respects_max_count() {
        let shared = shared(true, None);
        let mut state = TickState::new();
        for _ in 0..(MAX_EMERGENCY_INJECTIONS * 10) {
            maybe_emergency_inject(&shared, &mut state, 0);
        }
        assert_eq!(state.emergency_injections_used, MAX_EMERGENCY_INJECTIONS);
    }

    #[test]
    fn safety_timeout_triggers_shutdown() {
        let shared = shared(true, Some(Duration::from_millis(1)));
        std::thread::sleep(Duration::from_millis(5));
        maybe_shutdown_on_timeout(&shared, Instant::now() - Duration::from_millis(10));
        assert!(shared.shutdown.is_stopped());
    }

    #[test]
    fn no_timeout_means_never_triggers() {
        let shared = shared(false, None);
        maybe_shutdown_on_timeout(&shared, Instant::now() - Duration::from_secs(10_000));
        assert!(!shared.shutdown.is_stopped());
    }
}
