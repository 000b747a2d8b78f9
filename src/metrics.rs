//! Optional scheduler counters.
//!
//! Compiled with the `metrics` feature (on by default). Counters are
//! relaxed atomics bumped on the hot paths; `snapshot` reads them all at
//! one point in time.

#[cfg(feature = "metrics")]
use std::sync::atomic::{AtomicU64, Ordering};
#[cfg(feature = "metrics")]
use std::time::Instant;

/// Scheduler activity counters for one pool.
#[cfg(feature = "metrics")]
#[derive(Debug)]
pub struct Metrics {
    /// Jobs that ran to completion (including panicked ones).
    pub jobs_completed: AtomicU64,
    /// Pushes to per-worker deques.
    pub local_pushes: AtomicU64,
    /// Pops from per-worker deques.
    pub local_pops: AtomicU64,
    /// Pushes to the shared injection queue.
    pub injection_pushes: AtomicU64,
    /// Pops from the shared injection queue.
    pub injection_pops: AtomicU64,
    /// Steals that took an element from a peer deque.
    pub steal_successes: AtomicU64,
    /// Steal attempts that lost the top race.
    pub steal_aborts: AtomicU64,
    /// Thread requests that won the coalescing flag.
    pub thread_requests: AtomicU64,
    /// Permits released on the pool semaphore.
    pub semaphore_releases: AtomicU64,
    /// Workers spawned over the pool's lifetime.
    pub workers_spawned: AtomicU64,
    /// Workers that exited after an idle timeout.
    pub workers_retired: AtomicU64,
    start_time: Instant,
}

#[cfg(feature = "metrics")]
impl Metrics {
    pub fn new() -> Self {
        Self {
            jobs_completed: AtomicU64::new(0),
            local_pushes: AtomicU64::new(0),
            local_pops: AtomicU64::new(0),
            injection_pushes: AtomicU64::new(0),
            injection_pops: AtomicU64::new(0),
            steal_successes: AtomicU64::new(0),
            steal_aborts: AtomicU64::new(0),
            thread_requests: AtomicU64::new(0),
            semaphore_releases: AtomicU64::new(0),
            workers_spawned: AtomicU64::new(0),
            workers_retired: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Reads every counter at one point in time.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            jobs_completed: self.jobs_completed.load(Ordering::Relaxed),
            local_pushes: self.local_pushes.load(Ordering::Relaxed),
            local_pops: self.local_pops.load(Ordering::Relaxed),
            injection_pushes: self.injection_pushes.load(Ordering::Relaxed),
            injection_pops: self.injection_pops.load(Ordering::Relaxed),
            steal_successes: self.steal_successes.load(Ordering::Relaxed),
            steal_aborts: self.steal_aborts.load(Ordering::Relaxed),
            thread_requests: self.thread_requests.load(Ordering::Relaxed),
            semaphore_releases: self.semaphore_releases.load(Ordering::Relaxed),
            workers_spawned: self.workers_spawned.load(Ordering::Relaxed),
            workers_retired: self.workers_retired.load(Ordering::Relaxed),
            elapsed_seconds: self.start_time.elapsed().as_secs_f64(),
        }
    }
}

#[cfg(feature = "metrics")]
impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of [`Metrics`].
#[cfg(feature = "metrics")]
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub jobs_completed: u64,
    pub local_pushes: u64,
    pub local_pops: u64,
    pub injection_pushes: u64,
    pub injection_pops: u64,
    pub steal_successes: u64,
    pub steal_aborts: u64,
    pub thread_requests: u64,
    pub semaphore_releases: u64,
    pub workers_spawned: u64,
    pub workers_retired: u64,
    pub elapsed_seconds: f64,
}

#[cfg(feature = "metrics")]
impl MetricsSnapshot {
    /// Completed-job throughput since the pool started.
    pub fn jobs_per_second(&self) -> f64 {
        if self.elapsed_seconds > 0.0 {
            self.jobs_completed as f64 / self.elapsed_seconds
        } else {
            0.0
        }
    }

    /// Fraction of dequeued work obtained by stealing.
    pub fn steal_ratio(&self) -> f64 {
        let dequeued = self.local_pops + self.injection_pops + self.steal_successes;
        if dequeued > 0 {
            self.steal_successes as f64 / dequeued as f64
        } else {
            0.0
        }
    }
}

#[cfg(all(test, feature = "metrics"))]
mod tests {
    use super::*;

    #[test]
    fn fresh_metrics_read_zero() {
        let metrics = Metrics::new();
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.jobs_completed, 0);
        assert_eq!(snapshot.steal_successes, 0);
        assert_eq!(snapshot.semaphore_releases, 0);
        assert!(snapshot.elapsed_seconds >= 0.0);
    }

    #[test]
    fn snapshot_reflects_updates() {
        let metrics = Metrics::new();
        metrics.jobs_completed.fetch_add(5, Ordering::Relaxed);
        metrics.local_pops.fetch_add(3, Ordering::Relaxed);
        metrics.steal_successes.fetch_add(1, Ordering::Relaxed);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.jobs_completed, 5);
        assert_eq!(snapshot.local_pops, 3);
        assert!((snapshot.steal_ratio() - 0.25).abs() < 1e-9);
    }
}
