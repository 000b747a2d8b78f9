//! Pool configuration and lifecycle.
//!
//! The [`ThreadPool`] is the entry point: it validates its settings, spawns
//! the initial workers, routes submissions into the two-tier work queue,
//! and drains and joins everything on [`dispose`](ThreadPool::dispose).

use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};
use parking_lot::Mutex;

use crate::counter::Counter;
use crate::error::{SettingsError, ShutdownError};
use crate::job::Job;
#[cfg(feature = "metrics")]
use crate::metrics::MetricsSnapshot;
use crate::queue::WorkQueue;
use crate::semaphore::MAX_WORKER;
use crate::worker::{self, Worker};

/// Configuration for a [`ThreadPool`].
///
/// Defaults: one worker per logical processor for both bounds, a 20 second
/// idle timeout, and the platform-default thread stack size.
#[derive(Debug, Clone)]
pub struct PoolSettings {
    /// Workers kept alive even when idle.
    pub min_threads: u32,
    /// Upper bound on concurrently live workers.
    pub max_threads: u32,
    /// Idle time after which a worker above `min_threads` exits.
    pub thread_timeout: Duration,
    /// Pool name, used as the worker thread name prefix.
    pub name: String,
    /// Worker stack size in bytes; 0 selects the platform default.
    pub thread_stack_size: usize,
}

impl PoolSettings {
    pub fn new(name: impl Into<String>) -> Self {
        PoolSettings {
            name: name.into(),
            ..Default::default()
        }
    }

    fn validate(&self) -> Result<(), SettingsError> {
        if self.max_threads == 0 {
            return Err(SettingsError::ZeroMaxThreads);
        }
        if self.min_threads > self.max_threads {
            return Err(SettingsError::MinAboveMax {
                min: self.min_threads,
                max: self.max_threads,
            });
        }
        if self.thread_timeout.is_zero() {
            return Err(SettingsError::ZeroTimeout);
        }
        if self.max_threads > MAX_WORKER as u32 {
            return Err(SettingsError::TooManyThreads(self.max_threads));
        }
        Ok(())
    }
}

impl Default for PoolSettings {
    fn default() -> Self {
        let cores = num_cpus::get().max(1) as u32;
        PoolSettings {
            min_threads: cores,
            max_threads: cores,
            thread_timeout: Duration::from_secs(20),
            name: "dedicated-pool".to_string(),
            thread_stack_size: 0,
        }
    }
}

/// Shared pool state. Workers hold an `Arc` back-reference; the pool joins
/// every worker before the last `Arc` can drop.
pub(crate) struct PoolInner {
    pub(crate) settings: PoolSettings,
    pub(crate) queue: WorkQueue,
    shutdown: AtomicBool,
    pub(crate) live_workers: AtomicUsize,
    next_worker_id: AtomicUsize,
    workers: Mutex<Vec<Worker>>,
}

impl PoolInner {
    pub(crate) fn is_shut_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Records the intent to wake one worker and, when the request actually
    /// released a permit but nobody was idle to take it, grows the pool
    /// toward `max_threads`.
    pub(crate) fn ensure_thread_requested(self: &Arc<Self>) {
        if self.queue.ensure_thread_requested() {
            self.maybe_spawn_worker();
        }
    }

    fn maybe_spawn_worker(self: &Arc<Self>) {
        if self.is_shut_down() || self.queue.semaphore.idle_workers() > 0 {
            return;
        }
        let mut live = self.live_workers.load(Ordering::SeqCst);
        loop {
            if live >= self.settings.max_threads as usize {
                return;
            }
            match self.live_workers.compare_exchange_weak(
                live,
                live + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => break,
                Err(observed) => live = observed,
            }
        }
        if let Err(error) = self.spawn_worker() {
            self.live_workers.fetch_sub(1, Ordering::SeqCst);
            warn!(
                "pool '{}' failed to spawn worker: {}",
                self.settings.name, error
            );
        }
    }

    /// Spawns one worker thread. The caller must have reserved a live slot.
    fn spawn_worker(self: &Arc<Self>) -> io::Result<()> {
        let id = self.next_worker_id.fetch_add(1, Ordering::SeqCst);
        let worker = Worker::spawn(Arc::clone(self), id)?;
        self.workers.lock().push(worker);
        #[cfg(feature = "metrics")]
        self.queue
            .metrics
            .workers_spawned
            .fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Reserves the right to exit for a worker that has idled past its
    /// timeout. Fails when the pool is already at `min_threads`.
    pub(crate) fn try_retire(&self) -> bool {
        let mut live = self.live_workers.load(Ordering::SeqCst);
        loop {
            if live <= self.settings.min_threads as usize {
                return false;
            }
            match self.live_workers.compare_exchange_weak(
                live,
                live - 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => {
                    #[cfg(feature = "metrics")]
                    self.queue
                        .metrics
                        .workers_retired
                        .fetch_add(1, Ordering::Relaxed);
                    return true;
                }
                Err(observed) => live = observed,
            }
        }
    }
}

/// A dedicated pool of worker threads executing submitted closures.
///
/// Submissions from worker threads land on the submitting worker's own
/// deque for locality; submissions from outside go through the shared
/// injection queue. Work is guaranteed to eventually run as long as the
/// pool is not shut down.
pub struct ThreadPool {
    inner: Arc<PoolInner>,
}

impl ThreadPool {
    /// Validates `settings` and starts a pool with `min_threads` workers.
    pub fn new(settings: PoolSettings) -> Result<Self, SettingsError> {
        settings.validate()?;
        let min_threads = settings.min_threads;
        let inner = Arc::new(PoolInner {
            settings,
            queue: WorkQueue::new(),
            shutdown: AtomicBool::new(false),
            live_workers: AtomicUsize::new(0),
            next_worker_id: AtomicUsize::new(0),
            workers: Mutex::new(Vec::new()),
        });
        for _ in 0..min_threads {
            inner.live_workers.fetch_add(1, Ordering::SeqCst);
            inner
                .spawn_worker()
                .expect("failed to spawn pool worker thread");
        }
        info!(
            "pool '{}' started with {} workers",
            inner.settings.name, min_threads
        );
        Ok(ThreadPool { inner })
    }

    pub fn with_default_settings() -> Self {
        Self::new(PoolSettings::default()).expect("default settings are valid")
    }

    /// Submits `work`, preferring the caller's local deque when the caller
    /// is one of this pool's workers.
    pub fn submit<F>(&self, work: F) -> Result<(), ShutdownError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit_job(Job::new(work), false)
    }

    /// Submits `work` through the shared injection queue even when called
    /// from a worker.
    pub fn submit_global<F>(&self, work: F) -> Result<(), ShutdownError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit_job(Job::new(work), true)
    }

    fn submit_job(&self, job: Job, force_global: bool) -> Result<(), ShutdownError> {
        if self.inner.is_shut_down() {
            return Err(ShutdownError);
        }
        self.inner.queue.enqueue(job, force_global);
        self.inner.ensure_thread_requested();
        Ok(())
    }

    /// Submits `work` and returns a [`Counter`] that completes when it has
    /// run.
    pub fn run<F>(&self, work: F) -> Result<Counter, ShutdownError>
    where
        F: FnOnce() + Send + 'static,
    {
        let counter = Counter::new(1);
        self.submit_job(Job::with_counter(work, counter.clone()), false)?;
        Ok(counter)
    }

    /// Submits a batch and returns a [`Counter`] tracking all of it.
    pub fn run_all<I>(&self, jobs: I) -> Result<Counter, ShutdownError>
    where
        I: IntoIterator<Item = Box<dyn FnOnce() + Send + 'static>>,
    {
        let jobs: Vec<_> = jobs.into_iter().collect();
        let counter = Counter::new(jobs.len());
        for work in jobs {
            self.submit_job(Job::from_boxed(work, Some(counter.clone())), false)?;
        }
        Ok(counter)
    }

    /// Blocks until `counter` completes, backing off exponentially.
    pub fn wait_for_counter(&self, counter: &Counter) {
        const MAX_BACKOFF_US: u64 = 1000;
        let mut backoff_us = 1;
        while !counter.is_complete() {
            thread::sleep(Duration::from_micros(backoff_us));
            backoff_us = (backoff_us * 2).min(MAX_BACKOFF_US);
        }
    }

    /// Number of currently live workers.
    pub fn num_workers(&self) -> usize {
        self.inner.live_workers.load(Ordering::SeqCst)
    }

    pub fn name(&self) -> &str {
        &self.inner.settings.name
    }

    /// Point-in-time scheduler counters.
    #[cfg(feature = "metrics")]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.queue.metrics.snapshot()
    }

    /// Shuts the pool down: rejects new submissions, runs already-queued
    /// work to completion, and joins every worker. Idempotent; concurrent
    /// and repeated calls all block until the workers are gone.
    pub fn dispose(&self) {
        let already = self.inner.shutdown.swap(true, Ordering::SeqCst);
        if !already {
            debug!("pool '{}' shutting down", self.inner.settings.name);
        }

        let live = self.inner.live_workers.load(Ordering::SeqCst);
        if live > 0 {
            let permits = live.min(MAX_WORKER as usize) as u16;
            self.inner.queue.semaphore.release(permits);
            #[cfg(feature = "metrics")]
            self.inner
                .queue
                .metrics
                .semaphore_releases
                .fetch_add(permits as u64, Ordering::Relaxed);
        }

        loop {
            let drained: Vec<Worker> = self.inner.workers.lock().drain(..).collect();
            for w in drained {
                let id = w.id();
                if w.join().is_err() {
                    warn!(
                        "worker {} of pool '{}' panicked",
                        id, self.inner.settings.name
                    );
                }
            }
            if self.inner.live_workers.load(Ordering::SeqCst) == 0
                && self.inner.workers.lock().is_empty()
            {
                break;
            }
            thread::yield_now();
        }

        // Work spilled by the last workers on their way out.
        while let Some(job) = self.inner.queue.try_global() {
            worker::run_job(&self.inner, job);
        }

        if !already {
            info!("pool '{}' shut down", self.inner.settings.name);
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_are_valid() {
        let settings = PoolSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.min_threads, settings.max_threads);
    }

    #[test]
    fn settings_validation_rejects_bad_ranges() {
        let mut settings = PoolSettings::new("bad");
        settings.max_threads = 0;
        settings.min_threads = 0;
        assert_eq!(settings.validate(), Err(SettingsError::ZeroMaxThreads));

        let mut settings = PoolSettings::new("bad");
        settings.min_threads = 8;
        settings.max_threads = 2;
        assert_eq!(
            settings.validate(),
            Err(SettingsError::MinAboveMax { min: 8, max: 2 })
        );

        let mut settings = PoolSettings::new("bad");
        settings.thread_timeout = Duration::ZERO;
        assert_eq!(settings.validate(), Err(SettingsError::ZeroTimeout));
    }

    #[test]
    fn pool_reports_its_name_and_size() {
        let mut settings = PoolSettings::new("named");
        settings.min_threads = 2;
        settings.max_threads = 2;
        let pool = ThreadPool::new(settings).unwrap();
        assert_eq!(pool.name(), "named");
        assert_eq!(pool.num_workers(), 2);
        pool.dispose();
    }
}
