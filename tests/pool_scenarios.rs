//! End-to-end scheduling scenarios for the thread pool.

use dedicated_pool::{PoolSettings, ThreadPool};
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn pool_with(min: u32, max: u32, timeout: Duration) -> ThreadPool {
    let mut settings = PoolSettings::new("scenario-pool");
    settings.min_threads = min;
    settings.max_threads = max;
    settings.thread_timeout = timeout;
    ThreadPool::new(settings).expect("valid settings")
}

fn wait_until(deadline: Duration, mut condition: impl FnMut() -> bool) {
    let start = Instant::now();
    while !condition() {
        assert!(
            start.elapsed() < deadline,
            "condition not reached within {:?}",
            deadline
        );
        std::thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn every_submission_runs_exactly_once() {
    let pool = pool_with(4, 4, Duration::from_secs(20));
    let n = 10_000;
    let slots: Arc<Vec<AtomicU8>> = Arc::new((0..n).map(|_| AtomicU8::new(0)).collect());

    let mut jobs: Vec<Box<dyn FnOnce() + Send>> = Vec::new();
    for i in 0..n {
        let slots = slots.clone();
        jobs.push(Box::new(move || {
            slots[i].fetch_add(1, Ordering::SeqCst);
        }));
    }
    let counter = pool.run_all(jobs).unwrap();
    pool.wait_for_counter(&counter);

    for (i, slot) in slots.iter().enumerate() {
        assert_eq!(slot.load(Ordering::SeqCst), 1, "job {} ran a wrong number of times", i);
    }
    pool.dispose();
}

#[cfg(feature = "metrics")]
#[test]
fn forked_work_is_stolen_under_contention() {
    let pool = Arc::new(pool_with(4, 4, Duration::from_secs(20)));
    let roots = 2_000;
    let children_per_root = 8;
    let children_done = Arc::new(AtomicUsize::new(0));

    let mut jobs: Vec<Box<dyn FnOnce() + Send>> = Vec::new();
    for _ in 0..roots {
        let pool = Arc::clone(&pool);
        let children_done = children_done.clone();
        jobs.push(Box::new(move || {
            for _ in 0..children_per_root {
                let children_done = children_done.clone();
                pool.submit(move || {
                    // Roughly 10 microseconds of busy work.
                    let begin = Instant::now();
                    while begin.elapsed() < Duration::from_micros(10) {
                        std::hint::spin_loop();
                    }
                    children_done.fetch_add(1, Ordering::Relaxed);
                })
                .unwrap();
            }
        }));
    }

    let root_counter = pool.run_all(jobs).unwrap();
    pool.wait_for_counter(&root_counter);
    wait_until(Duration::from_secs(30), || {
        children_done.load(Ordering::Relaxed) == roots * children_per_root
    });

    let snapshot = pool.metrics();
    assert!(
        snapshot.steal_successes > 0,
        "expected workers to steal from each other, got {:?}",
        snapshot
    );
    pool.dispose();
}

#[test]
fn dispose_runs_all_pending_work() {
    let pool = pool_with(2, 2, Duration::from_secs(20));
    let n = 1_000;
    let completed = Arc::new(AtomicUsize::new(0));

    for _ in 0..n {
        let completed = completed.clone();
        pool.submit(move || {
            std::thread::sleep(Duration::from_micros(100));
            completed.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    }
    pool.dispose();

    assert_eq!(completed.load(Ordering::SeqCst), n);
    assert_eq!(pool.num_workers(), 0);
}

#[cfg(feature = "metrics")]
#[test]
fn single_submission_wakes_a_bounded_number_of_workers() {
    let pool = pool_with(4, 4, Duration::from_secs(20));
    // Let every worker finish its spin phase and park.
    std::thread::sleep(Duration::from_millis(300));

    let before = pool.metrics().semaphore_releases;
    let ran = Arc::new(AtomicUsize::new(0));
    let ran_clone = ran.clone();
    pool.submit(move || {
        ran_clone.fetch_add(1, Ordering::SeqCst);
    })
    .unwrap();

    wait_until(Duration::from_secs(10), || ran.load(Ordering::SeqCst) == 1);
    std::thread::sleep(Duration::from_millis(100));

    // One wake for the submission, at most one more when the dispatcher
    // recruits a peer. Anything near the worker count is a thundering herd.
    let delta = pool.metrics().semaphore_releases - before;
    assert!((1..=2).contains(&delta), "saw {} semaphore releases", delta);
    pool.dispose();
}

#[test]
fn pool_grows_on_demand_and_retires_idle_workers() {
    let pool = pool_with(0, 2, Duration::from_millis(300));
    assert_eq!(pool.num_workers(), 0);

    let ran = Arc::new(AtomicUsize::new(0));
    let ran_clone = ran.clone();
    pool.submit(move || {
        ran_clone.fetch_add(1, Ordering::SeqCst);
    })
    .unwrap();

    wait_until(Duration::from_secs(10), || ran.load(Ordering::SeqCst) == 1);
    assert!(pool.num_workers() >= 1);

    // Above min_threads and idle, the worker times out and exits.
    wait_until(Duration::from_secs(10), || pool.num_workers() == 0);
    pool.dispose();
}
