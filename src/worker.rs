//! Worker thread implementation.
//!
//! Each worker owns a deque registered for stealing, parks on the pool
//! semaphore between bursts of work, and runs the dispatch loop while it
//! holds an activation slot. Workers that stay idle past the configured
//! timeout retire once the pool is above its minimum size, spilling any
//! remaining local work to the injection queue on the way out.

use std::cell::RefCell;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
#[cfg(feature = "metrics")]
use std::sync::atomic::Ordering;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, error};

use crate::deque::Deque;
use crate::job::Job;
use crate::pool::PoolInner;
use crate::queue::WorkQueue;
use crate::rng::XorShift64Star;

/// Wall-clock budget a worker spends inside one dispatch call before
/// yielding back to the outer loop.
pub const DISPATCH_QUANTUM_MS: u64 = 30;

/// Identity of the worker running on the current thread, if any. The queue
/// pointer distinguishes pools: a worker of pool A submitting to pool B
/// must take B's injection path, not its own deque.
struct CurrentWorker {
    queue: *const WorkQueue,
    deque: Arc<Deque<Job>>,
}

thread_local! {
    static CURRENT_WORKER: RefCell<Option<CurrentWorker>> = RefCell::new(None);
}

/// Returns the calling thread's local deque when it is a worker of the pool
/// owning `queue`.
pub(crate) fn current_local_deque(queue: &WorkQueue) -> Option<Arc<Deque<Job>>> {
    CURRENT_WORKER.with(|current| {
        current.borrow().as_ref().and_then(|worker| {
            if std::ptr::eq(worker.queue, queue) {
                Some(Arc::clone(&worker.deque))
            } else {
                None
            }
        })
    })
}

/// Per-worker scheduling state: the owned deque and the victim-selection
/// generator. Lives on the worker's stack for its whole run.
pub(crate) struct WorkerLocal {
    pub(crate) deque: Arc<Deque<Job>>,
    pub(crate) rng: XorShift64Star,
}

impl WorkerLocal {
    /// Creates the deque, registers it for stealing, and records the
    /// worker's identity in thread-local storage.
    fn activate(pool: &Arc<PoolInner>, id: usize) -> Self {
        let deque = Arc::new(Deque::new());
        pool.queue.registry.register(&deque);
        CURRENT_WORKER.with(|current| {
            *current.borrow_mut() = Some(CurrentWorker {
                queue: &pool.queue as *const WorkQueue,
                deque: Arc::clone(&deque),
            });
        });
        let seed =
            (id as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15) ^ Arc::as_ptr(&deque) as u64;
        WorkerLocal {
            deque,
            rng: XorShift64Star::new(seed),
        }
    }

    /// Transfers unfinished local work to the injection queue, unregisters
    /// the deque, and clears the thread-local identity. Must run before the
    /// worker thread terminates.
    fn deactivate(self, pool: &Arc<PoolInner>) {
        CURRENT_WORKER.with(|current| current.borrow_mut().take());
        let mut spilled = false;
        while let Some(job) = self.deque.pop_bottom() {
            pool.queue.injection.enqueue(job);
            #[cfg(feature = "metrics")]
            pool.queue
                .metrics
                .injection_pushes
                .fetch_add(1, Ordering::Relaxed);
            spilled = true;
        }
        pool.queue.registry.unregister(&self.deque);
        if spilled && !pool.is_shut_down() {
            pool.ensure_thread_requested();
        }
    }
}

/// Handle to one worker thread.
pub(crate) struct Worker {
    id: usize,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    pub(crate) fn spawn(pool: Arc<PoolInner>, id: usize) -> io::Result<Worker> {
        let mut builder =
            thread::Builder::new().name(format!("{}-worker-{}", pool.settings.name, id));
        if pool.settings.thread_stack_size > 0 {
            builder = builder.stack_size(pool.settings.thread_stack_size);
        }
        let handle = builder.spawn(move || run_loop(pool, id))?;
        Ok(Worker {
            id,
            handle: Some(handle),
        })
    }

    pub(crate) fn id(&self) -> usize {
        self.id
    }

    pub(crate) fn join(mut self) -> thread::Result<()> {
        match self.handle.take() {
            Some(handle) => handle.join(),
            None => Ok(()),
        }
    }
}

fn run_loop(pool: Arc<PoolInner>, id: usize) {
    let local = WorkerLocal::activate(&pool, id);
    debug!("worker {} of pool '{}' started", id, pool.settings.name);

    let mut retired = false;
    loop {
        if pool.is_shut_down() {
            break;
        }
        let acquired = pool.queue.semaphore.wait(pool.settings.thread_timeout);
        if pool.is_shut_down() {
            break;
        }
        if !acquired {
            if pool.try_retire() {
                retired = true;
                debug!("worker {} of pool '{}' retiring", id, pool.settings.name);
                break;
            }
            continue;
        }
        while pool.queue.take_active_request() {
            if !dispatch(&pool, &local) {
                break;
            }
            // Soften start/stop churn between dispatches.
            thread::yield_now();
        }
    }

    if pool.is_shut_down() {
        drain(&pool, &local);
    }
    local.deactivate(&pool);
    if !retired {
        pool.live_workers.fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
    }
    debug!("worker {} of pool '{}' exited", id, pool.settings.name);
}

/// One dispatch pass. Returns false when this worker found nothing to do
/// and is surplus; true after it did useful work and yields cleanly.
fn dispatch(pool: &Arc<PoolInner>, local: &WorkerLocal) -> bool {
    let queue = &pool.queue;
    queue.mark_thread_request_satisfied();

    let mut missed_steal = false;
    let first = queue
        .try_global()
        .or_else(|| queue.dequeue(&local.deque, &local.rng, &mut missed_steal));
    let first = match first {
        Some(job) => job,
        None => {
            // A lost steal race means work may remain; hand the hunt to
            // another thread instead of dueling over the same victim.
            if missed_steal {
                pool.ensure_thread_requested();
            }
            return false;
        }
    };

    // There was work, so there may be more; recruit a peer.
    pool.ensure_thread_requested();

    let quantum = Duration::from_millis(DISPATCH_QUANTUM_MS);
    let start = Instant::now();
    let mut current = Some(first);
    loop {
        let job = match current.take() {
            Some(job) => job,
            None => {
                let mut missed_steal = false;
                match queue.dequeue(&local.deque, &local.rng, &mut missed_steal) {
                    Some(job) => job,
                    None => {
                        if missed_steal {
                            pool.ensure_thread_requested();
                        }
                        return true;
                    }
                }
            }
        };
        run_job(pool, job);
        if start.elapsed() >= quantum {
            return true;
        }
    }
}

/// Runs reachable work to exhaustion. Called once shutdown is observed.
fn drain(pool: &Arc<PoolInner>, local: &WorkerLocal) {
    loop {
        let mut missed_steal = false;
        match pool.queue.dequeue(&local.deque, &local.rng, &mut missed_steal) {
            Some(job) => run_job(pool, job),
            None if missed_steal => thread::yield_now(),
            None => return,
        }
    }
}

/// Executes one job, containing any panic it raises.
pub(crate) fn run_job(pool: &PoolInner, job: Job) {
    let result = panic::catch_unwind(AssertUnwindSafe(|| job.execute()));
    #[cfg(feature = "metrics")]
    pool.queue
        .metrics
        .jobs_completed
        .fetch_add(1, Ordering::Relaxed);
    #[cfg(not(feature = "metrics"))]
    let _ = pool;
    if let Err(payload) = result {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        error!("job panicked: {}", message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_worker_threads_have_no_local_deque() {
        let queue = WorkQueue::new();
        assert!(current_local_deque(&queue).is_none());
    }
}
