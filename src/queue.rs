//! Two-tier work queue and the worker-activation protocol.
//!
//! Work lives either in the submitting worker's deque (LIFO, cache-hot) or
//! in the shared injection queue. Consumption order is local pop, then
//! injection dequeue, then one randomized pass stealing from peers.
//!
//! Wake-ups are coalesced through `has_outstanding_thread_request`: an
//! enqueue releases at most one semaphore permit while a previous request
//! is still unserved, and the dispatcher clears the flag before touching
//! the queues so the next enqueue can wake another worker. Each served
//! request corresponds to one activation slot in `num_requested_workers`.

use std::sync::atomic::{AtomicI32, Ordering};

use crossbeam::epoch;

use crate::deque::{Deque, Steal};
use crate::injector::InjectionQueue;
use crate::job::Job;
#[cfg(feature = "metrics")]
use crate::metrics::Metrics;
use crate::registry::DequeRegistry;
use crate::rng::XorShift64Star;
use crate::semaphore::UnfairSemaphore;
use crate::worker;

pub(crate) struct WorkQueue {
    pub(crate) injection: InjectionQueue<Job>,
    pub(crate) registry: DequeRegistry<Job>,
    pub(crate) semaphore: UnfairSemaphore,
    num_requested_workers: AtomicI32,
    has_outstanding_thread_request: AtomicI32,
    #[cfg(feature = "metrics")]
    pub(crate) metrics: Metrics,
}

impl WorkQueue {
    pub(crate) fn new() -> Self {
        WorkQueue {
            injection: InjectionQueue::new(),
            registry: DequeRegistry::new(),
            semaphore: UnfairSemaphore::new(),
            num_requested_workers: AtomicI32::new(0),
            has_outstanding_thread_request: AtomicI32::new(0),
            #[cfg(feature = "metrics")]
            metrics: Metrics::new(),
        }
    }

    /// Queues `job` on the caller's local deque when the caller is a worker
    /// of this queue and `force_global` is false; otherwise on the shared
    /// injection queue. The caller is responsible for requesting a thread
    /// afterwards.
    pub(crate) fn enqueue(&self, job: Job, force_global: bool) {
        if !force_global {
            if let Some(deque) = worker::current_local_deque(self) {
                deque.push_bottom(job);
                #[cfg(feature = "metrics")]
                self.metrics.local_pushes.fetch_add(1, Ordering::Relaxed);
                return;
            }
        }
        self.injection.enqueue(job);
        #[cfg(feature = "metrics")]
        self.metrics.injection_pushes.fetch_add(1, Ordering::Relaxed);
    }

    /// Records the intent to wake one worker. Returns true when this call
    /// won the coalescing flag and actually released a permit.
    pub(crate) fn ensure_thread_requested(&self) -> bool {
        if self
            .has_outstanding_thread_request
            .compare_exchange(0, 1, Ordering::SeqCst, Ordering::Relaxed)
            .is_ok()
        {
            self.num_requested_workers.fetch_add(1, Ordering::SeqCst);
            self.semaphore.release(1);
            #[cfg(feature = "metrics")]
            {
                self.metrics.thread_requests.fetch_add(1, Ordering::Relaxed);
                self.metrics
                    .semaphore_releases
                    .fetch_add(1, Ordering::Relaxed);
            }
            true
        } else {
            false
        }
    }

    /// Clears the coalescing flag. Dispatchers call this before doing real
    /// work so that subsequent enqueues can wake further workers. The fence
    /// orders the clear before the dispatcher's queue reads.
    pub(crate) fn mark_thread_request_satisfied(&self) {
        self.has_outstanding_thread_request
            .store(0, Ordering::SeqCst);
        std::sync::atomic::fence(Ordering::SeqCst);
    }

    /// Claims one activation slot. False when none remain.
    pub(crate) fn take_active_request(&self) -> bool {
        let mut count = self.num_requested_workers.load(Ordering::Acquire);
        while count > 0 {
            match self.num_requested_workers.compare_exchange_weak(
                count,
                count - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(observed) => count = observed,
            }
        }
        false
    }

    /// Dequeues from the shared injection queue.
    pub(crate) fn try_global(&self) -> Option<Job> {
        let job = self.injection.try_dequeue();
        #[cfg(feature = "metrics")]
        {
            if job.is_some() {
                self.metrics.injection_pops.fetch_add(1, Ordering::Relaxed);
            }
        }
        job
    }

    /// Finds the next job for a worker: local deque, then injection queue,
    /// then one randomized pass over the other registered deques.
    ///
    /// `missed_steal` is set when a victim aborted the steal race; work may
    /// remain even though `None` is returned, and the caller should request
    /// another thread rather than loop into a steal duel.
    pub(crate) fn dequeue(
        &self,
        local: &Deque<Job>,
        rng: &XorShift64Star,
        missed_steal: &mut bool,
    ) -> Option<Job> {
        if let Some(job) = local.pop_bottom() {
            #[cfg(feature = "metrics")]
            self.metrics.local_pops.fetch_add(1, Ordering::Relaxed);
            return Some(job);
        }
        if let Some(job) = self.try_global() {
            return Some(job);
        }
        self.steal_from_peers(local, rng, missed_steal)
    }

    fn steal_from_peers(
        &self,
        local: &Deque<Job>,
        rng: &XorShift64Star,
        missed_steal: &mut bool,
    ) -> Option<Job> {
        let guard = epoch::pin();
        let snapshot = self.registry.snapshot(&guard);
        let count = snapshot.len();
        if count == 0 {
            return None;
        }
        let start = rng.next_index(count);
        for offset in 0..count {
            let victim = &snapshot[(start + offset) % count];
            if std::ptr::eq(victim.as_ref(), local) {
                continue;
            }
            match victim.steal() {
                Steal::Success(job) => {
                    #[cfg(feature = "metrics")]
                    self.metrics.steal_successes.fetch_add(1, Ordering::Relaxed);
                    return Some(job);
                }
                Steal::Empty => {}
                Steal::Abort => {
                    // Lost the race; skip this victim for the rest of the pass.
                    *missed_steal = true;
                    #[cfg(feature = "metrics")]
                    self.metrics.steal_aborts.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn thread_requests_coalesce() {
        let queue = WorkQueue::new();
        assert!(queue.ensure_thread_requested());
        // The first request is still outstanding; this one must not release.
        assert!(!queue.ensure_thread_requested());

        queue.mark_thread_request_satisfied();
        assert!(queue.ensure_thread_requested());
    }

    #[test]
    fn activation_slots_match_requests() {
        let queue = WorkQueue::new();
        queue.ensure_thread_requested();
        queue.mark_thread_request_satisfied();
        queue.ensure_thread_requested();

        assert!(queue.take_active_request());
        assert!(queue.take_active_request());
        assert!(!queue.take_active_request());
    }

    #[test]
    fn dequeue_prefers_local_work() {
        let queue = WorkQueue::new();
        let local = Arc::new(Deque::new());
        let rng = XorShift64Star::new(1);
        let mut missed = false;

        queue.injection.enqueue(Job::new(|| {}));
        local.push_bottom(Job::new(|| {}));

        assert!(queue.dequeue(&local, &rng, &mut missed).is_some());
        // Local deque drained first; the injected job is still there.
        assert!(local.is_empty());
        assert_eq!(queue.injection.len(), 1);
    }

    #[test]
    fn dequeue_steals_from_registered_peers() {
        let queue = WorkQueue::new();
        let own = Arc::new(Deque::new());
        let peer = Arc::new(Deque::new());
        queue.registry.register(&own);
        queue.registry.register(&peer);
        peer.push_bottom(Job::new(|| {}));

        let rng = XorShift64Star::new(7);
        let mut missed = false;
        assert!(queue.dequeue(&own, &rng, &mut missed).is_some());
        assert!(peer.is_empty());
        assert!(!missed);
    }
}
