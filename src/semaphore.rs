//! Unfair two-tier throttling semaphore.
//!
//! Gates a bounded population of frequently-waking worker threads. Threads
//! that asked for work recently spin briefly before blocking; `release`
//! prefers handing permits to those spinners because they are cache-hot and
//! can resume without a kernel transition. Only threads that exhausted
//! their spin budget park on the kernel-side semaphore.
//!
//! All coordination state lives in one 64-bit word holding four 15-bit
//! counters: threads currently spinning, permits reserved for spinners,
//! threads blocked in the kernel, and permits reserved for those blocked
//! threads. Every transition is a compare-and-swap on the whole word, so a
//! release and a wait can never observe half-updated tiers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::utils::CachePadded;
use parking_lot::{Condvar, Mutex};

/// Largest population each packed counter can describe.
pub const MAX_WORKER: u16 = 0x7FFF;

/// Spin iterations granted per logical processor before a thread parks.
pub const SPIN_LIMIT_PER_PROCESSOR: u32 = 50;

/// Unpacked view of the 64-bit state word.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Counts {
    /// Threads in the spin phase.
    spinners: u16,
    /// Permits banked for current or future spinners.
    count_for_spinners: u16,
    /// Threads blocked on the kernel semaphore.
    waiters: u16,
    /// Permits promised to blocked threads; each one is paired with a
    /// kernel-side release.
    count_for_waiters: u16,
}

impl Counts {
    fn unpack(word: u64) -> Self {
        Counts {
            spinners: (word & 0xFFFF) as u16,
            count_for_spinners: (word >> 16 & 0xFFFF) as u16,
            waiters: (word >> 32 & 0xFFFF) as u16,
            count_for_waiters: (word >> 48 & 0xFFFF) as u16,
        }
    }

    fn pack(self) -> u64 {
        self.spinners as u64
            | (self.count_for_spinners as u64) << 16
            | (self.waiters as u64) << 32
            | (self.count_for_waiters as u64) << 48
    }

    fn assert_valid(self) {
        debug_assert!(self.spinners <= MAX_WORKER);
        debug_assert!(self.count_for_spinners <= MAX_WORKER);
        debug_assert!(self.waiters <= MAX_WORKER);
        debug_assert!(self.count_for_waiters <= MAX_WORKER);
        debug_assert!(
            self.count_for_spinners as u32 + self.count_for_waiters as u32 <= MAX_WORKER as u32
        );
    }
}

/// Kernel-side counting semaphore for the blocked tier.
struct KernelSemaphore {
    permits: Mutex<u32>,
    available: Condvar,
}

impl KernelSemaphore {
    fn new() -> Self {
        KernelSemaphore {
            permits: Mutex::new(0),
            available: Condvar::new(),
        }
    }

    /// Blocks until a permit is available or `timeout` elapses.
    fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut permits = self.permits.lock();
        while *permits == 0 {
            if self.available.wait_until(&mut permits, deadline).timed_out() {
                if *permits == 0 {
                    return false;
                }
                break;
            }
        }
        *permits -= 1;
        true
    }

    fn release(&self, count: u32) {
        if count == 0 {
            return;
        }
        let mut permits = self.permits.lock();
        *permits += count;
        for _ in 0..count {
            self.available.notify_one();
        }
    }
}

/// Throttling gate with spinner preference.
pub struct UnfairSemaphore {
    state: CachePadded<AtomicU64>,
    kernel: KernelSemaphore,
    processors: u32,
}

impl UnfairSemaphore {
    pub fn new() -> Self {
        UnfairSemaphore {
            state: CachePadded::new(AtomicU64::new(0)),
            kernel: KernelSemaphore::new(),
            processors: num_cpus::get().max(1) as u32,
        }
    }

    fn transition(&self, old: u64, new: Counts) -> bool {
        new.assert_valid();
        self.state
            .compare_exchange(old, new.pack(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Acquires a permit, spinning first and blocking in the kernel only
    /// after the spin budget runs out. Returns `false` if `timeout` elapses
    /// while blocked.
    pub fn wait(&self, timeout: Duration) -> bool {
        // Take a banked permit or join the spinner tier.
        loop {
            let word = self.state.load(Ordering::Acquire);
            let mut counts = Counts::unpack(word);
            if counts.count_for_spinners > 0 {
                counts.count_for_spinners -= 1;
                if self.transition(word, counts) {
                    return true;
                }
            } else {
                counts.spinners += 1;
                if self.transition(word, counts) {
                    break;
                }
            }
        }

        // Spin, re-checking for a permit. The budget shrinks as the spinner
        // population grows past the processor count.
        let mut spins: u32 = 0;
        loop {
            let word = self.state.load(Ordering::Acquire);
            let mut counts = Counts::unpack(word);
            if counts.count_for_spinners > 0 {
                counts.count_for_spinners -= 1;
                counts.spinners -= 1;
                if self.transition(word, counts) {
                    return true;
                }
                continue;
            }

            let crowding = (counts.spinners as f64 / self.processors as f64).max(1.0);
            let spin_limit = (SPIN_LIMIT_PER_PROCESSOR as f64 / crowding).round() as u32;
            if spins >= spin_limit {
                counts.spinners -= 1;
                counts.waiters += 1;
                if self.transition(word, counts) {
                    break;
                }
                continue;
            }

            // Yield the timeslice, including to lower-priority threads; a
            // pure pause would starve them on a saturated machine.
            thread::sleep(Duration::from_millis(1));
            spins += 1;
        }

        // Blocked tier.
        let acquired = self.kernel.wait(timeout);
        loop {
            let word = self.state.load(Ordering::Acquire);
            let mut counts = Counts::unpack(word);
            counts.waiters -= 1;
            if acquired {
                debug_assert!(counts.count_for_waiters > 0);
                counts.count_for_waiters -= 1;
            }
            if self.transition(word, counts) {
                return acquired;
            }
        }
    }

    /// Makes `count` permits available, preferring spinners. Permits that
    /// find neither a spinner nor a blocked waiter are banked for future
    /// spinners.
    pub fn release(&self, count: u16) {
        debug_assert!(count > 0);
        loop {
            let word = self.state.load(Ordering::Acquire);
            let counts = Counts::unpack(word);

            let spinners_to_release =
                count.min(counts.spinners.saturating_sub(counts.count_for_spinners));
            let waiters_to_release = (count - spinners_to_release)
                .min(counts.waiters.saturating_sub(counts.count_for_waiters));
            let banked = count - spinners_to_release - waiters_to_release;

            let mut next = counts;
            next.count_for_spinners += spinners_to_release + banked;
            next.count_for_waiters += waiters_to_release;

            if self.transition(word, next) {
                if waiters_to_release > 0 {
                    self.kernel.release(waiters_to_release as u32);
                }
                return;
            }
        }
    }

    /// Threads currently idle in the semaphore and not yet promised a
    /// permit. A relaxed hint for spawn decisions, not a synchronized count.
    pub fn idle_workers(&self) -> usize {
        let counts = Counts::unpack(self.state.load(Ordering::Relaxed));
        let idle = counts.spinners as usize + counts.waiters as usize;
        let promised = counts.count_for_spinners as usize + counts.count_for_waiters as usize;
        idle.saturating_sub(promised)
    }
}

impl Default for UnfairSemaphore {
    fn default() -> Self {
        Self::new()
    }
}
