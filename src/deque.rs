//! Chase–Lev work-stealing deque.
//!
//! Each worker owns one deque: the owner pushes and pops at the bottom
//! (LIFO, cache-hot), while any other thread may steal the oldest element
//! from the top. The backing ring doubles when full and halves when mostly
//! empty, always preserving the live `[top, bottom)` window.
//!
//! The concurrency contract is asymmetric. `bottom` is written only by the
//! owner; `top` advances through compare-and-swap from stealers and from the
//! owner's last-element race. Replaced backing arrays are retired through
//! the epoch collector so a stealer holding a reference to the old array
//! never observes freed memory.

use std::mem;
use std::sync::atomic::{fence, AtomicI64, Ordering};

use crossbeam::epoch::{self, Atomic, Owned};
use crossbeam::utils::CachePadded;

use crate::circular::CircularArray;

/// Initial backing capacity is `1 << LOG_INITIAL_SIZE` slots.
pub const LOG_INITIAL_SIZE: u32 = 16;

/// The owner halves the backing array when fewer than
/// `capacity / SHRINK_THRESHOLD` elements remain.
pub const SHRINK_THRESHOLD: i64 = 4;

/// Outcome of a steal attempt.
///
/// `Abort` is transient contention: another consumer won the race for the
/// top element. Callers must treat it as "try another victim", never as
/// empty.
#[derive(Debug, PartialEq, Eq)]
pub enum Steal<T> {
    /// The oldest element was taken.
    Success(T),
    /// The deque was observed empty.
    Empty,
    /// A competing consumer won the top race.
    Abort,
}

/// A work-stealing deque with one owner and many thieves.
///
/// Exclusive bottom-end access is a runtime contract: only the worker that
/// created the deque may call [`push_bottom`](Deque::push_bottom) and
/// [`pop_bottom`](Deque::pop_bottom). Any thread may call
/// [`steal`](Deque::steal).
pub struct Deque<T> {
    /// Cursor one past the newest element. Owner-written.
    bottom: CachePadded<AtomicI64>,
    /// Cursor of the oldest element. CAS-advanced by consumers.
    top: CachePadded<AtomicI64>,
    /// Current backing array, swapped out on grow and shrink.
    active: Atomic<CircularArray<T>>,
}

unsafe impl<T: Send> Send for Deque<T> {}
unsafe impl<T: Send> Sync for Deque<T> {}

impl<T> Deque<T> {
    pub fn new() -> Self {
        Self::with_log_size(LOG_INITIAL_SIZE)
    }

    pub(crate) fn with_log_size(log_size: u32) -> Self {
        Deque {
            bottom: CachePadded::new(AtomicI64::new(0)),
            top: CachePadded::new(AtomicI64::new(0)),
            active: Atomic::new(CircularArray::new(log_size)),
        }
    }

    /// Appends `item` at the bottom, doubling the backing array first if it
    /// is full. Owner only.
    pub fn push_bottom(&self, item: T) {
        let guard = &epoch::pin();
        let b = self.bottom.load(Ordering::Relaxed);
        let t = self.top.load(Ordering::Acquire);
        let mut array = self.active.load(Ordering::Acquire, guard);
        unsafe {
            if b - t >= array.deref().size() - 1 {
                let grown = Owned::new(array.deref().grow(b, t)).into_shared(guard);
                self.active.store(grown, Ordering::Release);
                guard.defer_destroy(array);
                array = grown;
            }
            array.deref().set(b, item);
        }
        self.bottom.store(b + 1, Ordering::Release);
    }

    /// Removes and returns the newest element, or `None` if the deque is
    /// empty. Owner only.
    ///
    /// Taking the last remaining element races with stealers; losing that
    /// race reports `None` even though the element existed a moment ago.
    pub fn pop_bottom(&self) -> Option<T> {
        let guard = &epoch::pin();
        let array = self.active.load(Ordering::Acquire, guard);
        let b = self.bottom.load(Ordering::Relaxed) - 1;
        self.bottom.store(b, Ordering::Relaxed);
        fence(Ordering::SeqCst);
        let t = self.top.load(Ordering::Acquire);

        if b < t {
            // Already empty; undo the reservation.
            self.bottom.store(t, Ordering::Relaxed);
            return None;
        }

        let a = unsafe { array.deref() };
        let item = unsafe { a.get(b) };

        if b > t {
            // At least one element remains; no race with stealers possible.
            if b - t < a.size() / SHRINK_THRESHOLD && a.log_size() > LOG_INITIAL_SIZE {
                unsafe {
                    let shrunk = Owned::new(a.shrink(b, t)).into_shared(guard);
                    self.active.store(shrunk, Ordering::Release);
                    guard.defer_destroy(array);
                }
            }
            return Some(item);
        }

        // Last element: race stealers for it via top.
        let won = self
            .top
            .compare_exchange(t, t + 1, Ordering::SeqCst, Ordering::Relaxed)
            .is_ok();
        self.bottom.store(t + 1, Ordering::Relaxed);
        if won {
            Some(item)
        } else {
            // A stealer took it; the bits we read belong to the thief.
            mem::forget(item);
            None
        }
    }

    /// Takes the oldest element from the top. Any thread.
    pub fn steal(&self) -> Steal<T> {
        let t = self.top.load(Ordering::Acquire);
        fence(Ordering::SeqCst);
        let b = self.bottom.load(Ordering::Acquire);
        if b <= t {
            return Steal::Empty;
        }

        let guard = &epoch::pin();
        let array = self.active.load(Ordering::Acquire, guard);
        let item = unsafe { array.deref().get(t) };
        if self
            .top
            .compare_exchange(t, t + 1, Ordering::SeqCst, Ordering::Relaxed)
            .is_ok()
        {
            Steal::Success(item)
        } else {
            mem::forget(item);
            Steal::Abort
        }
    }

    /// Number of elements currently in the deque. Racy by nature; exact
    /// only when observed by the owner with no stealers active.
    pub fn size(&self) -> i64 {
        let b = self.bottom.load(Ordering::Relaxed);
        let t = self.top.load(Ordering::Relaxed);
        (b - t).max(0)
    }

    /// Slot count of the current backing array.
    pub fn capacity(&self) -> i64 {
        let guard = &epoch::pin();
        unsafe { self.active.load(Ordering::Acquire, guard).deref().size() }
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }
}

impl<T> Default for Deque<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for Deque<T> {
    fn drop(&mut self) {
        let b = self.bottom.load(Ordering::Relaxed);
        let t = self.top.load(Ordering::Relaxed);
        unsafe {
            let guard = epoch::unprotected();
            let array = self.active.load(Ordering::Relaxed, guard);
            let a = array.deref();
            for i in t..b {
                drop(a.get(i));
            }
            drop(array.into_owned());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_pop_is_lifo() {
        let deque = Deque::with_log_size(4);
        for i in 0..10 {
            deque.push_bottom(i);
        }
        for i in (0..10).rev() {
            assert_eq!(deque.pop_bottom(), Some(i));
        }
        assert_eq!(deque.pop_bottom(), None);
    }

    #[test]
    fn steal_takes_oldest() {
        let deque = Deque::with_log_size(4);
        deque.push_bottom(1);
        deque.push_bottom(2);
        deque.push_bottom(3);
        assert_eq!(deque.steal(), Steal::Success(1));
        assert_eq!(deque.pop_bottom(), Some(3));
        assert_eq!(deque.steal(), Steal::Success(2));
        assert_eq!(deque.steal(), Steal::Empty);
    }

    #[test]
    fn grows_past_initial_capacity() {
        let deque = Deque::with_log_size(2);
        assert_eq!(deque.capacity(), 4);
        for i in 0..100 {
            deque.push_bottom(i);
        }
        assert!(deque.capacity() >= 128);
        assert_eq!(deque.size(), 100);
        let mut drained: Vec<i32> = Vec::new();
        while let Some(v) = deque.pop_bottom() {
            drained.push(v);
        }
        drained.sort_unstable();
        assert_eq!(drained, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn empty_deque_reports_empty_everywhere() {
        let deque: Deque<i32> = Deque::with_log_size(4);
        assert_eq!(deque.pop_bottom(), None);
        assert_eq!(deque.steal(), Steal::Empty);
        assert_eq!(deque.size(), 0);
        assert!(deque.is_empty());
    }

    #[test]
    fn drop_releases_remaining_elements() {
        // Boxes left in the deque must be freed exactly once on drop.
        let deque = Deque::with_log_size(4);
        for i in 0..8 {
            deque.push_bottom(Box::new(i));
        }
        deque.pop_bottom();
        drop(deque);
    }

    #[test]
    fn mixed_pop_and_steal_drain_exactly() {
        let deque = Deque::with_log_size(4);
        let n = 1000;
        for i in 0..n {
            deque.push_bottom(i);
        }
        let mut seen = Vec::new();
        loop {
            match deque.pop_bottom() {
                Some(v) => seen.push(v),
                None => break,
            }
            match deque.steal() {
                Steal::Success(v) => seen.push(v),
                Steal::Empty => break,
                Steal::Abort => unreachable!("no contention in a quiescent deque"),
            }
        }
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), n as usize);
        assert_eq!(deque.size(), 0);
    }
}
