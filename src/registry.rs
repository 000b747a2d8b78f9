//! Copy-on-write registry of worker deques.
//!
//! Stealers need random-index access to every registered deque without
//! taking a lock. The registry keeps an immutable snapshot array behind an
//! epoch-managed pointer: writers build a replacement array and swap it in
//! with a CAS loop, readers borrow the current snapshot for the duration of
//! an epoch guard. Registration and removal happen only on worker start and
//! exit, so writer contention is negligible.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crossbeam::epoch::{self, Atomic, Guard, Owned};

use crate::deque::Deque;

pub struct DequeRegistry<T> {
    deques: Atomic<Vec<Arc<Deque<T>>>>,
}

impl<T> DequeRegistry<T> {
    pub fn new() -> Self {
        DequeRegistry {
            deques: Atomic::new(Vec::new()),
        }
    }

    /// Publishes a snapshot with `deque` appended at the end.
    pub fn register(&self, deque: &Arc<Deque<T>>) {
        let guard = &epoch::pin();
        loop {
            let current = self.deques.load(Ordering::Acquire, guard);
            let old = unsafe { current.deref() };
            let mut next = Vec::with_capacity(old.len() + 1);
            next.extend(old.iter().cloned());
            next.push(Arc::clone(deque));
            match self.deques.compare_exchange(
                current,
                Owned::new(next),
                Ordering::AcqRel,
                Ordering::Acquire,
                guard,
            ) {
                Ok(_) => {
                    unsafe { guard.defer_destroy(current) };
                    return;
                }
                Err(_) => continue,
            }
        }
    }

    /// Publishes a snapshot without `deque`. Removing a deque that is not
    /// registered is a no-op.
    pub fn unregister(&self, deque: &Arc<Deque<T>>) {
        let guard = &epoch::pin();
        loop {
            let current = self.deques.load(Ordering::Acquire, guard);
            let old = unsafe { current.deref() };
            let position = match old.iter().position(|d| Arc::ptr_eq(d, deque)) {
                Some(position) => position,
                None => return,
            };
            let mut next = Vec::with_capacity(old.len() - 1);
            next.extend(
                old.iter()
                    .enumerate()
                    .filter(|(i, _)| *i != position)
                    .map(|(_, d)| Arc::clone(d)),
            );
            match self.deques.compare_exchange(
                current,
                Owned::new(next),
                Ordering::AcqRel,
                Ordering::Acquire,
                guard,
            ) {
                Ok(_) => {
                    unsafe { guard.defer_destroy(current) };
                    return;
                }
                Err(_) => continue,
            }
        }
    }

    /// Borrows the current snapshot for the lifetime of `guard`.
    pub fn snapshot<'g>(&self, guard: &'g Guard) -> &'g [Arc<Deque<T>>] {
        unsafe { self.deques.load(Ordering::Acquire, guard).deref() }
    }

    pub fn len(&self) -> usize {
        let guard = &epoch::pin();
        self.snapshot(guard).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for DequeRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for DequeRegistry<T> {
    fn drop(&mut self) {
        unsafe {
            let guard = epoch::unprotected();
            let current = self.deques.load(Ordering::Relaxed, guard);
            drop(current.into_owned());
        }
    }
}
