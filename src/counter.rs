//! Completion tracking for submitted work.
//!
//! A counter starts at the number of jobs it tracks and counts down as they
//! finish. Callers poll [`is_complete`](Counter::is_complete) or block via
//! [`ThreadPool::wait_for_counter`](crate::ThreadPool::wait_for_counter).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// A thread-safe countdown shared between submitter and workers.
#[derive(Clone)]
pub struct Counter {
    remaining: Arc<AtomicUsize>,
}

impl Counter {
    pub fn new(initial: usize) -> Self {
        Counter {
            remaining: Arc::new(AtomicUsize::new(initial)),
        }
    }

    /// Adds one more job to the count.
    pub fn increment(&self) {
        self.remaining.fetch_add(1, Ordering::SeqCst);
    }

    /// Marks one tracked job as finished.
    pub fn decrement(&self) {
        self.remaining.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn value(&self) -> usize {
        self.remaining.load(Ordering::SeqCst)
    }

    /// True once every tracked job has finished.
    pub fn is_complete(&self) -> bool {
        self.value() == 0
    }
}

impl Default for Counter {
    fn default() -> Self {
        Counter::new(0)
    }
}
