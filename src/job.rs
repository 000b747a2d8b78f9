//! Work items executed by the pool.

use crate::counter::Counter;

/// A unit of work: a boxed closure plus an optional completion counter
/// decremented after the closure returns.
pub struct Job {
    work: Box<dyn FnOnce() + Send + 'static>,
    counter: Option<Counter>,
}

impl Job {
    pub fn new<F>(work: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Job {
            work: Box::new(work),
            counter: None,
        }
    }

    /// Creates a job that decrements `counter` when it completes.
    pub fn with_counter<F>(work: F, counter: Counter) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Job {
            work: Box::new(work),
            counter: Some(counter),
        }
    }

    pub(crate) fn from_boxed(
        work: Box<dyn FnOnce() + Send + 'static>,
        counter: Option<Counter>,
    ) -> Self {
        Job { work, counter }
    }

    /// Runs the closure, then signals completion. A panic in the closure
    /// propagates to the caller and skips the counter decrement.
    pub fn execute(self) {
        (self.work)();
        if let Some(counter) = self.counter {
            counter.decrement();
        }
    }
}
