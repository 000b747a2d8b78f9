//! Shared FIFO for work produced outside the pool.
//!
//! Submissions from non-worker threads land here, as does work spilled by
//! exiting workers. Workers fall back to this queue when their local deque
//! is empty, before trying to steal.

use crossbeam::queue::SegQueue;

/// Multi-producer multi-consumer FIFO queue.
pub struct InjectionQueue<T> {
    queue: SegQueue<T>,
}

impl<T> InjectionQueue<T> {
    pub fn new() -> Self {
        InjectionQueue {
            queue: SegQueue::new(),
        }
    }

    pub fn enqueue(&self, item: T) {
        self.queue.push(item);
    }

    /// Removes the oldest element, or `None` when the queue is empty.
    pub fn try_dequeue(&self) -> Option<T> {
        self.queue.pop()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }
}

impl<T> Default for InjectionQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
