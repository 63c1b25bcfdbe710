//! Thread-safe FIFO buffer for pending events.
//!
//! Producers push from any thread; the dispatcher drains in batches.
//! The queue is unbounded: callers control growth by draining on a
//! schedule.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A thread-safe FIFO queue.
///
/// Cloning is cheap and yields a handle to the same underlying buffer.
#[derive(Debug)]
pub struct EventQueue<T> {
    inner: Arc<Mutex<VecDeque<T>>>,
}

impl<T> Clone for EventQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for EventQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> EventQueue<T> {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    /// Append a single item to the back of the queue.
    pub fn push(&self, item: T) {
        let mut buffer = self.lock();
        buffer.push_back(item);
        tracing::debug!(queued = buffer.len(), "pushed onto event queue");
    }

    /// Append every item, in order, to the back of the queue.
    pub fn push_all(&self, items: impl IntoIterator<Item = T>) {
        let mut buffer = self.lock();
        let before = buffer.len();
        for item in items {
            buffer.push_back(item);
        }
        if buffer.len() > before {
            tracing::debug!(
                added = buffer.len() - before,
                queued = buffer.len(),
                "pushed batch onto event queue"
            );
        }
    }

    /// Remove and return the oldest item, or None when empty.
    pub fn pop(&self) -> Option<T> {
        let mut buffer = self.lock();
        let item = buffer.pop_front();
        if item.is_some() {
            tracing::debug!(remaining = buffer.len(), "popped from event queue");
        }
        item
    }

    /// Remove and return up to `count` items from the front, oldest first.
    ///
    /// A `count` of 0 drains the entire queue. Fewer items than requested
    /// come back when the queue runs out.
    pub fn drain(&self, count: usize) -> Vec<T> {
        let mut buffer = self.lock();
        let take = if count == 0 || count > buffer.len() {
            buffer.len()
        } else {
            count
        };
        let drained: Vec<T> = buffer.drain(..take).collect();
        if !drained.is_empty() {
            tracing::debug!(
                drained = drained.len(),
                remaining = buffer.len(),
                "drained event queue"
            );
        }
        drained
    }

    /// Number of items currently queued.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the queue holds no items.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
