//! FIFO mailbox used to hand fragments from a session to its engine.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use super::errors::{QueryError, Result};

/// Queue handle shared between a [`crate::db::Database`] and the engine
/// attached to it.
pub type SharedQueue<T> = Arc<Mutex<Queue<T>>>;

/// Append-at-tail, remove-at-head container.
///
/// The queue performs no locking of its own; share it through
/// [`SharedQueue`] when producers and the drain loop live on different
/// threads.
#[derive(Debug)]
pub struct Queue<T> {
    items: VecDeque<T>,
}

impl<T> Default for Queue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Queue<T> {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self {
            items: VecDeque::new(),
        }
    }

    /// Creates an empty queue wrapped in a shareable handle.
    pub fn shared() -> SharedQueue<T> {
        Arc::new(Mutex::new(Self::new()))
    }

    /// Resets the queue to empty.
    pub fn init(&mut self) {
        self.items = VecDeque::new();
    }

    /// Appends an item at the tail.
    pub fn push(&mut self, item: T) {
        self.items.push_back(item);
    }

    /// Removes and returns the head of the queue.
    ///
    /// Callers are expected to check [`Queue::is_empty`] first; an empty read
    /// is an invariant violation and surfaces as [`QueryError::EmptyQueue`].
    pub fn get(&mut self) -> Result<T> {
        self.items.pop_front().ok_or(QueryError::EmptyQueue)
    }

    /// Returns the head without removing it.
    pub fn peek(&self) -> Option<&T> {
        self.items.front()
    }

    /// Returns true when no items are queued.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Number of queued items.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Drops every queued item.
    pub fn clear(&mut self) {
        self.items.clear();
    }
}
