#![expect(
    clippy::module_name_repetitions,
    reason = "History type names the buffer it provides"
)]

use std::collections::VecDeque;

/// Fixed-capacity message buffer that evicts the oldest entry when full.
#[derive(Debug, Clone)]
pub struct MessageHistory<M> {
    entries: VecDeque<M>,
    capacity: usize,
}

impl<M> MessageHistory<M> {
    /// Create an empty history. A capacity of zero is raised to one.
    ///
    /// Storage grows with the entries pushed, up to `capacity`.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::new(),
            capacity,
        }
    }

    /// Append a message, returning the evicted entry if the buffer was full.
    pub fn push(&mut self, message: M) -> Option<M> {
        let evicted = if self.entries.len() == self.capacity {
            self.entries.pop_front()
        } else {
            None
        };
        self.entries.push_back(message);
        evicted
    }

    /// Most recently received message.
    #[must_use]
    pub fn latest(&self) -> Option<&M> {
        self.entries.back()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Entries from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &M> {
        self.entries.iter()
    }
}

impl<M: Clone> MessageHistory<M> {
    #[must_use]
    pub fn to_vec(&self) -> Vec<M> {
        self.entries.iter().cloned().collect()
    }
}
