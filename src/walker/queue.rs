//! Rank-local work queue
//!
//! Items are processed from the front. Items received from a peer are put
//! back on the front so they run before anything already queued, and a peer
//! asking for work gets a contiguous run split off the front.

use std::collections::VecDeque;

/// Statistics for the local queue
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct QueueStats {
    /// Items pushed by the processing hook
    pub pushed: u64,

    /// Items popped for processing
    pub popped: u64,

    /// Items received from peers
    pub received: u64,

    /// Items split off and handed to peers
    pub given: u64,
}

/// Double-ended queue of opaque work items
#[derive(Debug, Clone)]
pub struct LocalQueue<T> {
    items: VecDeque<T>,
    stats: QueueStats,
}

impl<T> Default for LocalQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> LocalQueue<T> {
    /// Create an empty queue
    pub fn new() -> Self {
        Self {
            items: VecDeque::new(),
            stats: QueueStats::default(),
        }
    }

    /// Seed the queue. Seeding does not count towards `pushed`.
    pub fn seed(&mut self, items: impl IntoIterator<Item = T>) {
        self.items.extend(items);
    }

    /// Current queue length
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Check if the queue is empty
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Take the next item to process
    pub fn pop_front(&mut self) -> Option<T> {
        let item = self.items.pop_front();
        if item.is_some() {
            self.stats.popped += 1;
        }
        item
    }

    /// Queue an item discovered while processing
    pub fn push_back(&mut self, item: T) {
        self.stats.pushed += 1;
        self.items.push_back(item);
    }

    /// Put items received from a peer ahead of everything queued,
    /// keeping their relative order
    pub fn push_front_many(&mut self, items: Vec<T>) {
        self.stats.received += items.len() as u64;
        for item in items.into_iter().rev() {
            self.items.push_front(item);
        }
    }

    /// Remove and return the first `at` items, keeping the remainder.
    ///
    /// `at` is clamped to the queue length.
    pub fn split_front(&mut self, at: usize) -> Vec<T> {
        let at = at.min(self.items.len());
        self.stats.given += at as u64;
        self.items.drain(..at).collect()
    }

    /// Iterate over queued items, front first
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    /// Queue statistics
    pub fn stats(&self) -> &QueueStats {
        &self.stats
    }
}
