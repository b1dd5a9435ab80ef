//! Processing hook
//!
//! The walker calls the hook once per dequeued item with the rank's result
//! accumulator. A hook that discovers more work (a directory's
//! subdirectories, for example) pushes it through the [`WorkSink`].
//!
//! Keep hooks short. A rank stuck inside one cannot answer work requests or
//! pass the token on.

use super::queue::LocalQueue;

/// Handle for queueing items discovered while processing
pub struct WorkSink<'a, T> {
    queue: &'a mut LocalQueue<T>,
    pushed: usize,
}

impl<'a, T> WorkSink<'a, T> {
    pub(crate) fn new(queue: &'a mut LocalQueue<T>) -> Self {
        Self { queue, pushed: 0 }
    }

    /// Queue one item at the back of the local queue
    pub fn push(&mut self, item: T) {
        self.queue.push_back(item);
        self.pushed += 1;
    }

    /// Items pushed through this sink
    pub fn pushed(&self) -> usize {
        self.pushed
    }
}

/// Per-item processing capability
pub trait ProcessItem<T, R> {
    /// Process one item, updating `results` and queueing any new work
    fn process(&mut self, item: T, results: &mut R, sink: &mut WorkSink<'_, T>);
}

/// Hook that drops every item
#[derive(Debug, Default, Clone, Copy)]
pub struct Discard;

impl<T, R> ProcessItem<T, R> for Discard {
    fn process(&mut self, _item: T, _results: &mut R, _sink: &mut WorkSink<'_, T>) {}
}

/// Hook built from a closure, see [`from_fn`]
#[derive(Debug, Clone)]
pub struct FnProcessor<F>(F);

/// Build a hook from a closure
///
/// ```
/// use ring_walker::walker::{from_fn, WorkSink};
///
/// let counter = from_fn(|_item: String, count: &mut u64, _sink: &mut WorkSink<'_, String>| {
///     *count += 1;
/// });
/// # let _ = counter;
/// ```
pub fn from_fn<T, R, F>(f: F) -> FnProcessor<F>
where
    F: FnMut(T, &mut R, &mut WorkSink<'_, T>),
{
    FnProcessor(f)
}

impl<T, R, F> ProcessItem<T, R> for FnProcessor<F>
where
    F: FnMut(T, &mut R, &mut WorkSink<'_, T>),
{
    fn process(&mut self, item: T, results: &mut R, sink: &mut WorkSink<'_, T>) {
        (self.0)(item, results, sink)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closure_hook_updates_results_and_queue() {
        let mut queue = LocalQueue::new();
        let mut hook = from_fn(|item: u32, sum: &mut u32, sink: &mut WorkSink<'_, u32>| {
            *sum += item;
            if item > 1 {
                sink.push(item - 1);
            }
        });

        let mut sum = 0;
        let mut sink = WorkSink::new(&mut queue);
        hook.process(3, &mut sum, &mut sink);
        assert_eq!(sink.pushed(), 1);

        assert_eq!(sum, 3);
        assert_eq!(queue.pop_front(), Some(2));
    }

    #[test]
    fn test_discard_leaves_everything_alone() {
        let mut queue: LocalQueue<u32> = LocalQueue::new();
        let mut results = 7u32;
        Discard.process(1, &mut results, &mut WorkSink::new(&mut queue));
        assert_eq!(results, 7);
        assert!(queue.is_empty());
    }
}
