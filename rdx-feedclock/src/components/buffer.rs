//! The arrival buffer: samples received from the network, oldest first.

use crate::sample::Sample;
use std::collections::VecDeque;

/// An ordered queue of samples awaiting display.
///
/// Batches are appended wholesale at the tail and are assumed to already be
/// sorted; the buffer never reorders. Playback consumes from the front.
#[derive(Debug, Default, Clone)]
pub struct ArrivalBuffer {
    samples: VecDeque<Sample>,
}

impl ArrivalBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Concatenates a batch to the tail.
    pub fn append(&mut self, batch: impl IntoIterator<Item = Sample>) {
        self.samples.extend(batch);
    }

    pub fn peek_front(&self) -> Option<&Sample> {
        self.samples.front()
    }

    pub fn pop_front(&mut self) -> Option<Sample> {
        self.samples.pop_front()
    }

    pub fn last(&self) -> Option<&Sample> {
        self.samples.back()
    }

    pub fn get(&self, index: usize) -> Option<&Sample> {
        self.samples.get(index)
    }

    /// Buffered sample-time: `last.timestamp - first.timestamp`, or `0.0` when empty.
    pub fn span(&self) -> f64 {
        match (self.samples.front(), self.samples.back()) {
            (Some(first), Some(last)) => last.timestamp - first.timestamp,
            _ => 0.0,
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Drops samples from the front while `predicate` holds. Returns how many went.
    pub fn evict_while(&mut self, mut predicate: impl FnMut(&Sample) -> bool) -> usize {
        let mut evicted = 0;
        while self.samples.front().is_some_and(&mut predicate) {
            self.samples.pop_front();
            evicted += 1;
        }
        evicted
    }

    /// Drops every sample at or before `position`.
    pub fn evict_through(&mut self, position: f64) -> usize {
        self.evict_while(|s| s.timestamp <= position)
    }

    /// Drops every sample strictly before `position`.
    pub fn evict_before(&mut self, position: f64) -> usize {
        self.evict_while(|s| s.timestamp < position)
    }

    /// Drops the `count` oldest samples (or all of them, if fewer are buffered).
    pub fn evict_front(&mut self, count: usize) -> usize {
        let count = count.min(self.samples.len());
        self.samples.drain(..count);
        count
    }

    pub fn iter(&self) -> impl Iterator<Item = &Sample> {
        self.samples.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer_of(timestamps: &[f64]) -> ArrivalBuffer {
        let mut buffer = ArrivalBuffer::new();
        buffer.append(timestamps.iter().copied().map(Sample::empty));
        buffer
    }

    #[test]
    fn empty_buffer_queries_are_defined() {
        let mut buffer = ArrivalBuffer::new();
        assert_eq!(buffer.span(), 0.0);
        assert!(buffer.peek_front().is_none());
        assert!(buffer.pop_front().is_none());
        assert_eq!(buffer.evict_through(100.0), 0);
    }

    #[test]
    fn appends_keep_arrival_order() {
        let mut buffer = buffer_of(&[1.0, 1.5]);
        buffer.append(vec![Sample::empty(2.0), Sample::empty(2.5)]);
        let order: Vec<f64> = buffer.iter().map(|s| s.timestamp).collect();
        assert_eq!(order, vec![1.0, 1.5, 2.0, 2.5]);
        assert_eq!(buffer.span(), 1.5);
    }

    #[test]
    fn single_sample_has_zero_span() {
        assert_eq!(buffer_of(&[7.0]).span(), 0.0);
    }

    #[test]
    fn eviction_boundaries() {
        let mut buffer = buffer_of(&[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(buffer.evict_before(2.0), 1);
        assert_eq!(buffer.peek_front().map(|s| s.timestamp), Some(2.0));
        assert_eq!(buffer.evict_through(3.0), 2);
        assert_eq!(buffer.peek_front().map(|s| s.timestamp), Some(4.0));
        assert_eq!(buffer.evict_front(5), 1);
        assert!(buffer.is_empty());
    }
}
