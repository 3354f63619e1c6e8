//! Fixed-capacity storage for long-running sessions
//!
//! Every per-session collection that grows with the number of requests is
//! held in a [`BoundedBuffer`], so memory stays flat regardless of run length.

use std::collections::VecDeque;

use serde::Serialize;

/// Ring storage that silently evicts the oldest element once full
#[derive(Debug, Clone)]
pub struct BoundedBuffer<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> BoundedBuffer<T> {
    /// Create an empty buffer holding at most `capacity` elements
    ///
    /// A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append an element, returning the evicted one if the buffer was full
    pub fn push(&mut self, item: T) -> Option<T> {
        let evicted = if self.items.len() == self.capacity {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(item);
        evicted
    }

    /// Number of elements currently held
    pub fn count(&self) -> usize {
        self.items.len()
    }

    /// Maximum number of elements
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether the next push will evict
    pub fn is_full(&self) -> bool {
        self.items.len() == self.capacity
    }

    /// Whether the buffer holds nothing
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Iterate oldest to newest
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + ExactSizeIterator {
        self.items.iter()
    }

    /// Most recently pushed element
    pub fn latest(&self) -> Option<&T> {
        self.items.back()
    }

    /// Drop all elements, keeping the allocation
    pub fn clear(&mut self) {
        self.items.clear();
    }
}

impl<T: Clone> BoundedBuffer<T> {
    /// Copy of the contents, oldest to newest
    pub fn snapshot(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }
}

impl<T: Copy + Into<f64>> BoundedBuffer<T> {
    /// Sum over the elements currently held
    pub fn sum(&self) -> f64 {
        self.items.iter().map(|&v| v.into()).sum()
    }

    /// Mean over the elements currently held, zero when empty
    pub fn average(&self) -> f64 {
        if self.items.is_empty() {
            0.0
        } else {
            self.sum() / self.items.len() as f64
        }
    }
}

impl<T: Serialize> Serialize for BoundedBuffer<T> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.items.iter())
    }
}

/// Mean and sum over the last N samples, updated in O(1)
///
/// Backed by a [`BoundedBuffer`]; the running sum is adjusted by the evicted
/// value on every push. Observable behaviour matches
/// [`BoundedBuffer::average`] over the same window.
#[derive(Debug, Clone)]
pub struct RunningAverage {
    window: BoundedBuffer<f64>,
    sum: f64,
}

impl RunningAverage {
    /// Track the last `capacity` samples
    pub fn new(capacity: usize) -> Self {
        Self {
            window: BoundedBuffer::new(capacity),
            sum: 0.0,
        }
    }

    /// Record a sample
    pub fn push(&mut self, value: f64) {
        if let Some(evicted) = self.window.push(value) {
            self.sum -= evicted;
        }
        self.sum += value;
    }

    /// Sum of the samples in the window
    pub fn sum(&self) -> f64 {
        self.sum
    }

    /// Mean of the samples in the window, zero when empty
    pub fn average(&self) -> f64 {
        match self.window.count() {
            0 => 0.0,
            n => self.sum / n as f64,
        }
    }

    /// Samples currently in the window
    pub fn count(&self) -> usize {
        self.window.count()
    }

    /// Whether the window is at capacity
    pub fn is_full(&self) -> bool {
        self.window.is_full()
    }

    /// Samples oldest to newest
    pub fn snapshot(&self) -> Vec<f64> {
        self.window.snapshot()
    }

    /// Reset to empty
    pub fn clear(&mut self) {
        self.window.clear();
        self.sum = 0.0;
    }
}
