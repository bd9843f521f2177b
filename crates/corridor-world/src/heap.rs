//! Binary min-heap keyed by a scalar `f64` cost.
//!
//! `std::collections::BinaryHeap` needs a total order on its items, which
//! `f64` does not provide. This heap compares costs with [`f64::total_cmp`]
//! and carries an arbitrary payload alongside each key, which is all the
//! multi-source Dijkstra in [`crate::field`] needs. Duplicate entries are
//! allowed; callers skip stale ones when they pop them.

use std::cmp::Ordering;

/// A min-heap of `(cost, item)` pairs.
#[derive(Debug, Clone)]
pub struct MinHeap<T> {
    entries: Vec<(f64, T)>,
}

impl<T> MinHeap<T> {
    /// Create an empty heap.
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Create an empty heap with room for `capacity` entries.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    /// Number of entries, stale ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the heap is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert an entry.
    pub fn push(&mut self, cost: f64, item: T) {
        self.entries.push((cost, item));
        let last = self.entries.len().saturating_sub(1);
        self.sift_up(last);
    }

    /// Remove and return the cheapest entry.
    pub fn pop(&mut self) -> Option<(f64, T)> {
        if self.entries.is_empty() {
            return None;
        }
        let last = self.entries.len().saturating_sub(1);
        self.entries.swap(0, last);
        let top = self.entries.pop();
        self.sift_down(0);
        top
    }

    /// Drop every entry, keeping the allocation.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn less(&self, a: usize, b: usize) -> bool {
        match (self.entries.get(a), self.entries.get(b)) {
            (Some((ca, _)), Some((cb, _))) => ca.total_cmp(cb) == Ordering::Less,
            _ => false,
        }
    }

    fn sift_up(&mut self, mut pos: usize) {
        while pos > 0 {
            let parent = (pos - 1) / 2;
            if !self.less(pos, parent) {
                break;
            }
            self.entries.swap(pos, parent);
            pos = parent;
        }
    }

    fn sift_down(&mut self, mut pos: usize) {
        let len = self.entries.len();
        loop {
            let left = 2 * pos + 1;
            let right = left + 1;
            let mut smallest = pos;
            if left < len && self.less(left, smallest) {
                smallest = left;
            }
            if right < len && self.less(right, smallest) {
                smallest = right;
            }
            if smallest == pos {
                break;
            }
            self.entries.swap(pos, smallest);
            pos = smallest;
        }
    }
}

impl<T> Default for MinHeap<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pops_in_ascending_cost_order() {
        let mut heap = MinHeap::new();
        for (cost, item) in [(5.0, 'e'), (1.0, 'a'), (3.0, 'c'), (2.0, 'b'), (4.0, 'd')] {
            heap.push(cost, item);
        }
        let order: Vec<char> = std::iter::from_fn(|| heap.pop().map(|(_, c)| c)).collect();
        assert_eq!(order, vec!['a', 'b', 'c', 'd', 'e']);
    }

    #[test]
    fn empty_heap_pops_none() {
        let mut heap: MinHeap<u8> = MinHeap::default();
        assert!(heap.pop().is_none());
        assert!(heap.is_empty());
    }

    #[test]
    fn duplicates_are_kept() {
        let mut heap = MinHeap::with_capacity(4);
        heap.push(2.0, 7_usize);
        heap.push(1.0, 7_usize);
        assert_eq!(heap.len(), 2);
        assert_eq!(heap.pop(), Some((1.0, 7)));
        assert_eq!(heap.pop(), Some((2.0, 7)));
    }
}
