//! Bounded top-N / bottom-N selection over scored series indices.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Entry {
    val: f64,
    idx: usize,
}

impl Eq for Entry {}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.val
            .partial_cmp(&other.val)
            .unwrap_or(Ordering::Equal)
            .then(self.idx.cmp(&other.idx))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Keep the `n` largest scores using a size-bounded min-heap: a candidate
/// only displaces the heap's smallest member. NaN scores are skipped.
/// Draining the heap yields indices in ascending score order.
pub fn top_n(scores: impl IntoIterator<Item = (usize, f64)>, n: usize) -> Vec<usize> {
    if n == 0 {
        return Vec::new();
    }
    let mut heap: BinaryHeap<Reverse<Entry>> = BinaryHeap::with_capacity(n);
    for (idx, val) in scores {
        if val.is_nan() {
            continue;
        }
        if heap.len() < n {
            heap.push(Reverse(Entry { val, idx }));
        } else if let Some(&Reverse(smallest)) = heap.peek() {
            if val > smallest.val {
                heap.pop();
                heap.push(Reverse(Entry { val, idx }));
            }
        }
    }
    let mut out = Vec::with_capacity(heap.len());
    while let Some(Reverse(e)) = heap.pop() {
        out.push(e.idx);
    }
    out
}

/// Keep the `n` smallest scores: push everything, pop `n`. Ascending
/// score order. NaN scores are skipped.
pub fn bottom_n(scores: impl IntoIterator<Item = (usize, f64)>, n: usize) -> Vec<usize> {
    let mut heap: BinaryHeap<Reverse<Entry>> = BinaryHeap::new();
    for (idx, val) in scores {
        if val.is_nan() {
            continue;
        }
        heap.push(Reverse(Entry { val, idx }));
    }
    let mut out = Vec::with_capacity(n.min(heap.len()));
    for _ in 0..n {
        match heap.pop() {
            Some(Reverse(e)) => out.push(e.idx),
            None => break,
        }
    }
    out
}

// ═══════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_top_n_ascending_drain() {
        let scores = [(0, 5.0), (1, 9.0), (2, 1.0), (3, 7.0)];
        assert_eq!(top_n(scores, 2), vec![3, 1]);
        assert_eq!(top_n(scores, 10), vec![2, 0, 3, 1]);
        assert_eq!(top_n(scores, 0), Vec::<usize>::new());
    }

    #[test]
    fn test_top_n_skips_nan() {
        let scores = [(0, f64::NAN), (1, 2.0), (2, 3.0)];
        assert_eq!(top_n(scores, 3), vec![1, 2]);
    }

    #[test]
    fn test_bottom_n() {
        let scores = [(0, 5.0), (1, 9.0), (2, 1.0), (3, 7.0)];
        assert_eq!(bottom_n(scores, 2), vec![2, 0]);
        assert_eq!(bottom_n(scores, 10), vec![2, 0, 3, 1]);
    }
}
