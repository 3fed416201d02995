//! Ready queue for work items awaiting a free worker slot.
//!
//! Max-heap on score: the highest-scoring ready item dequeues first. Ties
//! break by insertion order (FIFO among equals), so dequeue order is stable
//! and deterministic.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// One queued entry. Serialized as part of the pool snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub item_id: String,
    pub score: i64,
    /// Insertion sequence, used as the stable tie-break.
    pub seq: u64,
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Higher score wins; among equal scores, earlier insertion wins.
        self.score
            .cmp(&other.score)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Priority queue over ready work items.
#[derive(Debug, Default)]
pub struct ReadyQueue {
    heap: BinaryHeap<QueueEntry>,
    next_seq: u64,
}

impl ReadyQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, item_id: impl Into<String>, score: i64) {
        let entry = QueueEntry {
            item_id: item_id.into(),
            score,
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.heap.push(entry);
    }

    pub fn dequeue(&mut self) -> Option<QueueEntry> {
        self.heap.pop()
    }

    pub fn peek(&self) -> Option<&QueueEntry> {
        self.heap.peek()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn contains(&self, item_id: &str) -> bool {
        self.heap.iter().any(|e| e.item_id == item_id)
    }

    /// Snapshot of queued entries for persistence. Order is unspecified;
    /// `restore` rebuilds heap invariants and the sequence counter.
    pub fn entries(&self) -> Vec<QueueEntry> {
        self.heap.iter().cloned().collect()
    }

    pub fn restore(entries: Vec<QueueEntry>) -> Self {
        let next_seq = entries.iter().map(|e| e.seq + 1).max().unwrap_or(0);
        Self {
            heap: entries.into_iter().collect(),
            next_seq,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dequeue_highest_score_first() {
        let mut queue = ReadyQueue::new();
        for (id, score) in [("a", 25), ("b", 100), ("c", 50), ("d", 75)] {
            queue.enqueue(id, score);
        }

        let scores: Vec<i64> = std::iter::from_fn(|| queue.dequeue())
            .map(|e| e.score)
            .collect();
        assert_eq!(scores, vec![100, 75, 50, 25]);
    }

    #[test]
    fn test_order_independent_of_insertion() {
        let mut queue = ReadyQueue::new();
        for (id, score) in [("b", 100), ("d", 75), ("a", 25), ("c", 50)] {
            queue.enqueue(id, score);
        }

        let scores: Vec<i64> = std::iter::from_fn(|| queue.dequeue())
            .map(|e| e.score)
            .collect();
        assert_eq!(scores, vec![100, 75, 50, 25]);
    }

    #[test]
    fn test_equal_scores_dequeue_fifo() {
        let mut queue = ReadyQueue::new();
        queue.enqueue("first", 10);
        queue.enqueue("second", 10);
        queue.enqueue("third", 10);

        let ids: Vec<String> = std::iter::from_fn(|| queue.dequeue())
            .map(|e| e.item_id)
            .collect();
        assert_eq!(ids, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_contains_and_len() {
        let mut queue = ReadyQueue::new();
        assert!(queue.is_empty());

        queue.enqueue("x", 1);
        assert_eq!(queue.len(), 1);
        assert!(queue.contains("x"));
        assert!(!queue.contains("y"));
    }

    #[test]
    fn test_restore_preserves_order_and_sequence() {
        let mut queue = ReadyQueue::new();
        queue.enqueue("a", 10);
        queue.enqueue("b", 20);
        queue.enqueue("c", 10);

        let mut restored = ReadyQueue::restore(queue.entries());

        // New insertions tie-break after restored ones.
        restored.enqueue("d", 10);

        let ids: Vec<String> = std::iter::from_fn(|| restored.dequeue())
            .map(|e| e.item_id)
            .collect();
        assert_eq!(ids, vec!["b", "a", "c", "d"]);
    }
}
