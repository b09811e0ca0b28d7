//! Bounded clipboard history

use std::collections::VecDeque;

use crate::protocol::Snapshot;
use crate::{Error, Result};

/// Snapshots ordered oldest first, capped at `limit` entries.
///
/// Pushing evicts from the front once the cap is reached, and a snapshot
/// equal to the current newest entry is dropped.
#[derive(Debug, Clone)]
pub struct History {
    entries: VecDeque<Snapshot>,
    limit: usize,
}

impl History {
    /// A zero limit is treated as one
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            entries: VecDeque::with_capacity(limit),
            limit,
        }
    }

    /// Append a snapshot; returns whether history changed
    pub fn push(&mut self, snapshot: Snapshot) -> bool {
        if self.entries.back() == Some(&snapshot) {
            return false;
        }

        while self.entries.len() >= self.limit {
            self.entries.pop_front();
        }
        self.entries.push_back(snapshot);
        true
    }

    /// Remove exactly one entry; later entries shift down by one
    pub fn delete_at(&mut self, index: usize) -> Result<Snapshot> {
        let len = self.entries.len();
        self.entries
            .remove(index)
            .ok_or(Error::HistoryIndexOutOfRange { index, len })
    }

    pub fn to_vec(&self) -> Vec<Snapshot> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(s: &str) -> Snapshot {
        Snapshot::text(s)
    }

    #[test]
    fn test_never_exceeds_limit_and_evicts_oldest() {
        let mut history = History::new(3);
        for i in 0..10 {
            history.push(snap(&i.to_string()));
            assert!(history.len() <= 3);
        }
        assert_eq!(history.to_vec(), vec![snap("7"), snap("8"), snap("9")]);
    }

    #[test]
    fn test_duplicate_tail_is_noop() {
        let mut history = History::new(5);
        assert!(history.push(snap("a")));
        assert!(!history.push(snap("a")));
        assert_eq!(history.len(), 1);

        // Only the tail is compared
        assert!(history.push(snap("b")));
        assert!(history.push(snap("a")));
        assert_eq!(history.to_vec(), vec![snap("a"), snap("b"), snap("a")]);
    }

    #[test]
    fn test_no_consecutive_duplicates_under_mixed_arrivals() {
        let mut history = History::new(4);
        for s in ["a", "a", "b", "b", "b", "c", "a", "a", "d", "d", "e"] {
            history.push(snap(s));
            let entries = history.to_vec();
            assert!(entries.windows(2).all(|w| w[0] != w[1]));
            assert!(entries.len() <= 4);
        }
        assert_eq!(history.to_vec(), vec![snap("c"), snap("a"), snap("d"), snap("e")]);
    }

    #[test]
    fn test_delete_at_shifts_later_entries() {
        let mut history = History::new(5);
        for s in ["a", "b", "c", "d"] {
            history.push(snap(s));
        }

        assert_eq!(history.delete_at(1).unwrap(), snap("b"));
        assert_eq!(history.to_vec(), vec![snap("a"), snap("c"), snap("d")]);
    }

    #[test]
    fn test_delete_out_of_range_is_error() {
        let mut history = History::new(5);
        history.push(snap("a"));

        match history.delete_at(3) {
            Err(Error::HistoryIndexOutOfRange { index, len }) => {
                assert_eq!((index, len), (3, 1));
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn test_zero_limit_keeps_one() {
        let mut history = History::new(0);
        history.push(snap("a"));
        history.push(snap("b"));
        assert_eq!(history.to_vec(), vec![snap("b")]);
        assert_eq!(history.limit(), 1);
    }
}
