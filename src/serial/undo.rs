//! Bounded chain of in-memory undo snapshots.

use std::collections::VecDeque;

use log::debug;

use crate::error::SnapshotError;

#[derive(Debug, Clone)]
pub struct UndoChain {
    levels: usize,
    snapshots: VecDeque<Vec<u8>>,
}

impl UndoChain {
    pub fn new(levels: usize) -> Self {
        Self {
            levels,
            snapshots: VecDeque::with_capacity(levels),
        }
    }

    pub fn levels(&self) -> usize {
        self.levels
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// Store a snapshot, evicting the oldest one when the chain is full.
    pub fn push(&mut self, snapshot: Vec<u8>) -> Result<(), SnapshotError> {
        if self.levels == 0 {
            return Err(SnapshotError::UndoDisabled);
        }
        if self.snapshots.len() == self.levels {
            self.snapshots.pop_front();
            debug!(target: "glulx::serial", "undo chain full; dropped oldest snapshot");
        }
        self.snapshots.push_back(snapshot);
        Ok(())
    }

    /// Newest snapshot, without removing it.
    pub fn newest(&self) -> Option<&[u8]> {
        self.snapshots.back().map(Vec::as_slice)
    }

    /// Remove and return the newest snapshot.
    pub fn pop(&mut self) -> Option<Vec<u8>> {
        self.snapshots.pop_back()
    }

    pub fn clear(&mut self) {
        self.snapshots.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oldest_snapshot_is_evicted() {
        let mut chain = UndoChain::new(2);
        chain.push(vec![1]).unwrap();
        chain.push(vec![2]).unwrap();
        chain.push(vec![3]).unwrap();
        assert_eq!(chain.len(), 2);
        assert_eq!(chain.pop(), Some(vec![3]));
        assert_eq!(chain.pop(), Some(vec![2]));
        assert_eq!(chain.pop(), None);
    }

    #[test]
    fn zero_levels_disables_undo() {
        let mut chain = UndoChain::new(0);
        assert_eq!(chain.push(vec![1]), Err(SnapshotError::UndoDisabled));
        assert!(chain.is_empty());
    }

    #[test]
    fn newest_peeks() {
        let mut chain = UndoChain::new(3);
        chain.push(vec![1]).unwrap();
        chain.push(vec![2]).unwrap();
        assert_eq!(chain.newest(), Some(&[2u8][..]));
        chain.clear();
        assert_eq!(chain.newest(), None);
    }
}
