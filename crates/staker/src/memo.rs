//! Nodes an inactive agent has already judged correct.
//!
//! A watchtower or defensive agent walks forward through correct nodes
//! without staking on them. The memo remembers where it got to and which
//! nodes it passed, so a later tick neither re-validates them nor misses
//! the chance to fast-confirm one.

use arbiter_types::{Hash, NodeNum};
use std::collections::BTreeSet;

/// Ordered set of validated `(number, hash)` pairs plus the last node
/// checked.
///
/// Safe to discard at any point: losing it costs recomputation only.
#[derive(Debug, Default)]
pub struct InactiveMemo {
    /// Validated nodes ordered by number, then hash.
    validated: BTreeSet<(NodeNum, Hash)>,
    /// Furthest node an inactive walk reached.
    last_checked: Option<(NodeNum, Hash)>,
}

impl InactiveMemo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a validated node and move the walk position to it.
    pub fn record(&mut self, number: NodeNum, hash: Hash) {
        self.validated.insert((number, hash));
        self.last_checked = Some((number, hash));
    }

    /// Whether this exact node was validated.
    pub fn contains(&self, number: NodeNum, hash: Hash) -> bool {
        self.validated.contains(&(number, hash))
    }

    /// Furthest node an inactive walk reached.
    pub fn last_checked(&self) -> Option<(NodeNum, Hash)> {
        self.last_checked
    }

    /// Forget the walk position but keep validated nodes.
    pub fn clear_last_checked(&mut self) {
        self.last_checked = None;
    }

    /// Drop validated nodes at or below `latest_confirmed`.
    ///
    /// Returns the number of entries removed.
    pub fn prune_confirmed(&mut self, latest_confirmed: NodeNum) -> usize {
        let mut removed = 0;
        while let Some(&(number, _)) = self.validated.first() {
            if number > latest_confirmed {
                break;
            }
            self.validated.pop_first();
            removed += 1;
        }
        removed
    }

    /// Forget everything.
    pub fn clear(&mut self) {
        self.validated.clear();
        self.last_checked = None;
    }

    pub fn len(&self) -> usize {
        self.validated.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validated.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn h(n: u8) -> Hash {
        Hash::from_bytes(&[n])
    }

    #[test]
    fn test_record_and_contains() {
        let mut memo = InactiveMemo::new();
        memo.record(NodeNum(3), h(3));

        assert!(memo.contains(NodeNum(3), h(3)));
        assert!(!memo.contains(NodeNum(3), h(4)), "hash must match too");
        assert_eq!(memo.last_checked(), Some((NodeNum(3), h(3))));
    }

    #[test]
    fn test_prune_removes_confirmed_prefix() {
        let mut memo = InactiveMemo::new();
        for n in 1..=5 {
            memo.record(NodeNum(n), h(n as u8));
        }

        assert_eq!(memo.prune_confirmed(NodeNum(3)), 3);
        assert_eq!(memo.len(), 2);
        assert!(!memo.contains(NodeNum(3), h(3)));
        assert!(memo.contains(NodeNum(4), h(4)));
        // The walk position is unaffected by pruning.
        assert_eq!(memo.last_checked(), Some((NodeNum(5), h(5))));
    }

    #[test]
    fn test_clear() {
        let mut memo = InactiveMemo::new();
        memo.record(NodeNum(1), h(1));
        memo.clear_last_checked();
        assert_eq!(memo.last_checked(), None);
        assert_eq!(memo.len(), 1);

        memo.clear();
        assert!(memo.is_empty());
    }
}
