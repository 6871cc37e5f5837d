//! Read-only mirrors of ledger records.

use crate::assertion::Assertion;
use crate::hash::Hash;
use crate::identifiers::{BlockNumber, ChallengeId, NodeNum, Wei};
use serde::{Deserialize, Serialize};

/// A node in the dispute tree, as recorded by the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub num: NodeNum,
    /// Parent-chain block at which the node was proposed.
    pub parent_chain_block_proposed: BlockNumber,
    pub assertion: Assertion,
    /// Inbox message count the assertion was made against.
    pub inbox_max_count: u64,
    pub node_hash: Hash,
    pub wasm_module_root: Hash,
}

/// One participant's stake, as recorded by the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakerRecord {
    pub amount_staked: Wei,
    pub latest_staked_node: NodeNum,
    /// Set exactly while the staker is in an active dispute.
    pub current_challenge: Option<ChallengeId>,
}

impl StakerRecord {
    /// Whether the staker is currently in a dispute.
    pub fn in_challenge(&self) -> bool {
        self.current_challenge.is_some()
    }
}

/// Outcome class of a ledger-side conflict search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConflictKind {
    /// Both stakers are on the same branch.
    None,
    /// The stakers are on incompatible branches.
    Found,
    /// The search could not decide yet.
    Indeterminate,
    /// The depth limit was reached before a common ancestor was found.
    Incomplete,
}

/// Result of searching for a conflict between two stakers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub kind: ConflictKind,
    pub node1: NodeNum,
    pub node2: NodeNum,
}

impl ConflictRecord {
    /// A record with no conflict.
    pub fn none() -> Self {
        Self {
            kind: ConflictKind::None,
            node1: NodeNum::GENESIS,
            node2: NodeNum::GENESIS,
        }
    }

    /// Return the record with `node1 <= node2`, plus whether the nodes were
    /// swapped. Callers must swap any per-node companions (stakers) to match.
    pub fn normalized(self) -> (Self, bool) {
        if self.node1 <= self.node2 {
            (self, false)
        } else {
            (
                Self {
                    kind: self.kind,
                    node1: self.node2,
                    node2: self.node1,
                },
                true,
            )
        }
    }
}

/// Whether the first unresolved node can be decided now, and how.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConfirmType {
    /// Not decidable yet.
    None,
    /// Can be confirmed.
    Valid,
    /// Can be rejected.
    Invalid,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_swaps_descending_pair() {
        let rec = ConflictRecord {
            kind: ConflictKind::Found,
            node1: NodeNum(5),
            node2: NodeNum(3),
        };
        let (norm, swapped) = rec.normalized();
        assert!(swapped);
        assert_eq!(norm.node1, NodeNum(3));
        assert_eq!(norm.node2, NodeNum(5));
        assert_eq!(norm.kind, ConflictKind::Found);
    }

    #[test]
    fn test_normalize_keeps_ascending_pair() {
        let rec = ConflictRecord {
            kind: ConflictKind::Found,
            node1: NodeNum(2),
            node2: NodeNum(4),
        };
        assert_eq!(rec.normalized(), (rec, false));
    }

    #[test]
    fn test_in_challenge() {
        let mut rec = StakerRecord {
            amount_staked: 1,
            latest_staked_node: NodeNum(1),
            current_challenge: None,
        };
        assert!(!rec.in_challenge());
        rec.current_challenge = Some(ChallengeId(1));
        assert!(rec.in_challenge());
    }
}
