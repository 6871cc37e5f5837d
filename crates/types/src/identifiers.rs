//! Domain-specific identifier types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Amount of native currency, in wei.
pub type Wei = u128;

/// Number of a node in the rollup's dispute tree.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct NodeNum(pub u64);

impl NodeNum {
    /// The genesis node.
    pub const GENESIS: Self = NodeNum(0);

    /// Get the next node number.
    pub fn next(self) -> Self {
        NodeNum(self.0 + 1)
    }
}

impl fmt::Display for NodeNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Node({})", self.0)
    }
}

/// Identifier of an active dispute between two stakers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChallengeId(pub u64);

impl fmt::Display for ChallengeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Challenge({})", self.0)
    }
}

/// Parent-chain block number.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct BlockNumber(pub u64);

impl fmt::Display for BlockNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Block({})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_num_ordering() {
        assert!(NodeNum(3) < NodeNum(5));
        assert_eq!(NodeNum::GENESIS.next(), NodeNum(1));
    }

    #[test]
    fn test_display() {
        assert_eq!(NodeNum(4).to_string(), "Node(4)");
        assert_eq!(ChallengeId(2).to_string(), "Challenge(2)");
        assert_eq!(BlockNumber(9).to_string(), "Block(9)");
    }
}
