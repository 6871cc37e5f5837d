//! Per-tick view of our own stake.

use arbiter_types::{Hash, NodeNum, StakerRecord};

/// Our stake as seen at the start of a tick, updated as the tick queues
/// calls.
///
/// Rebuilt from ledger reads every tick; never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OurStakerInfo {
    /// Whether stake advancement may continue this tick.
    pub can_progress: bool,

    /// Node the next advance starts from.
    pub latest_staked_node: NodeNum,

    pub latest_staked_node_hash: Hash,

    /// Our ledger record, if we hold a stake.
    pub staker: Option<StakerRecord>,

    /// Whether a stake exists or has been queued this tick.
    pub stake_exists: bool,
}

impl OurStakerInfo {
    pub fn new(latest_staked_node: NodeNum, hash: Hash, staker: Option<StakerRecord>) -> Self {
        Self {
            can_progress: true,
            latest_staked_node,
            latest_staked_node_hash: hash,
            stake_exists: staker.is_some(),
            staker,
        }
    }
}
