//! Recording fakes for the agent's other collaborators.

use crate::chain::MockChain;
use arbiter_core::{
    ActionError, ChallengeHandler, GeneratedAction, LatestConfirmedNotifier, LatestStakedNotifier,
    Metrics, NodeAction, NodeActionSource,
};
use arbiter_types::{Address, Assertion, ChallengeId, Hash, NodeNum, Strategy};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

/// Node-action generator that judges nodes against a set of known-good hashes.
///
/// From a given node it proposes the lowest-numbered child whose hash is
/// marked correct. With no such child it proposes a queued assertion (at
/// `MakeNodes` only), and otherwise nothing.
pub struct ChainFollower {
    chain: MockChain,
    correct: Mutex<HashSet<Hash>>,
    queued_assertion: Mutex<Option<(Assertion, Hash, u64)>>,
    validation_pending: AtomicBool,
    requests: Mutex<Vec<(NodeNum, Strategy)>>,
}

impl ChainFollower {
    pub fn new(chain: MockChain) -> Self {
        Self {
            chain,
            correct: Mutex::new(HashSet::new()),
            queued_assertion: Mutex::new(None),
            validation_pending: AtomicBool::new(false),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Mark the node with `hash` as agreeing with local execution.
    pub fn mark_correct(&self, hash: Hash) {
        self.correct.lock().insert(hash);
    }

    /// Offer `assertion` as the next new node.
    pub fn queue_assertion(&self, assertion: Assertion, hash: Hash, prev_inbox_max_count: u64) {
        *self.queued_assertion.lock() = Some((assertion, hash, prev_inbox_max_count));
    }

    /// Make every request fail as if local validation lagged behind.
    pub fn set_validation_pending(&self, pending: bool) {
        self.validation_pending.store(pending, Ordering::SeqCst);
    }

    /// Nodes this source was asked about, in order.
    pub fn requests(&self) -> Vec<(NodeNum, Strategy)> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl NodeActionSource for ChainFollower {
    async fn generate_node_action(
        &self,
        from: NodeNum,
        _from_hash: Hash,
        strategy: Strategy,
    ) -> Result<GeneratedAction, ActionError> {
        self.requests.lock().push((from, strategy));
        if self.validation_pending.load(Ordering::SeqCst) {
            return Err(ActionError::ValidationPending(from.next()));
        }

        let children = self.chain.children(from);
        let correct = self.correct.lock();
        let wrong_nodes_exist = children.iter().any(|c| !correct.contains(&c.node_hash));

        if let Some(good) = children.iter().find(|c| correct.contains(&c.node_hash)) {
            return Ok(GeneratedAction {
                action: NodeAction::UseExistingNode {
                    number: good.num,
                    hash: good.node_hash,
                },
                wrong_nodes_exist,
            });
        }

        if strategy >= Strategy::MakeNodes {
            if let Some((assertion, hash, prev_inbox_max_count)) = self.queued_assertion.lock().take()
            {
                return Ok(GeneratedAction {
                    action: NodeAction::CreateNewNode {
                        assertion,
                        hash,
                        prev_inbox_max_count,
                    },
                    wrong_nodes_exist,
                });
            }
        }

        Ok(GeneratedAction {
            action: NodeAction::NoAction,
            wrong_nodes_exist,
        })
    }
}

/// Dispute engine that only records what it was asked to do.
#[derive(Default)]
pub struct RecordingChallengeHandler {
    moves: Mutex<Vec<(ChallengeId, Address, u64)>>,
}

impl RecordingChallengeHandler {
    /// Recorded `(challenge, staker, confirmation_blocks)` moves.
    pub fn moves(&self) -> Vec<(ChallengeId, Address, u64)> {
        self.moves.lock().clone()
    }
}

#[async_trait]
impl ChallengeHandler for RecordingChallengeHandler {
    async fn act(
        &self,
        challenge: ChallengeId,
        staker: Address,
        confirmation_blocks: u64,
    ) -> Result<(), ActionError> {
        self.moves
            .lock()
            .push((challenge, staker, confirmation_blocks));
        Ok(())
    }
}

/// Metrics sink that keeps the last value of every gauge and counter.
#[derive(Default)]
pub struct RecordingMetrics {
    gauges: Mutex<HashMap<&'static str, f64>>,
    counters: Mutex<HashMap<&'static str, u64>>,
}

impl RecordingMetrics {
    pub fn gauge(&self, name: &str) -> Option<f64> {
        self.gauges.lock().get(name).copied()
    }

    pub fn counter(&self, name: &str) -> u64 {
        self.counters.lock().get(name).copied().unwrap_or(0)
    }
}

impl Metrics for RecordingMetrics {
    fn update(&self, name: &'static str, value: f64) {
        self.gauges.lock().insert(name, value);
    }

    fn increment(&self, name: &'static str) {
        *self.counters.lock().entry(name).or_default() += 1;
    }
}

/// Notifier that records every update it receives.
#[derive(Default)]
pub struct RecordingNotifier {
    staked: Mutex<Vec<(NodeNum, Hash)>>,
    confirmed: Mutex<Vec<(NodeNum, Hash)>>,
}

impl RecordingNotifier {
    pub fn staked(&self) -> Vec<(NodeNum, Hash)> {
        self.staked.lock().clone()
    }

    pub fn confirmed(&self) -> Vec<(NodeNum, Hash)> {
        self.confirmed.lock().clone()
    }
}

impl LatestStakedNotifier for RecordingNotifier {
    fn update_latest_staked(&self, node: NodeNum, hash: Hash) {
        self.staked.lock().push((node, hash));
    }
}

impl LatestConfirmedNotifier for RecordingNotifier {
    fn update_latest_confirmed(&self, node: NodeNum, hash: Hash) {
        self.confirmed.lock().push((node, hash));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbiter_types::test_utils::test_assertion;

    #[tokio::test]
    async fn test_follower_prefers_correct_child() {
        let chain = MockChain::new(Address::from_low_u8(0xEE));
        let good = chain.add_node(NodeNum::GENESIS, test_assertion(b"good", 0, 1));
        let bad = chain.add_node(NodeNum::GENESIS, test_assertion(b"bad", 0, 1));
        let follower = ChainFollower::new(chain.clone());
        follower.mark_correct(chain.node_hash(good));

        let generated = follower
            .generate_node_action(NodeNum::GENESIS, Hash::ZERO, Strategy::StakeLatest)
            .await
            .unwrap();
        assert_eq!(
            generated.action,
            NodeAction::UseExistingNode {
                number: good,
                hash: chain.node_hash(good)
            }
        );
        assert!(generated.wrong_nodes_exist);
        assert_ne!(good, bad);
    }

    #[tokio::test]
    async fn test_follower_creates_only_when_making_nodes() {
        let chain = MockChain::new(Address::from_low_u8(0xEE));
        let follower = ChainFollower::new(chain);
        let assertion = test_assertion(b"new", 0, 1);
        follower.queue_assertion(assertion, Hash::from_bytes(b"h"), 1);

        let generated = follower
            .generate_node_action(NodeNum::GENESIS, Hash::ZERO, Strategy::ResolveNodes)
            .await
            .unwrap();
        assert_eq!(generated.action, NodeAction::NoAction);

        let generated = follower
            .generate_node_action(NodeNum::GENESIS, Hash::ZERO, Strategy::MakeNodes)
            .await
            .unwrap();
        assert!(matches!(generated.action, NodeAction::CreateNewNode { .. }));
    }

    #[test]
    fn test_recording_metrics() {
        let metrics = RecordingMetrics::default();
        metrics.update("g", 2.5);
        metrics.increment("c");
        metrics.increment("c");
        assert_eq!(metrics.gauge("g"), Some(2.5));
        assert_eq!(metrics.counter("c"), 2);
        assert_eq!(metrics.counter("missing"), 0);
    }
}
