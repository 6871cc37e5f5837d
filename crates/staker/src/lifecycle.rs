//! Stake lifecycle.
//!
//! A stake moves through four states:
//!
//! ```text
//! Unstaked ──new stake──► Staked(existing | new node) ──advance──► Staked
//!                                  │
//!                   behind confirmation or unwanted
//!                                  ▼
//!                              Retiring (return deposit, withdraw)
//! ```
//!
//! Every transition is a queued call on the tick's [`TxBatcher`]. Nothing
//! here submits on its own except timed-out dispute cleanup, which the
//! agent treats as the whole tick's work.
//!
//! Which node to move to is decided by the [`NodeActionSource`]. Agents
//! below [`Strategy::StakeLatest`] only walk forward in the
//! [`InactiveMemo`]; a defensive agent that meets a wrong node is brought
//! online until its stake passes that node.

use crate::error::{ResultExt, StakerError};
use crate::info::OurStakerInfo;
use crate::memo::InactiveMemo;
use arbiter_core::{Call, LedgerClient, NodeAction, NodeActionSource};
use arbiter_txbatch::TxBatcher;
use arbiter_types::{ConfirmType, Hash, NodeNum, StakerRecord, Strategy, TxHash};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Most stake advances queued in one tick.
pub const MAX_STAKE_ADVANCES_PER_TICK: usize = 20;

/// Most timed-out disputes cleaned up in one tick.
pub const TIMED_OUT_CHALLENGES_PER_TICK: u64 = 10;

/// A node worth fast-confirming after a stake advance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmTarget {
    /// A node created by this tick; its confirmation data is known locally.
    NewNode {
        block_hash: Hash,
        send_root: Hash,
        node_hash: Hash,
    },
    /// An existing node; its confirmation data must be looked up.
    ExistingNode { number: NodeNum, hash: Hash },
}

/// Creates, advances and retires our stake.
pub struct StakeLifecycleManager {
    ledger: Arc<dyn LedgerClient>,
    actions: Arc<dyn NodeActionSource>,
    /// Refuse to create a node competing with a wrong one.
    disable_challenge: bool,
    /// Stay active until our stake reaches this node.
    bring_active_until: Option<NodeNum>,
}

impl StakeLifecycleManager {
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        actions: Arc<dyn NodeActionSource>,
        disable_challenge: bool,
    ) -> Self {
        Self {
            ledger,
            actions,
            disable_challenge,
            bring_active_until: None,
        }
    }

    /// Node a defensive agent stays active until, if it was brought online.
    pub fn bring_active_until(&self) -> Option<NodeNum> {
        self.bring_active_until
    }

    /// Stop escalating a defensive agent.
    pub fn clear_bring_active(&mut self) {
        self.bring_active_until = None;
    }

    /// Whether the required stake is above the base stake.
    pub async fn is_required_stake_elevated(&self) -> Result<bool, StakerError> {
        let required = self.ledger.current_required_stake().await?;
        let base = self.ledger.base_stake().await?;
        Ok(required > base)
    }

    /// Submit a timeout for disputes past their deadline.
    ///
    /// Returns the submitted transaction, or `None` if there was nothing to
    /// time out.
    pub async fn resolve_timed_out_challenges(
        &self,
        batcher: &mut TxBatcher,
    ) -> Result<Option<TxHash>, StakerError> {
        let challenges = self
            .ledger
            .timed_out_challenges(0, TIMED_OUT_CHALLENGES_PER_TICK)
            .await?;
        if challenges.is_empty() {
            return Ok(None);
        }

        info!(count = challenges.len(), "Timing out challenges");
        batcher.auth().call(Call::TimeoutChallenges { challenges });
        Ok(batcher.execute_transactions().await?)
    }

    /// Confirm or reject the first unresolved node if the ledger says it is
    /// decidable.
    ///
    /// Updates `latest_confirmed` when a confirmation is queued. Returns
    /// whether anything was queued.
    pub async fn resolve_next_node(
        &self,
        batcher: &mut TxBatcher,
        staker: Option<&StakerRecord>,
        latest_confirmed: &mut NodeNum,
    ) -> Result<bool, StakerError> {
        let decidable = self.ledger.check_decidable_next_node().await?;
        let unresolved = self.ledger.first_unresolved_node().await?;

        match decidable {
            ConfirmType::Invalid => {
                let (Some(staker), Some(wallet)) = (staker, batcher.wallet_address()) else {
                    return Ok(false);
                };
                // Only a staker on a competing, later node may reject.
                if staker.latest_staked_node <= unresolved {
                    return Ok(false);
                }
                warn!(node = %unresolved, "Rejecting node");
                batcher.auth().call(Call::RejectNextNode { staker: wallet });
                Ok(true)
            }
            ConfirmType::Valid => {
                let record = self
                    .ledger
                    .lookup_node(unresolved)
                    .await
                    .with_context(|| format!("looking up {unresolved}"))?;
                let gs = record.assertion.after_state.global_state;
                info!(node = %unresolved, "Confirming node");
                batcher.auth().call(Call::ConfirmNextNode {
                    block_hash: gs.block_hash,
                    send_root: gs.send_root,
                });
                *latest_confirmed = unresolved;
                Ok(true)
            }
            ConfirmType::None => Ok(false),
        }
    }

    /// Queue return of a stake that sits at or behind confirmation and is
    /// either strictly behind or no longer wanted.
    ///
    /// Queues the deposit return followed by the withdrawal, in that order.
    /// Returns whether they were queued; the caller submits them right away.
    pub fn remove_old_stake(
        &self,
        batcher: &mut TxBatcher,
        staker: Option<&StakerRecord>,
        latest_confirmed: NodeNum,
        strategy: Strategy,
    ) -> bool {
        let Some(staker) = staker else {
            return false;
        };
        let Some(wallet) = batcher.wallet_address() else {
            return false;
        };
        if staker.latest_staked_node > latest_confirmed
            || staker.in_challenge()
            || !batcher.can_act_further()
        {
            return false;
        }

        let too_outdated = staker.latest_staked_node < latest_confirmed;
        let unwanted = strategy < Strategy::StakeLatest;
        if !too_outdated && !unwanted {
            return false;
        }

        info!(
            staked = %staker.latest_staked_node,
            confirmed = %latest_confirmed,
            too_outdated,
            "Removing old stake and withdrawing funds"
        );
        batcher.auth().call(Call::ReturnOldDeposit { staker: wallet });
        batcher.auth().call(Call::WithdrawStakerFunds);
        true
    }

    /// Queue a withdrawal of any funds the ledger holds for us.
    pub async fn withdraw_funds(&self, batcher: &mut TxBatcher) -> Result<bool, StakerError> {
        let wallet = batcher.wallet_address_or_zero();
        if wallet.is_zero() || !batcher.can_act_further() {
            return Ok(false);
        }
        let withdrawable = self
            .ledger
            .withdrawable_funds(wallet)
            .await
            .with_context(|| format!("checking withdrawable funds of {wallet}"))?;
        if withdrawable == 0 {
            return Ok(false);
        }
        info!(amount = withdrawable, "Withdrawing staker funds");
        batcher.auth().call(Call::WithdrawStakerFunds);
        Ok(true)
    }

    /// Take one step forward from `info.latest_staked_node`.
    ///
    /// Active agents queue a stake call; inactive agents only move their
    /// memo. Clears `info.can_progress` when no further step is possible
    /// this tick. Returns the node worth fast-confirming next, if any.
    pub async fn advance_stake(
        &mut self,
        batcher: &mut TxBatcher,
        info: &mut OurStakerInfo,
        memo: &mut InactiveMemo,
        strategy: Strategy,
    ) -> Result<Option<ConfirmTarget>, StakerError> {
        let active = strategy.is_active();
        let generated = self
            .actions
            .generate_node_action(info.latest_staked_node, info.latest_staked_node_hash, strategy)
            .await
            .context("generating node action")?;
        let wrong = generated.wrong_nodes_exist;
        if wrong && strategy == Strategy::Watchtower {
            error!(from = %info.latest_staked_node, "Found incorrect assertion in watchtower mode");
        }

        match generated.action {
            NodeAction::NoAction => {
                info.can_progress = false;
                Ok(None)
            }
            NodeAction::CreateNewNode {
                assertion,
                hash,
                prev_inbox_max_count,
            } => {
                info.can_progress = false;
                if wrong && self.disable_challenge {
                    error!("Refusing to challenge assertion as config disables challenges");
                    return Ok(None);
                }
                if !active {
                    if wrong && strategy >= Strategy::Defensive {
                        error!("Bringing defensive validator online because of incorrect assertion");
                        self.bring_active_until = Some(info.latest_staked_node.next());
                    }
                    return Ok(None);
                }

                info.latest_staked_node_hash = hash;
                if info.stake_exists {
                    info!(parent = %info.latest_staked_node, %hash, "Staking on new node");
                    batcher.auth().call(Call::StakeOnNewNode {
                        assertion,
                        expected_node_hash: hash,
                        prev_inbox_max_count,
                    });
                } else {
                    let amount = self
                        .ledger
                        .current_required_stake()
                        .await
                        .context("getting current required stake")?;
                    info!(%hash, amount, "Placing new stake on new node");
                    batcher.auth_with_amount(amount).call(Call::NewStakeOnNewNode {
                        assertion,
                        expected_node_hash: hash,
                        prev_inbox_max_count,
                    });
                    info.stake_exists = true;
                }
                let gs = assertion.after_state.global_state;
                Ok(Some(ConfirmTarget::NewNode {
                    block_hash: gs.block_hash,
                    send_root: gs.send_root,
                    node_hash: hash,
                }))
            }
            NodeAction::UseExistingNode { number, hash } => {
                info.latest_staked_node = number;
                info.latest_staked_node_hash = hash;
                let target = Some(ConfirmTarget::ExistingNode { number, hash });

                if !active {
                    if wrong && strategy >= Strategy::Defensive {
                        error!(
                            node = %number,
                            "Bringing defensive validator online because of incorrect assertion"
                        );
                        self.bring_active_until = Some(number);
                        info.can_progress = false;
                    } else {
                        memo.record(number, hash);
                    }
                    return Ok(target);
                }

                if info.stake_exists {
                    info!(node = %number, "Staking on existing node");
                    batcher
                        .auth()
                        .call(Call::StakeOnExistingNode { node: number, node_hash: hash });
                } else {
                    let amount = self
                        .ledger
                        .current_required_stake()
                        .await
                        .context("getting current required stake")?;
                    info!(node = %number, amount, "Placing new stake on existing node");
                    batcher
                        .auth_with_amount(amount)
                        .call(Call::NewStakeOnExistingNode { node: number, node_hash: hash });
                    info.stake_exists = true;
                }
                Ok(target)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbiter_test_helpers::{test_assertion, ChainFollower, MockChain};
    use arbiter_txbatch::EoaWallet;
    use arbiter_types::{Address, ChallengeId};

    const ROLLUP: Address = Address::from_low_u8(0xEE);
    const ME: Address = Address::from_low_u8(1);

    struct Fixture {
        chain: MockChain,
        follower: Arc<ChainFollower>,
        manager: StakeLifecycleManager,
        batcher: TxBatcher,
        memo: InactiveMemo,
    }

    fn fixture(disable_challenge: bool) -> Fixture {
        let chain = MockChain::new(ROLLUP);
        let follower = Arc::new(ChainFollower::new(chain.clone()));
        let manager =
            StakeLifecycleManager::new(Arc::new(chain.clone()), follower.clone(), disable_challenge);
        let batcher =
            TxBatcher::new(ROLLUP, Arc::new(EoaWallet::new(ME, Arc::new(chain.clone()))));
        Fixture {
            chain,
            follower,
            manager,
            batcher,
            memo: InactiveMemo::new(),
        }
    }

    fn genesis_info(chain: &MockChain) -> OurStakerInfo {
        OurStakerInfo::new(NodeNum::GENESIS, chain.node_hash(NodeNum::GENESIS), None)
    }

    #[tokio::test]
    async fn test_new_stake_on_existing_node_carries_required_stake() {
        let mut f = fixture(false);
        let n1 = f.chain.add_node(NodeNum::GENESIS, test_assertion(b"n1", 0, 1));
        f.follower.mark_correct(f.chain.node_hash(n1));
        f.chain.set_required_stake(2_500);
        let mut info = genesis_info(&f.chain);

        let target = f
            .manager
            .advance_stake(&mut f.batcher, &mut info, &mut f.memo, Strategy::StakeLatest)
            .await
            .unwrap();

        assert_eq!(
            target,
            Some(ConfirmTarget::ExistingNode {
                number: n1,
                hash: f.chain.node_hash(n1)
            })
        );
        assert!(info.stake_exists);
        assert_eq!(info.latest_staked_node, n1);
        let pending = f.batcher.pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].value, 2_500);
        assert!(matches!(pending[0].call, Call::NewStakeOnExistingNode { .. }));

        f.batcher.execute_transactions().await.unwrap();
        assert_eq!(f.chain.staker(ME).unwrap().latest_staked_node, n1);
    }

    #[tokio::test]
    async fn test_existing_stake_moves_without_collateral() {
        let mut f = fixture(false);
        let n1 = f.chain.add_node(NodeNum::GENESIS, test_assertion(b"n1", 0, 1));
        let n2 = f.chain.add_node(n1, test_assertion(b"n2", 1, 2));
        f.follower.mark_correct(f.chain.node_hash(n2));
        f.chain.add_staker(ME, n1, 1_000);
        let mut info = OurStakerInfo::new(n1, f.chain.node_hash(n1), f.chain.staker(ME));

        f.manager
            .advance_stake(&mut f.batcher, &mut info, &mut f.memo, Strategy::StakeLatest)
            .await
            .unwrap();

        let pending = f.batcher.pending();
        assert_eq!(pending[0].value, 0);
        assert!(matches!(pending[0].call, Call::StakeOnExistingNode { node, .. } if node == n2));
    }

    #[tokio::test]
    async fn test_inactive_walk_records_memo_only() {
        let mut f = fixture(false);
        let n1 = f.chain.add_node(NodeNum::GENESIS, test_assertion(b"n1", 0, 1));
        f.follower.mark_correct(f.chain.node_hash(n1));
        let mut info = genesis_info(&f.chain);

        f.manager
            .advance_stake(&mut f.batcher, &mut info, &mut f.memo, Strategy::Watchtower)
            .await
            .unwrap();

        assert_eq!(f.batcher.building_transaction_count(), 0);
        assert!(info.can_progress);
        assert!(!info.stake_exists);
        assert!(f.memo.contains(n1, f.chain.node_hash(n1)));
        assert_eq!(f.memo.last_checked(), Some((n1, f.chain.node_hash(n1))));

        // Nothing further to walk to.
        f.manager
            .advance_stake(&mut f.batcher, &mut info, &mut f.memo, Strategy::Watchtower)
            .await
            .unwrap();
        assert!(!info.can_progress);
    }

    #[tokio::test]
    async fn test_defensive_brought_online_by_wrong_sibling() {
        let mut f = fixture(false);
        let good = f.chain.add_node(NodeNum::GENESIS, test_assertion(b"good", 0, 1));
        f.chain.add_node(NodeNum::GENESIS, test_assertion(b"bad", 0, 1));
        f.follower.mark_correct(f.chain.node_hash(good));
        let mut info = genesis_info(&f.chain);

        f.manager
            .advance_stake(&mut f.batcher, &mut info, &mut f.memo, Strategy::Defensive)
            .await
            .unwrap();

        assert_eq!(f.manager.bring_active_until(), Some(good));
        assert!(!info.can_progress);
        assert_eq!(f.batcher.building_transaction_count(), 0);
        assert!(f.memo.is_empty());
    }

    #[tokio::test]
    async fn test_make_nodes_creates_node_with_new_stake() {
        let mut f = fixture(false);
        let assertion = test_assertion(b"mine", 0, 1);
        let hash = Hash::from_bytes(b"mine-hash");
        f.follower.queue_assertion(assertion, hash, 1);
        let mut info = genesis_info(&f.chain);

        let target = f
            .manager
            .advance_stake(&mut f.batcher, &mut info, &mut f.memo, Strategy::MakeNodes)
            .await
            .unwrap();

        let gs = assertion.after_state.global_state;
        assert_eq!(
            target,
            Some(ConfirmTarget::NewNode {
                block_hash: gs.block_hash,
                send_root: gs.send_root,
                node_hash: hash
            })
        );
        assert!(!info.can_progress);
        assert_eq!(f.batcher.pending()[0].value, 1_000);
        f.batcher.execute_transactions().await.unwrap();
        assert_eq!(f.chain.staker(ME).unwrap().latest_staked_node, NodeNum(1));
    }

    #[tokio::test]
    async fn test_disable_challenge_refuses_competing_node() {
        let mut f = fixture(true);
        f.chain.add_node(NodeNum::GENESIS, test_assertion(b"bad", 0, 1));
        f.follower
            .queue_assertion(test_assertion(b"mine", 0, 1), Hash::from_bytes(b"mine"), 1);
        let mut info = genesis_info(&f.chain);

        let target = f
            .manager
            .advance_stake(&mut f.batcher, &mut info, &mut f.memo, Strategy::MakeNodes)
            .await
            .unwrap();

        assert_eq!(target, None);
        assert!(!info.can_progress);
        assert_eq!(f.batcher.building_transaction_count(), 0);
    }

    #[tokio::test]
    async fn test_validation_pending_surfaces_as_ephemeral() {
        let mut f = fixture(false);
        f.follower.set_validation_pending(true);
        let mut info = genesis_info(&f.chain);

        let err = f
            .manager
            .advance_stake(&mut f.batcher, &mut info, &mut f.memo, Strategy::StakeLatest)
            .await
            .unwrap_err();
        assert!(err.ephemeral_class().is_some());
    }

    #[tokio::test]
    async fn test_remove_outdated_stake() {
        let mut f = fixture(false);
        let n1 = f.chain.add_node(NodeNum::GENESIS, test_assertion(b"n1", 0, 1));
        let n2 = f.chain.add_node(n1, test_assertion(b"n2", 1, 2));
        f.chain.add_staker(ME, n1, 1_000);
        f.chain.force_confirm(n2);
        let staker = f.chain.staker(ME);

        // At the confirmed node and still wanted: keep it.
        assert!(!f
            .manager
            .remove_old_stake(&mut f.batcher, staker.as_ref(), n1, Strategy::StakeLatest));

        assert!(f
            .manager
            .remove_old_stake(&mut f.batcher, staker.as_ref(), n2, Strategy::StakeLatest));
        let calls: Vec<_> = f.batcher.pending().iter().map(|p| p.call.type_name()).collect();
        assert_eq!(calls, vec!["ReturnOldDeposit", "WithdrawStakerFunds"]);

        f.batcher.execute_transactions().await.unwrap();
        assert!(f.chain.staker(ME).is_none());
        assert_eq!(f.chain.balance(ME), 1_000);
    }

    #[tokio::test]
    async fn test_remove_unwanted_stake_at_confirmation() {
        let mut f = fixture(false);
        let n1 = f.chain.add_node(NodeNum::GENESIS, test_assertion(b"n1", 0, 1));
        f.chain.add_staker(ME, n1, 1_000);
        f.chain.force_confirm(n1);
        let staker = f.chain.staker(ME);

        assert!(f
            .manager
            .remove_old_stake(&mut f.batcher, staker.as_ref(), n1, Strategy::Defensive));
    }

    #[tokio::test]
    async fn test_withdraw_funds() {
        let mut f = fixture(false);
        assert!(!f.manager.withdraw_funds(&mut f.batcher).await.unwrap());

        f.chain.set_withdrawable(ME, 300);
        assert!(f.manager.withdraw_funds(&mut f.batcher).await.unwrap());
        f.batcher.execute_transactions().await.unwrap();
        assert_eq!(f.chain.balance(ME), 300);
    }

    #[tokio::test]
    async fn test_resolve_next_node_confirms_valid() {
        let mut f = fixture(false);
        let n1 = f.chain.add_node(NodeNum::GENESIS, test_assertion(b"n1", 0, 1));
        f.chain.set_decidable(ConfirmType::Valid);
        let mut confirmed = NodeNum::GENESIS;

        let resolved = f
            .manager
            .resolve_next_node(&mut f.batcher, None, &mut confirmed)
            .await
            .unwrap();

        assert!(resolved);
        assert_eq!(confirmed, n1);
        f.batcher.execute_transactions().await.unwrap();
        assert_eq!(f.chain.confirmed(), n1);
    }

    #[tokio::test]
    async fn test_resolve_next_node_rejects_only_when_staked_past_it() {
        let mut f = fixture(false);
        let bad = f.chain.add_node(NodeNum::GENESIS, test_assertion(b"bad", 0, 1));
        let good = f.chain.add_node(NodeNum::GENESIS, test_assertion(b"good", 0, 1));
        f.chain.set_decidable(ConfirmType::Invalid);
        let mut confirmed = NodeNum::GENESIS;

        // Not staked: nothing to do.
        assert!(!f
            .manager
            .resolve_next_node(&mut f.batcher, None, &mut confirmed)
            .await
            .unwrap());

        f.chain.add_staker(ME, good, 1_000);
        let staker = f.chain.staker(ME);
        assert!(f
            .manager
            .resolve_next_node(&mut f.batcher, staker.as_ref(), &mut confirmed)
            .await
            .unwrap());
        assert_eq!(confirmed, NodeNum::GENESIS);
        f.batcher.execute_transactions().await.unwrap();
        assert_eq!(f.chain.first_unresolved_node().await.unwrap(), bad.next());
    }

    #[tokio::test]
    async fn test_resolve_timed_out_challenges() {
        let mut f = fixture(false);
        assert_eq!(
            f.manager
                .resolve_timed_out_challenges(&mut f.batcher)
                .await
                .unwrap(),
            None
        );

        let n1 = f.chain.add_node(NodeNum::GENESIS, test_assertion(b"n1", 0, 1));
        f.chain.add_staker(ME, n1, 1_000);
        f.chain.set_challenge(ME, Some(ChallengeId(7)));
        f.chain.add_timed_out_challenge(ChallengeId(7));

        let tx = f
            .manager
            .resolve_timed_out_challenges(&mut f.batcher)
            .await
            .unwrap();
        assert!(tx.is_some());
        assert!(!f.chain.staker(ME).unwrap().in_challenge());
    }

    #[tokio::test]
    async fn test_required_stake_elevation() {
        let f = fixture(false);
        assert!(!f.manager.is_required_stake_elevated().await.unwrap());
        f.chain.set_required_stake(5_000);
        assert!(f.manager.is_required_stake_elevated().await.unwrap());
    }
}
