//! Per-tick staking decision.
//!
//! [`StakingAgent::act`] runs one tick:
//!
//! 1. Pre-checks (non-watchtower only): the wallet's nonce matches the
//!    ledger and the wallet is whitelisted.
//! 2. The high-gas gate.
//! 3. Snapshot of our stake, with fork detection.
//! 4. Opportunistic fast confirmation of the first unresolved node.
//! 5. Stake lifecycle: timed-out disputes, node resolution, stake removal,
//!    withdrawal, active dispute, stake advancement, conflict detection.
//! 6. Submit whatever was queued as one batch.
//!
//! Any error after the gate drops the calls queued so far.

use crate::config::StakerConfig;
use crate::conflict::ConflictResolver;
use crate::error::{ConfigError, ResultExt, StakerError};
use crate::gas_gate::HighGasGate;
use crate::info::OurStakerInfo;
use crate::lifecycle::{ConfirmTarget, StakeLifecycleManager, MAX_STAKE_ADVANCES_PER_TICK};
use crate::memo::InactiveMemo;
use arbiter_core::metrics::{
    wei_to_ether, STAKER_AMOUNT_STAKED, STAKER_BALANCE, STAKER_STAKED_NODE,
};
use arbiter_core::{
    Call, ChallengeHandler, LedgerClient, Metrics, NodeActionSource, QuorumConnector,
    ValidatorWallet,
};
use arbiter_fastconfirm::{FastConfirmQuorum, QuorumError};
use arbiter_txbatch::TxBatcher;
use arbiter_types::{Address, ChallengeId, Hash, StakerRecord, Strategy, TxHash};
use std::sync::Arc;
use tracing::{error, info, warn};

/// How fast confirmations are submitted.
#[derive(Debug)]
pub enum FastConfirmer {
    /// Our wallet is the rollup's fast confirmer.
    Direct,
    /// A quorum contract is; we are one of its owners.
    Quorum(FastConfirmQuorum),
}

/// Collaborators of a [`StakingAgent`].
#[derive(Clone)]
pub struct StakerDeps {
    pub ledger: Arc<dyn LedgerClient>,
    pub quorums: Arc<dyn QuorumConnector>,
    pub wallet: Arc<dyn ValidatorWallet>,
    pub actions: Arc<dyn NodeActionSource>,
    pub challenges: Arc<dyn ChallengeHandler>,
    pub metrics: Arc<dyn Metrics>,
}

/// The staking agent.
///
/// Owns its batcher and all per-agent state. Ticks never overlap: the
/// caller awaits each [`act`](Self::act) before starting the next.
pub struct StakingAgent {
    config: StakerConfig,
    ledger: Arc<dyn LedgerClient>,
    quorums: Arc<dyn QuorumConnector>,
    challenges: Arc<dyn ChallengeHandler>,
    metrics: Arc<dyn Metrics>,

    batcher: TxBatcher,
    lifecycle: StakeLifecycleManager,
    conflicts: ConflictResolver,
    gas_gate: HighGasGate,
    memo: InactiveMemo,

    /// Set up by [`initialize`](Self::initialize) when fast confirmation is
    /// enabled.
    fast_confirmer: Option<FastConfirmer>,
    /// Dispute we last handed to the dispute engine.
    active_challenge: Option<ChallengeId>,
}

impl StakingAgent {
    pub fn new(config: StakerConfig, deps: StakerDeps) -> Self {
        let rollup = deps.ledger.rollup_address();
        Self {
            batcher: TxBatcher::new(rollup, deps.wallet),
            lifecycle: StakeLifecycleManager::new(
                deps.ledger.clone(),
                deps.actions,
                config.disable_challenge,
            ),
            conflicts: ConflictResolver::new(deps.ledger.clone()),
            gas_gate: HighGasGate::new(&config.posting_strategy),
            memo: InactiveMemo::new(),
            fast_confirmer: None,
            active_challenge: None,
            config,
            ledger: deps.ledger,
            quorums: deps.quorums,
            challenges: deps.challenges,
            metrics: deps.metrics,
        }
    }

    pub fn config(&self) -> &StakerConfig {
        &self.config
    }

    pub fn strategy(&self) -> Strategy {
        self.config.strategy
    }

    pub fn ledger(&self) -> &Arc<dyn LedgerClient> {
        &self.ledger
    }

    pub fn batcher(&self) -> &TxBatcher {
        &self.batcher
    }

    /// Drop queued calls, e.g. after a tick panicked.
    pub fn clear_transactions(&mut self) {
        self.batcher.clear_transactions();
    }

    pub fn fast_confirmer(&self) -> Option<&FastConfirmer> {
        self.fast_confirmer.as_ref()
    }

    pub fn memo(&self) -> &InactiveMemo {
        &self.memo
    }

    /// Log who we are and set up fast confirmation.
    pub async fn initialize(&mut self) -> Result<(), StakerError> {
        let wallet = self.batcher.wallet_address_or_zero();
        if !wallet.is_zero() {
            self.update_balance_metric().await;
        }
        let whitelisted = self
            .is_whitelisted()
            .await
            .context("checking if whitelisted")?;
        info!(
            tx_sender = ?self.batcher.wallet().tx_sender_address(),
            acting_as_wallet = %wallet,
            whitelisted,
            strategy = %self.config.strategy,
            "Running as validator"
        );
        self.setup_fast_confirmation().await
    }

    /// Decide how fast confirmations will be submitted.
    pub async fn setup_fast_confirmation(&mut self) -> Result<(), StakerError> {
        self.fast_confirmer = None;
        if !self.config.enable_fast_confirmation {
            return Ok(());
        }
        let wallet = self
            .batcher
            .wallet_address()
            .ok_or(ConfigError::FastConfirmWithoutWallet)?;
        let fast_confirmer = self
            .ledger
            .any_trust_fast_confirmer()
            .await
            .context("getting rollup fast confirmer address")?;
        info!(%wallet, %fast_confirmer, "Setting up fast confirmation");

        if fast_confirmer == wallet {
            self.fast_confirmer = Some(FastConfirmer::Direct);
            return Ok(());
        }
        if fast_confirmer.is_zero() {
            return Err(ConfigError::NoFastConfirmer.into());
        }

        let contract = self
            .quorums
            .connect(fast_confirmer)
            .await
            .map_err(QuorumError::NotAQuorum)?;
        let quorum = FastConfirmQuorum::load(contract, self.ledger.clone())
            .await
            .context("loading fast confirm quorum")?;
        if !quorum
            .is_owner(wallet)
            .await
            .context("checking if wallet is owner of quorum")?
        {
            return Err(ConfigError::NotQuorumOwner {
                wallet,
                quorum: fast_confirmer,
            }
            .into());
        }
        self.fast_confirmer = Some(FastConfirmer::Quorum(quorum));
        Ok(())
    }

    async fn is_whitelisted(&self) -> Result<bool, StakerError> {
        if self.ledger.validator_whitelist_disabled().await? {
            return Ok(true);
        }
        match self.batcher.wallet_address() {
            Some(addr) => Ok(self.ledger.is_validator(addr).await?),
            None => Ok(false),
        }
    }

    /// Fail if the wallet's view of its nonce disagrees with the ledger.
    async fn check_nonce(&self) -> Result<(), StakerError> {
        let Some(sender) = self.batcher.wallet().tx_sender_address() else {
            return Ok(());
        };
        let local = self.batcher.wallet().local_nonce().await?;
        let chain = self.ledger.nonce_at(sender).await?;
        if local > chain {
            return Err(StakerError::NonceAhead { local, chain });
        }
        if local < chain {
            return Err(StakerError::NonceBehind { local, chain });
        }
        Ok(())
    }

    async fn should_act(&mut self) -> bool {
        let gas = match self.ledger.suggest_gas_price_gwei().await {
            Ok(gas) => Some(gas),
            Err(e) => {
                warn!(error = %e, "Error getting gas price");
                None
            }
        };
        let block = match self.ledger.block_number().await {
            Ok(block) => Some(block),
            Err(e) => {
                warn!(error = %e, "Error getting latest block");
                None
            }
        };
        self.gas_gate
            .should_act(gas, block, &self.config.posting_strategy)
    }

    async fn update_balance_metric(&self) {
        let Some(sender) = self.batcher.wallet().tx_sender_address() else {
            return;
        };
        match self.ledger.balance_at(sender).await {
            Ok(balance) => self.metrics.update(STAKER_BALANCE, wei_to_ether(balance)),
            Err(e) => warn!(error = %e, "Error getting staker balance"),
        }
    }

    /// Run one tick.
    ///
    /// Returns the last submitted transaction, if anything was submitted.
    pub async fn act(&mut self) -> Result<Option<TxHash>, StakerError> {
        let strategy = self.config.strategy;
        if strategy > Strategy::Watchtower {
            self.check_nonce().await?;
            if !self
                .is_whitelisted()
                .await
                .context("checking if whitelisted")?
            {
                warn!(
                    wallet = ?self.batcher.wallet_address(),
                    tx_sender = ?self.batcher.wallet().tx_sender_address(),
                    "Validator address isn't whitelisted"
                );
                return Ok(None);
            }
        }
        if !self.should_act().await {
            return Ok(None);
        }

        self.batcher.clear_transactions();
        let result = self.act_inner(strategy).await;
        if result.is_err() {
            self.batcher.clear_transactions();
        }
        result
    }

    async fn act_inner(&mut self, strategy: Strategy) -> Result<Option<TxHash>, StakerError> {
        let wallet = self.batcher.wallet_address_or_zero();

        let mut staker = None;
        if !wallet.is_zero() {
            staker = self
                .ledger
                .staker_info(wallet)
                .await
                .with_context(|| format!("getting own staker ({wallet}) info"))?;
            let amount = staker.as_ref().map_or(0, |s: &StakerRecord| s.amount_staked);
            self.metrics.update(STAKER_AMOUNT_STAKED, wei_to_ether(amount));
            self.update_balance_metric().await;
        }

        // With no stake this is the latest confirmed node.
        let (latest_staked, latest_staked_hash) = self
            .ledger
            .latest_staked(wallet)
            .await
            .with_context(|| format!("getting latest staked node of own wallet {wallet}"))?;
        self.metrics
            .update(STAKER_STAKED_NODE, latest_staked.0 as f64);
        if let Some(record) = staker.as_mut() {
            record.latest_staked_node = latest_staked;
        }
        let mut info = OurStakerInfo::new(latest_staked, latest_staked_hash, staker);

        let effective = self.effective_strategy(strategy, &mut info).await?;

        if self.config.enable_fast_confirmation
            && self.fast_confirm_first_unresolved(&info, wallet).await?
        {
            // Confirm earlier nodes before working on new ones.
            return Ok(self.batcher.execute_transactions().await?);
        }

        let mut latest_confirmed = self
            .ledger
            .latest_confirmed()
            .await
            .context("getting latest confirmed node")?;
        self.memo.prune_confirmed(latest_confirmed);

        let stake_elevated = self
            .lifecycle
            .is_required_stake_elevated()
            .await
            .context("checking if required stake is elevated")?;
        // Without a stake, resolving nodes may bring the required stake down.
        let should_resolve = effective >= Strategy::ResolveNodes
            || (effective >= Strategy::StakeLatest && info.staker.is_none() && stake_elevated);
        let mut resolving = false;
        if should_resolve {
            if let Some(tx) = self
                .lifecycle
                .resolve_timed_out_challenges(&mut self.batcher)
                .await
                .context("resolving timed out challenges")?
            {
                return Ok(Some(tx));
            }

            let next = latest_confirmed.next();
            resolving = self
                .lifecycle
                .resolve_next_node(&mut self.batcher, info.staker.as_ref(), &mut latest_confirmed)
                .await
                .with_context(|| format!("resolving {next}"))?;

            // We meant to enter on the old confirmed node, which just moved.
            if resolving && info.staker.is_none() && latest_confirmed > info.latest_staked_node {
                let record = self
                    .ledger
                    .lookup_node(latest_confirmed)
                    .await
                    .with_context(|| format!("getting latest confirmed {latest_confirmed}"))?;
                info.latest_staked_node = latest_confirmed;
                info.latest_staked_node_hash = record.node_hash;
            }
        }

        if self.lifecycle.remove_old_stake(
            &mut self.batcher,
            info.staker.as_ref(),
            latest_confirmed,
            effective,
        ) {
            return Ok(self.batcher.execute_transactions().await?);
        }

        self.lifecycle.withdraw_funds(&mut self.batcher).await?;

        if let Some(staker) = info.staker.clone() {
            if self.batcher.can_act_further() {
                self.handle_active_challenge(wallet, &staker)
                    .await
                    .context("handling active challenge")?;
            }
        }

        // Placing a stake while resolving an elevated stake could change the
        // amount required.
        if (info.staker.is_some() || !resolving || !stake_elevated) && self.batcher.can_act_further()
        {
            for _ in 0..MAX_STAKE_ADVANCES_PER_TICK {
                if !info.can_progress {
                    break;
                }
                let from = (info.latest_staked_node, info.latest_staked_node_hash);
                let target = self
                    .lifecycle
                    .advance_stake(&mut self.batcher, &mut info, &mut self.memo, effective)
                    .await
                    .with_context(|| format!("advancing stake from {} ({})", from.0, from.1))?;
                if let Some(target) = target {
                    self.try_fast_confirm_target(target).await?;
                }
                if !self.batcher.can_batch_txs() && effective >= Strategy::StakeLatest {
                    info.can_progress = false;
                }
            }
        }

        if let Some(staker) = info.staker.as_ref() {
            if self.batcher.building_transaction_count() == 0 {
                self.conflicts
                    .create_conflict(&mut self.batcher, staker)
                    .await
                    .context("creating conflict")?;
            }
        }

        if self.batcher.building_transaction_count() == 0 {
            return Ok(None);
        }
        if info.staker.is_none() && info.stake_exists {
            info!("Staking to execute transactions");
        }
        Ok(self.batcher.execute_transactions().await?)
    }

    /// Apply fork and bring-online escalation for this tick, and move the
    /// starting point of an inactive walk to where the last one ended.
    async fn effective_strategy(
        &mut self,
        strategy: Strategy,
        info: &mut OurStakerInfo,
    ) -> Result<Strategy, StakerError> {
        let mut effective = strategy;

        let linear = self
            .ledger
            .are_unresolved_nodes_linear()
            .await
            .context("checking for rollup assertion fork")?;
        if !linear {
            warn!("Rollup assertion fork detected");
            if effective == Strategy::Defensive {
                effective = Strategy::StakeLatest;
            }
            self.memo.clear();
        }

        if let Some(until) = self.lifecycle.bring_active_until() {
            if info.latest_staked_node < until {
                if effective == Strategy::Defensive {
                    effective = Strategy::StakeLatest;
                }
            } else {
                info!(node = %until, "Defensive validator staked past incorrect node; waiting here");
                self.lifecycle.clear_bring_active();
            }
            self.memo.clear_last_checked();
        }

        if effective <= Strategy::Defensive {
            if let Some((number, hash)) = self.memo.last_checked() {
                info.latest_staked_node = number;
                info.latest_staked_node_hash = hash;
            }
        }
        Ok(effective)
    }

    /// Fast-confirm the first unresolved node if we know it is correct.
    ///
    /// Returns whether anything was queued.
    async fn fast_confirm_first_unresolved(
        &mut self,
        info: &OurStakerInfo,
        wallet: Address,
    ) -> Result<bool, StakerError> {
        let first_unresolved = self.ledger.first_unresolved_node().await?;
        if info.latest_staked_node < first_unresolved {
            return Ok(false);
        }

        let record = self
            .ledger
            .lookup_node(first_unresolved)
            .await
            .with_context(|| format!("looking up {first_unresolved}"))?;
        // Staked on it or past it means we agree with it.
        let correct = self.memo.contains(first_unresolved, record.node_hash)
            || self
                .ledger
                .node_has_staker(first_unresolved, wallet)
                .await?;
        if !correct {
            return Ok(false);
        }

        info!(
            node = %first_unresolved,
            node_hash = %record.node_hash,
            "Trying to fast confirm previous node"
        );
        let gs = record.assertion.after_state.global_state;
        self.try_fast_confirmation(gs.block_hash, gs.send_root, record.node_hash)
            .await?;
        Ok(self.batcher.building_transaction_count() > 0)
    }

    async fn try_fast_confirm_target(&mut self, target: ConfirmTarget) -> Result<(), StakerError> {
        if !self.config.enable_fast_confirmation {
            return Ok(());
        }
        match target {
            ConfirmTarget::NewNode {
                block_hash,
                send_root,
                node_hash,
            } => {
                self.try_fast_confirmation(block_hash, send_root, node_hash)
                    .await
            }
            ConfirmTarget::ExistingNode { number, hash } => {
                let record = self
                    .ledger
                    .lookup_node(number)
                    .await
                    .with_context(|| format!("looking up {number}"))?;
                let gs = record.assertion.after_state.global_state;
                self.try_fast_confirmation(gs.block_hash, gs.send_root, hash)
                    .await
            }
        }
    }

    async fn try_fast_confirmation(
        &mut self,
        block_hash: Hash,
        send_root: Hash,
        node_hash: Hash,
    ) -> Result<(), StakerError> {
        if !self.config.enable_fast_confirmation {
            return Ok(());
        }
        let action = Call::FastConfirmNextNode {
            block_hash,
            send_root,
            node_hash,
        };
        match &self.fast_confirmer {
            Some(FastConfirmer::Quorum(quorum)) => {
                quorum.try_confirm(&mut self.batcher, &action).await?;
            }
            Some(FastConfirmer::Direct) | None => {
                info!(
                    wallet = %self.batcher.wallet_address_or_zero(),
                    %node_hash,
                    "Fast confirming node with wallet"
                );
                self.batcher.auth().call(action);
            }
        }
        Ok(())
    }

    /// Hand an active dispute to the dispute engine.
    async fn handle_active_challenge(
        &mut self,
        wallet: Address,
        staker: &StakerRecord,
    ) -> Result<(), StakerError> {
        let Some(challenge) = staker.current_challenge else {
            self.active_challenge = None;
            return Ok(());
        };
        if self.active_challenge != Some(challenge) {
            error!(challenge = challenge.0, "Entered challenge");
            self.active_challenge = Some(challenge);
        }
        self.challenges
            .act(challenge, wallet, self.config.confirmation_blocks)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PostingStrategy;
    use arbiter_core::LedgerError;
    use arbiter_test_helpers::{
        test_assertion, ChainFollower, MockChain, RecordingChallengeHandler, RecordingMetrics,
    };
    use arbiter_txbatch::{BatchError, ContractWallet, EoaWallet};
    use arbiter_types::NodeNum;
    use std::collections::BTreeSet;
    use tracing_test::traced_test;

    const ROLLUP: Address = Address::from_low_u8(0xEE);
    const ME: Address = Address::from_low_u8(1);
    const OTHER: Address = Address::from_low_u8(2);
    const SAFE: Address = Address::from_low_u8(0xF0);

    struct Harness {
        chain: MockChain,
        follower: Arc<ChainFollower>,
        challenges: Arc<RecordingChallengeHandler>,
        metrics: Arc<RecordingMetrics>,
        agent: StakingAgent,
    }

    fn harness_with_wallet(
        chain: MockChain,
        config: StakerConfig,
        wallet: Arc<dyn ValidatorWallet>,
    ) -> Harness {
        let follower = Arc::new(ChainFollower::new(chain.clone()));
        let challenges = Arc::new(RecordingChallengeHandler::default());
        let metrics = Arc::new(RecordingMetrics::default());
        let agent = StakingAgent::new(
            config,
            StakerDeps {
                ledger: Arc::new(chain.clone()),
                quorums: Arc::new(chain.clone()),
                wallet,
                actions: follower.clone(),
                challenges: challenges.clone(),
                metrics: metrics.clone(),
            },
        );
        Harness {
            chain,
            follower,
            challenges,
            metrics,
            agent,
        }
    }

    fn harness(config: StakerConfig) -> Harness {
        let chain = MockChain::new(ROLLUP);
        let wallet = Arc::new(EoaWallet::new(ME, Arc::new(chain.clone())));
        harness_with_wallet(chain, config, wallet)
    }

    fn call_names(chain: &MockChain) -> Vec<&'static str> {
        chain.sent_calls().iter().map(|c| c.type_name()).collect()
    }

    /// Two sibling children of genesis: node 1 wrong, node 2 correct.
    fn fork(h: &Harness) -> (NodeNum, NodeNum) {
        let bad = h.chain.add_node(NodeNum::GENESIS, test_assertion(b"bad", 0, 1));
        let good = h.chain.add_node(NodeNum::GENESIS, test_assertion(b"good", 0, 1));
        h.follower.mark_correct(h.chain.node_hash(good));
        (bad, good)
    }

    #[traced_test]
    #[tokio::test]
    async fn test_watchtower_fork_submits_nothing() {
        let mut h = harness(StakerConfig::with_strategy(Strategy::Watchtower));
        let (_, good) = fork(&h);

        assert_eq!(h.agent.act().await.unwrap(), None);
        assert_eq!(h.agent.act().await.unwrap(), None);

        assert!(h.chain.sent_txs().is_empty());
        assert!(h.agent.memo().contains(good, h.chain.node_hash(good)));
        assert!(logs_contain("Rollup assertion fork detected"));
        assert!(logs_contain("Found incorrect assertion in watchtower mode"));
    }

    #[tokio::test]
    async fn test_defensive_escalates_only_while_forked() {
        let mut h = harness(StakerConfig::with_strategy(Strategy::Defensive));
        let (_, good) = fork(&h);

        // Forked: behaves as StakeLatest and stakes on the correct sibling.
        h.agent.act().await.unwrap().unwrap();
        assert_eq!(call_names(&h.chain), vec!["NewStakeOnExistingNode"]);
        assert_eq!(h.chain.staker(ME).unwrap().latest_staked_node, good);

        // Fork resolved: back to Defensive, which does not want the stake.
        h.chain.force_confirm(good);
        h.agent.act().await.unwrap().unwrap();
        assert_eq!(
            call_names(&h.chain),
            vec![
                "NewStakeOnExistingNode",
                "ReturnOldDeposit",
                "WithdrawStakerFunds"
            ]
        );
        assert!(h.chain.staker(ME).is_none());
    }

    #[tokio::test]
    async fn test_strategy_monotonicity() {
        let mut previous: BTreeSet<&'static str> = BTreeSet::new();
        for strategy in Strategy::ALL {
            let mut h = harness(StakerConfig::with_strategy(strategy));
            let n1 = h.chain.add_node(NodeNum::GENESIS, test_assertion(b"n1", 0, 1));
            h.follower.mark_correct(h.chain.node_hash(n1));

            h.agent.act().await.unwrap();
            let actions: BTreeSet<_> = call_names(&h.chain).into_iter().collect();

            assert!(
                previous.is_subset(&actions),
                "{strategy} dropped actions of a lower strategy"
            );
            assert_eq!(
                actions.contains("NewStakeOnExistingNode"),
                strategy.is_active(),
                "{strategy}"
            );
            previous = actions;
        }
    }

    #[tokio::test]
    async fn test_stake_advances_one_node_per_tick_with_eoa() {
        let mut h = harness(StakerConfig::with_strategy(Strategy::StakeLatest));
        let mut parent = NodeNum::GENESIS;
        for i in 0..3u8 {
            parent = h.chain.add_node(parent, test_assertion(&[i], i as u64, i as u64 + 1));
            h.follower.mark_correct(h.chain.node_hash(parent));
        }

        for expected in 1..=3 {
            h.agent.act().await.unwrap().unwrap();
            assert_eq!(h.chain.staker(ME).unwrap().latest_staked_node, NodeNum(expected));
            let (stakers, _) = h.chain.get_stakers(0, 10).await.unwrap();
            assert_eq!(stakers, vec![ME], "exactly one stake for our address");
        }
        assert_eq!(h.metrics.gauge(STAKER_STAKED_NODE), Some(2.0));
        assert_eq!(h.agent.act().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_contract_wallet_advances_many_nodes_in_one_batch() {
        let chain = MockChain::new(ROLLUP);
        let wallet = Arc::new(ContractWallet::new(Some(ME), OTHER, Arc::new(chain.clone())));
        let mut h = harness_with_wallet(
            chain,
            StakerConfig::with_strategy(Strategy::StakeLatest),
            wallet,
        );
        let mut parent = NodeNum::GENESIS;
        for i in 0..3u8 {
            parent = h.chain.add_node(parent, test_assertion(&[i], i as u64, i as u64 + 1));
            h.follower.mark_correct(h.chain.node_hash(parent));
        }

        h.agent.act().await.unwrap().unwrap();
        assert_eq!(h.chain.sent_txs().len(), 1);
        assert_eq!(
            call_names(&h.chain),
            vec![
                "NewStakeOnExistingNode",
                "StakeOnExistingNode",
                "StakeOnExistingNode"
            ]
        );
        assert_eq!(h.chain.staker(ME).unwrap().latest_staked_node, parent);
    }

    #[tokio::test]
    async fn test_nonce_mismatch_aborts_tick() {
        let mut h = harness(StakerConfig::with_strategy(Strategy::StakeLatest));
        let n1 = h.chain.add_node(NodeNum::GENESIS, test_assertion(b"n1", 0, 1));
        h.follower.mark_correct(h.chain.node_hash(n1));

        h.chain.set_pending_nonce_offset(ME, 1);
        let err = h.agent.act().await.unwrap_err();
        assert!(matches!(err, StakerError::NonceAhead { local: 1, chain: 0 }));
        assert!(err.ephemeral_class().is_some());

        h.chain.set_pending_nonce_offset(ME, 0);
        h.agent.act().await.unwrap().unwrap();

        h.chain.set_pending_nonce_offset(ME, -1);
        let err = h.agent.act().await.unwrap_err();
        assert!(matches!(err, StakerError::NonceBehind { local: 0, chain: 1 }));
        assert!(err.ephemeral_class().is_none());
    }

    #[traced_test]
    #[tokio::test]
    async fn test_not_whitelisted_skips_tick() {
        let mut h = harness(StakerConfig::with_strategy(Strategy::StakeLatest));
        let n1 = h.chain.add_node(NodeNum::GENESIS, test_assertion(b"n1", 0, 1));
        h.follower.mark_correct(h.chain.node_hash(n1));
        h.chain.set_whitelist(&[OTHER]);

        assert_eq!(h.agent.act().await.unwrap(), None);
        assert!(h.chain.sent_txs().is_empty());
        assert!(logs_contain("isn't whitelisted"));

        h.chain.set_whitelist(&[ME]);
        assert!(h.agent.act().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_high_gas_delays_within_budget() {
        let config = StakerConfig::with_strategy(Strategy::StakeLatest).posting(PostingStrategy {
            high_gas_threshold: 50.0,
            high_gas_delay_blocks: 10,
        });
        let mut h = harness(config);
        h.chain.set_gas_price_gwei(10.0);
        assert_eq!(h.agent.act().await.unwrap(), None);
        h.chain.advance_blocks(20);
        assert_eq!(h.agent.act().await.unwrap(), None);

        let n1 = h.chain.add_node(NodeNum::GENESIS, test_assertion(b"n1", 0, 1));
        h.follower.mark_correct(h.chain.node_hash(n1));
        h.chain.set_gas_price_gwei(80.0);
        h.chain.advance_blocks(2);
        assert_eq!(h.agent.act().await.unwrap(), None);
        assert!(h.chain.sent_txs().is_empty());

        h.chain.advance_blocks(20);
        assert!(h.agent.act().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_high_gas_at_startup_waits_for_budget() {
        let config = StakerConfig::with_strategy(Strategy::StakeLatest).posting(PostingStrategy {
            high_gas_threshold: 50.0,
            high_gas_delay_blocks: 10,
        });
        let mut h = harness(config);
        let n1 = h.chain.add_node(NodeNum::GENESIS, test_assertion(b"n1", 0, 1));
        h.follower.mark_correct(h.chain.node_hash(n1));
        h.chain.set_gas_price_gwei(80.0);

        assert_eq!(h.agent.act().await.unwrap(), None);
        h.chain.advance_blocks(9);
        assert_eq!(h.agent.act().await.unwrap(), None);
        assert!(h.chain.sent_txs().is_empty());

        h.chain.advance_blocks(1);
        assert!(h.agent.act().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_fast_confirm_direct_after_staking() {
        let config = StakerConfig::with_strategy(Strategy::StakeLatest).fast_confirmation(true);
        let mut h = harness(config);
        h.chain.set_fast_confirmer(ME);
        let n1 = h.chain.add_node(NodeNum::GENESIS, test_assertion(b"n1", 0, 1));
        h.follower.mark_correct(h.chain.node_hash(n1));

        h.agent.initialize().await.unwrap();
        assert!(matches!(h.agent.fast_confirmer(), Some(FastConfirmer::Direct)));

        h.agent.act().await.unwrap().unwrap();
        assert_eq!(
            call_names(&h.chain),
            vec!["NewStakeOnExistingNode", "FastConfirmNextNode"]
        );
        assert_eq!(h.chain.confirmed(), n1);
    }

    #[tokio::test]
    async fn test_fast_confirm_first_unresolved_returns_early() {
        let config = StakerConfig::with_strategy(Strategy::StakeLatest).fast_confirmation(true);
        let mut h = harness(config);
        h.chain.set_fast_confirmer(ME);
        let n1 = h.chain.add_node(NodeNum::GENESIS, test_assertion(b"n1", 0, 1));
        let n2 = h.chain.add_node(n1, test_assertion(b"n2", 1, 2));
        h.follower.mark_correct(h.chain.node_hash(n2));
        h.chain.add_staker(ME, n1, 1_000);
        h.agent.initialize().await.unwrap();

        h.agent.act().await.unwrap().unwrap();
        // Stake advancement waits for the next tick.
        assert_eq!(call_names(&h.chain), vec!["FastConfirmNextNode"]);
        assert_eq!(h.chain.confirmed(), n1);
        assert_eq!(h.chain.staker(ME).unwrap().latest_staked_node, n1);
    }

    #[tokio::test]
    async fn test_fast_confirm_through_quorum() {
        let config = StakerConfig::with_strategy(Strategy::StakeLatest).fast_confirmation(true);
        let mut h = harness(config);
        h.chain.add_quorum(SAFE, vec![OTHER, ME], 1);
        h.chain.set_fast_confirmer(SAFE);
        let n1 = h.chain.add_node(NodeNum::GENESIS, test_assertion(b"n1", 0, 1));
        h.follower.mark_correct(h.chain.node_hash(n1));

        h.agent.initialize().await.unwrap();
        assert!(matches!(h.agent.fast_confirmer(), Some(FastConfirmer::Quorum(_))));

        h.agent.act().await.unwrap().unwrap();
        assert_eq!(
            call_names(&h.chain),
            vec!["NewStakeOnExistingNode", "ApproveHash", "ExecTransaction"]
        );
        assert_eq!(h.chain.confirmed(), n1);
        assert_eq!(h.chain.quorum_nonce(SAFE), Some(1));
    }

    #[tokio::test]
    async fn test_fast_confirmation_setup_errors() {
        let config = StakerConfig::with_strategy(Strategy::StakeLatest).fast_confirmation(true);

        let mut h = harness(config.clone());
        let err = h.agent.initialize().await.unwrap_err();
        assert!(matches!(err, StakerError::Config(ConfigError::NoFastConfirmer)));

        let mut h = harness(config.clone());
        h.chain.add_quorum(SAFE, vec![OTHER], 1);
        h.chain.set_fast_confirmer(SAFE);
        let err = h.agent.initialize().await.unwrap_err();
        assert!(matches!(
            err,
            StakerError::Config(ConfigError::NotQuorumOwner { wallet: ME, quorum: SAFE })
        ));

        let chain = MockChain::new(ROLLUP);
        let wallet = Arc::new(ContractWallet::new(None, ME, Arc::new(chain.clone())));
        let mut h = harness_with_wallet(chain, config, wallet);
        let err = h.agent.initialize().await.unwrap_err();
        assert!(matches!(
            err,
            StakerError::Config(ConfigError::FastConfirmWithoutWallet)
        ));
    }

    #[tokio::test]
    async fn test_idle_staker_opens_dispute() {
        let mut h = harness(StakerConfig::with_strategy(Strategy::StakeLatest));
        let (bad, good) = fork(&h);
        h.chain.add_staker(ME, good, 1_000);
        h.chain.add_staker(OTHER, bad, 1_000);

        h.agent.act().await.unwrap().unwrap();
        assert_eq!(call_names(&h.chain), vec!["CreateChallenge"]);
        assert!(h.chain.staker(ME).unwrap().in_challenge());
    }

    #[tokio::test]
    async fn test_active_dispute_is_delegated() {
        let mut config = StakerConfig::with_strategy(Strategy::StakeLatest);
        config.confirmation_blocks = 6;
        let mut h = harness(config);
        let n1 = h.chain.add_node(NodeNum::GENESIS, test_assertion(b"n1", 0, 1));
        h.chain.add_staker(ME, n1, 1_000);
        h.chain.set_challenge(ME, Some(ChallengeId(4)));

        h.agent.act().await.unwrap();
        h.agent.act().await.unwrap();
        assert_eq!(
            h.challenges.moves(),
            vec![(ChallengeId(4), ME, 6), (ChallengeId(4), ME, 6)]
        );
    }

    #[tokio::test]
    async fn test_error_drops_queued_calls() {
        let chain = MockChain::new(ROLLUP);
        let wallet = Arc::new(ContractWallet::new(Some(ME), OTHER, Arc::new(chain.clone())));
        let mut h = harness_with_wallet(
            chain,
            StakerConfig::with_strategy(Strategy::StakeLatest),
            wallet,
        );
        h.chain.set_withdrawable(ME, 5);
        h.follower.set_validation_pending(true);

        let err = h.agent.act().await.unwrap_err();
        assert!(err.ephemeral_class().is_some());
        assert_eq!(h.agent.batcher().building_transaction_count(), 0);
        assert!(h.chain.sent_txs().is_empty());
    }

    #[tokio::test]
    async fn test_submission_failure_is_reported() {
        let mut h = harness(StakerConfig::with_strategy(Strategy::StakeLatest));
        let n1 = h.chain.add_node(NodeNum::GENESIS, test_assertion(b"n1", 0, 1));
        h.follower.mark_correct(h.chain.node_hash(n1));
        h.chain.fail_next_send(LedgerError::MempoolFull);

        let err = h.agent.act().await.unwrap_err();
        assert!(matches!(err, StakerError::Batch(BatchError::Ledger(LedgerError::MempoolFull))));
        assert!(h.chain.staker(ME).is_none());
    }

    #[tokio::test]
    async fn test_resolve_nodes_times_out_disputes_first() {
        let mut h = harness(StakerConfig::with_strategy(Strategy::ResolveNodes));
        let n1 = h.chain.add_node(NodeNum::GENESIS, test_assertion(b"n1", 0, 1));
        h.follower.mark_correct(h.chain.node_hash(n1));
        h.chain.add_timed_out_challenge(ChallengeId(7));

        h.agent.act().await.unwrap().unwrap();
        assert_eq!(call_names(&h.chain), vec!["TimeoutChallenges"]);
    }

    #[tokio::test]
    async fn test_resolve_nodes_confirms_decidable_node() {
        let mut h = harness(StakerConfig::with_strategy(Strategy::ResolveNodes));
        let n1 = h.chain.add_node(NodeNum::GENESIS, test_assertion(b"n1", 0, 1));
        h.follower.mark_correct(h.chain.node_hash(n1));
        h.chain.set_decidable(arbiter_types::ConfirmType::Valid);

        h.agent.act().await.unwrap().unwrap();
        // An EOA cannot stake in the same tick.
        assert_eq!(call_names(&h.chain), vec!["ConfirmNextNode"]);
        assert_eq!(h.chain.confirmed(), n1);
    }
}
