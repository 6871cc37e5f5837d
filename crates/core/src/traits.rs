//! Capability traits for the systems the agent talks to.
//!
//! Each external system gets its own trait so tests can substitute an
//! in-memory implementation and production can plug in a real client:
//!
//! - [`LedgerClient`]: reads from the rollup ledger contract and its host chain
//! - [`QuorumContract`]: reads from a threshold-approval (Safe) contract
//! - [`ValidatorWallet`]: sends calls, either one by one or as an atomic batch
//! - [`TxSubmitter`]: raw transaction boundary below the wallet
//! - [`NodeActionSource`] and [`ChallengeHandler`]: local validation and the
//!   bisection engine, both outside this workspace
//!
//! All traits are object safe and used as `Arc<dyn Trait>`.

use crate::call::{OutgoingTx, PendingCall, SafeTransaction};
use crate::error::{ActionError, LedgerError};
use arbiter_types::{
    Address, Assertion, BlockNumber, ChallengeId, ConfirmType, ConflictRecord, Hash, NodeNum,
    NodeRecord, StakerRecord, Strategy, TxHash, Wei,
};
use async_trait::async_trait;
use std::sync::Arc;

/// Read access to the rollup ledger contract and the chain hosting it.
///
/// Writes go through [`ValidatorWallet`] as [`crate::Call`] values.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Address of the rollup contract.
    fn rollup_address(&self) -> Address;

    // ═══════════════════════════════════════════════════════════════════════
    // Nodes
    // ═══════════════════════════════════════════════════════════════════════

    /// Latest node `staker` is staked on, and its hash.
    ///
    /// For an address without a stake (including the zero address) this is
    /// the latest confirmed node.
    async fn latest_staked(&self, staker: Address) -> Result<(NodeNum, Hash), LedgerError>;

    /// Latest confirmed node.
    async fn latest_confirmed(&self) -> Result<NodeNum, LedgerError>;

    /// First node that is neither confirmed nor rejected.
    async fn first_unresolved_node(&self) -> Result<NodeNum, LedgerError>;

    /// Full record of node `num`.
    async fn lookup_node(&self, num: NodeNum) -> Result<NodeRecord, LedgerError>;

    /// Whether `staker` is staked on node `num` or one of its descendants.
    async fn node_has_staker(&self, num: NodeNum, staker: Address) -> Result<bool, LedgerError>;

    /// Whether all unresolved nodes form a single chain (no fork).
    async fn are_unresolved_nodes_linear(&self) -> Result<bool, LedgerError>;

    /// Whether the first unresolved node can be confirmed or rejected now.
    async fn check_decidable_next_node(&self) -> Result<ConfirmType, LedgerError>;

    // ═══════════════════════════════════════════════════════════════════════
    // Stakers
    // ═══════════════════════════════════════════════════════════════════════

    /// Stake record for `staker`, if it holds one.
    async fn staker_info(&self, staker: Address) -> Result<Option<StakerRecord>, LedgerError>;

    /// Page of stakers starting at `offset`, and whether more remain.
    async fn get_stakers(
        &self,
        offset: u64,
        limit: u64,
    ) -> Result<(Vec<Address>, bool), LedgerError>;

    /// Search for a conflict between the claims of two stakers.
    async fn find_staker_conflict(
        &self,
        staker1: Address,
        staker2: Address,
        depth_limit: u64,
    ) -> Result<ConflictRecord, LedgerError>;

    /// Collateral required to place a new stake now.
    async fn current_required_stake(&self) -> Result<Wei, LedgerError>;

    /// Collateral required when no disputes are slowing the chain down.
    async fn base_stake(&self) -> Result<Wei, LedgerError>;

    /// Funds `staker` can withdraw.
    async fn withdrawable_funds(&self, staker: Address) -> Result<Wei, LedgerError>;

    /// Disputes whose deadline has passed, paginated.
    async fn timed_out_challenges(
        &self,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<ChallengeId>, LedgerError>;

    /// Whether anyone may stake.
    async fn validator_whitelist_disabled(&self) -> Result<bool, LedgerError>;

    /// Whether `addr` is on the validator whitelist.
    async fn is_validator(&self, addr: Address) -> Result<bool, LedgerError>;

    /// Configured fast-confirmer. Zero when fast confirmation is off.
    async fn any_trust_fast_confirmer(&self) -> Result<Address, LedgerError>;

    /// Grace period for disputes.
    ///
    /// Only the successor protocol's contract has this method; on the legacy
    /// contract the call reverts.
    async fn challenge_grace_period_blocks(&self) -> Result<u64, LedgerError>;

    // ═══════════════════════════════════════════════════════════════════════
    // Host chain
    // ═══════════════════════════════════════════════════════════════════════

    /// Suggested gas price, in gwei.
    async fn suggest_gas_price_gwei(&self) -> Result<f64, LedgerError>;

    /// Latest block number.
    async fn block_number(&self) -> Result<BlockNumber, LedgerError>;

    /// Confirmed nonce of `addr`.
    async fn nonce_at(&self, addr: Address) -> Result<u64, LedgerError>;

    /// Balance of `addr`.
    async fn balance_at(&self, addr: Address) -> Result<Wei, LedgerError>;

    /// Wait until `tx` is included with the configured number of confirmations.
    async fn wait_for_tx_approval(&self, tx: TxHash) -> Result<(), LedgerError>;
}

/// Read access to a threshold-approval contract.
#[async_trait]
pub trait QuorumContract: Send + Sync {
    /// Address of the contract.
    fn address(&self) -> Address;

    /// Nonce the next executed action will consume.
    async fn nonce(&self) -> Result<u64, LedgerError>;

    /// Digest of `tx` as the contract computes it.
    async fn get_transaction_hash(&self, tx: &SafeTransaction) -> Result<Hash, LedgerError>;

    /// Whether `owner` has approved `digest` on-chain.
    async fn approved_hashes(&self, owner: Address, digest: Hash) -> Result<bool, LedgerError>;

    /// Owner list, in the contract's own order.
    async fn get_owners(&self) -> Result<Vec<Address>, LedgerError>;

    /// Number of approvals needed to execute.
    async fn get_threshold(&self) -> Result<u64, LedgerError>;

    /// Whether `addr` is an owner.
    async fn is_owner(&self, addr: Address) -> Result<bool, LedgerError>;
}

/// Binds quorum contracts by address.
#[async_trait]
pub trait QuorumConnector: Send + Sync {
    /// Connect to the quorum contract at `address`.
    async fn connect(&self, address: Address) -> Result<Arc<dyn QuorumContract>, LedgerError>;
}

/// Signs and sends calls on behalf of the validator.
#[async_trait]
pub trait ValidatorWallet: Send + Sync {
    /// Address that holds the stake, if a wallet exists yet.
    fn address(&self) -> Option<Address>;

    /// [`ValidatorWallet::address`], or the zero address.
    fn address_or_zero(&self) -> Address {
        self.address().unwrap_or(Address::ZERO)
    }

    /// Account that signs and pays for outer transactions.
    fn tx_sender_address(&self) -> Option<Address>;

    /// Whether several calls can be executed in one atomic transaction.
    fn can_batch_txs(&self) -> bool;

    /// Pending nonce of the transaction sender as seen locally.
    async fn local_nonce(&self) -> Result<u64, LedgerError>;

    /// Send `calls`. Returns the last submitted transaction, or `None` when
    /// there was nothing to send.
    async fn execute_transactions(
        &self,
        calls: Vec<PendingCall>,
    ) -> Result<Option<TxHash>, LedgerError>;
}

/// Raw transaction boundary.
#[async_trait]
pub trait TxSubmitter: Send + Sync {
    /// Sign and broadcast `tx`.
    async fn send(&self, tx: OutgoingTx) -> Result<TxHash, LedgerError>;

    /// Pending nonce of `addr`, including transactions not yet included.
    async fn pending_nonce(&self, addr: Address) -> Result<u64, LedgerError>;
}

/// Which node the agent should target next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeAction {
    /// Create a node for a freshly computed assertion.
    CreateNewNode {
        assertion: Assertion,
        hash: Hash,
        prev_inbox_max_count: u64,
    },
    /// Stake on a node that already exists.
    UseExistingNode { number: NodeNum, hash: Hash },
    /// Nothing to do; stop progressing this tick.
    NoAction,
}

/// Output of the node-action generator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedAction {
    pub action: NodeAction,
    /// Some unresolved node after our stake disagrees with local execution.
    pub wrong_nodes_exist: bool,
}

/// Local validation: decides which node is correct after a given one.
#[async_trait]
pub trait NodeActionSource: Send + Sync {
    /// Decide the next step from the node at `from` with hash `from_hash`.
    async fn generate_node_action(
        &self,
        from: NodeNum,
        from_hash: Hash,
        strategy: Strategy,
    ) -> Result<GeneratedAction, ActionError>;
}

/// The bisection engine for one active dispute.
#[async_trait]
pub trait ChallengeHandler: Send + Sync {
    /// Make the next move in `challenge` for `staker`, if any is due.
    ///
    /// Parent-chain state is read `confirmation_blocks` behind the head.
    async fn act(
        &self,
        challenge: ChallengeId,
        staker: Address,
        confirmation_blocks: u64,
    ) -> Result<(), ActionError>;
}

/// Observes the latest node our wallet is staked on.
pub trait LatestStakedNotifier: Send + Sync {
    fn update_latest_staked(&self, node: NodeNum, hash: Hash);
}

/// Observes the latest confirmed node.
pub trait LatestConfirmedNotifier: Send + Sync {
    fn update_latest_confirmed(&self, node: NodeNum, hash: Hash);
}
