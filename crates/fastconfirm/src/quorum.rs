//! Threshold-approval coordination for fast confirmation.
//!
//! A fast confirmation is a rollup call executed by a multi-owner quorum
//! contract. Each owner approves the action's digest on-chain; once enough
//! have approved, any owner can execute it with a signature blob naming the
//! approvers.
//!
//! # Protocol
//!
//! ```text
//! nonce ──► digest(action, nonce)
//!               │
//!      already approved by us? ──yes──► check_and_execute
//!               │ no
//!          ApproveHash ──► flush ──► check_and_execute
//!                                        │ insufficient
//!                                   flush ──► check_and_execute (once)
//! ```
//!
//! A second owner can reach quorum between our approval and our reads of
//! the other approvals. The single retry covers that window. Running out
//! of approvals is a normal outcome, not an error.

use crate::error::QuorumError;
use crate::tracker::ApprovalTracker;
use arbiter_core::{Call, LedgerClient, QuorumContract, SafeTransaction};
use arbiter_txbatch::TxBatcher;
use arbiter_types::{Address, Hash};
use std::sync::Arc;
use tracing::{debug, info};

/// Result of a fast-confirmation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuorumOutcome {
    /// The execute call is queued on the batcher.
    Executed { approvals: usize },
    /// Not enough owners approved yet. Nothing was queued for execution.
    Insufficient { approvals: usize, threshold: u64 },
}

impl QuorumOutcome {
    pub fn is_executed(&self) -> bool {
        matches!(self, QuorumOutcome::Executed { .. })
    }
}

/// A loaded quorum contract acting as the rollup's fast-confirmer.
pub struct FastConfirmQuorum {
    /// Quorum contract.
    contract: Arc<dyn QuorumContract>,
    /// Ledger, for waiting on flushed transactions.
    ledger: Arc<dyn LedgerClient>,
    /// Owners sorted ascending by address.
    owners: Vec<Address>,
    /// Approvals needed to execute.
    threshold: u64,
    /// Target of proposed actions.
    rollup: Address,
}

impl std::fmt::Debug for FastConfirmQuorum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastConfirmQuorum")
            .field("address", &self.contract.address())
            .field("owners", &self.owners)
            .field("threshold", &self.threshold)
            .finish()
    }
}

impl FastConfirmQuorum {
    /// Read the owner set and threshold of `contract`.
    ///
    /// Owners are sorted ascending regardless of the order the contract
    /// reports them in.
    pub async fn load(
        contract: Arc<dyn QuorumContract>,
        ledger: Arc<dyn LedgerClient>,
    ) -> Result<Self, QuorumError> {
        let mut owners = contract
            .get_owners()
            .await
            .map_err(QuorumError::NotAQuorum)?;
        let threshold = contract
            .get_threshold()
            .await
            .map_err(QuorumError::NotAQuorum)?;

        owners.sort();
        owners.dedup();
        if threshold == 0 || threshold as usize > owners.len() {
            return Err(QuorumError::InvalidThreshold {
                threshold,
                owners: owners.len(),
            });
        }

        let rollup = ledger.rollup_address();
        debug!(
            quorum = %contract.address(),
            owners = owners.len(),
            threshold,
            "Loaded fast-confirm quorum"
        );
        Ok(Self {
            contract,
            ledger,
            owners,
            threshold,
            rollup,
        })
    }

    /// Quorum contract address.
    pub fn address(&self) -> Address {
        self.contract.address()
    }

    /// Owners in ascending order.
    pub fn owners(&self) -> &[Address] {
        &self.owners
    }

    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    /// Whether `addr` is an owner according to the contract.
    pub async fn is_owner(&self, addr: Address) -> Result<bool, QuorumError> {
        Ok(self.contract.is_owner(addr).await?)
    }

    /// Get `action` executed by the quorum.
    ///
    /// Approvals are flushed as needed; the final execute call is left
    /// queued on `batcher` for the caller to submit.
    pub async fn try_confirm(
        &self,
        batcher: &mut TxBatcher,
        action: &Call,
    ) -> Result<QuorumOutcome, QuorumError> {
        let wallet = batcher.wallet_address().ok_or(QuorumError::MissingWallet)?;
        let calldata = action.calldata();

        let nonce = self.contract.nonce().await?;
        let tx = SafeTransaction::call(action.target(self.rollup), calldata, nonce);
        let digest = self.contract.get_transaction_hash(&tx).await?;

        if !batcher.can_batch_txs() {
            self.flush_transactions(batcher).await?;
        }

        if self.contract.approved_hashes(wallet, digest).await? {
            debug!(%digest, nonce, "Digest already approved");
            return self.check_and_execute(batcher, wallet, &tx, digest).await;
        }

        info!(%digest, nonce, action = action.type_name(), "Approving quorum action");
        batcher.auth().call(Call::ApproveHash {
            safe: self.address(),
            digest,
        });
        if !batcher.can_batch_txs() {
            self.flush_transactions(batcher).await?;
        }

        let outcome = self.check_and_execute(batcher, wallet, &tx, digest).await?;
        if outcome.is_executed() {
            return Ok(outcome);
        }

        // Another owner may have reached quorum while our approval landed.
        self.flush_transactions(batcher).await?;
        self.check_and_execute(batcher, wallet, &tx, digest).await
    }

    /// Count approvals of `digest` and queue execution if there are enough.
    ///
    /// Our own approval is counted without a read; every other owner's is
    /// read from the contract.
    pub async fn check_and_execute(
        &self,
        batcher: &mut TxBatcher,
        wallet: Address,
        tx: &SafeTransaction,
        digest: Hash,
    ) -> Result<QuorumOutcome, QuorumError> {
        let mut tracker = ApprovalTracker::new(digest, &self.owners, self.threshold);
        for (index, owner) in self.owners.iter().enumerate() {
            let approved = *owner == wallet || self.contract.approved_hashes(*owner, digest).await?;
            if approved {
                tracker.record(index);
            }
        }

        let approvals = tracker.approval_count();
        if !tracker.has_quorum() {
            info!(
                approvals,
                threshold = self.threshold,
                "Not enough approvals to execute quorum action"
            );
            return Ok(QuorumOutcome::Insufficient {
                approvals,
                threshold: self.threshold,
            });
        }

        info!(approvals, threshold = self.threshold, "Executing quorum action");
        batcher.auth().call(Call::ExecTransaction {
            safe: self.address(),
            tx: Box::new(tx.clone()),
            signatures: tracker.signatures(),
        });
        Ok(QuorumOutcome::Executed { approvals })
    }

    /// Submit everything queued and wait for it to be approved.
    async fn flush_transactions(&self, batcher: &mut TxBatcher) -> Result<(), QuorumError> {
        if let Some(hash) = batcher.execute_transactions().await? {
            self.ledger.wait_for_tx_approval(hash).await?;
        }
        Ok(())
    }
}
