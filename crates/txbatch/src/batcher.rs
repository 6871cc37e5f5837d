//! Transaction batching.
//!
//! The agent decides a tick's worth of calls before sending any of them.
//! [`TxBatcher`] collects those calls and hands them to the wallet in one go
//! on [`TxBatcher::execute_transactions`]. With a contract wallet the whole
//! batch is one atomic transaction; with an EOA wallet the calls go out one
//! by one, in queue order.
//!
//! # Authorization
//!
//! Calls are queued through a scoped [`Auth`] obtained from
//! [`TxBatcher::auth`] or [`TxBatcher::auth_with_amount`]. An `Auth` is
//! consumed by exactly one call, so the amount attached to it can never
//! leak onto a second call.

use crate::error::BatchError;
use arbiter_core::{Call, PendingCall, ValidatorWallet};
use arbiter_types::{Address, TxHash, Wei};
use std::sync::Arc;
use tracing::{debug, info};

/// Collects calls for one tick and submits them together.
pub struct TxBatcher {
    /// Rollup contract; default target of queued calls.
    rollup: Address,

    /// Wallet that signs and sends.
    wallet: Arc<dyn ValidatorWallet>,

    /// Calls queued since the last execute or clear.
    pending: Vec<PendingCall>,
}

impl TxBatcher {
    /// Create a batcher sending through `wallet`.
    pub fn new(rollup: Address, wallet: Arc<dyn ValidatorWallet>) -> Self {
        Self {
            rollup,
            wallet,
            pending: Vec::new(),
        }
    }

    /// Number of calls queued and not yet sent.
    pub fn building_transaction_count(&self) -> usize {
        self.pending.len()
    }

    /// Calls queued and not yet sent, in order.
    pub fn pending(&self) -> &[PendingCall] {
        &self.pending
    }

    /// Drop every queued call without sending it.
    pub fn clear_transactions(&mut self) {
        if !self.pending.is_empty() {
            debug!(dropped = self.pending.len(), "Clearing queued calls");
        }
        self.pending.clear();
    }

    /// Authorization for one zero-value call.
    pub fn auth(&mut self) -> Auth<'_> {
        self.auth_with_amount(0)
    }

    /// Authorization for one call carrying `amount`.
    pub fn auth_with_amount(&mut self, amount: Wei) -> Auth<'_> {
        Auth {
            batcher: self,
            value: amount,
        }
    }

    /// Send everything queued. Returns the last submitted transaction, or
    /// `None` when nothing was queued.
    ///
    /// The queue is emptied before sending, so a failed submission is not
    /// retried by a later call.
    pub async fn execute_transactions(&mut self) -> Result<Option<TxHash>, BatchError> {
        if self.pending.is_empty() {
            return Ok(None);
        }
        if self.wallet.address().is_none() {
            self.pending.clear();
            return Err(BatchError::NoWallet);
        }

        let calls = std::mem::take(&mut self.pending);
        let names: Vec<&'static str> = calls.iter().map(|c| c.call.type_name()).collect();
        info!(count = calls.len(), calls = ?names, "Submitting transactions");

        Ok(self.wallet.execute_transactions(calls).await?)
    }

    /// Address holding the stake, if any.
    pub fn wallet_address(&self) -> Option<Address> {
        self.wallet.address()
    }

    /// Address holding the stake, or the zero address.
    pub fn wallet_address_or_zero(&self) -> Address {
        self.wallet.address_or_zero()
    }

    /// Whether queued calls are sent as one atomic transaction.
    pub fn can_batch_txs(&self) -> bool {
        self.wallet.can_batch_txs()
    }

    /// Whether another call may be queued this tick.
    ///
    /// True when the wallet batches atomically or nothing is queued yet.
    pub fn can_act_further(&self) -> bool {
        self.can_batch_txs() || self.pending.is_empty()
    }

    /// The wallet behind this batcher.
    pub fn wallet(&self) -> &Arc<dyn ValidatorWallet> {
        &self.wallet
    }

    /// Rollup contract address.
    pub fn rollup(&self) -> Address {
        self.rollup
    }
}

/// Authorization for exactly one call. See [`TxBatcher::auth`].
#[must_use = "an Auth does nothing until a call is made with it"]
pub struct Auth<'a> {
    batcher: &'a mut TxBatcher,
    value: Wei,
}

impl Auth<'_> {
    /// Queue `call`, consuming the authorization.
    pub fn call(self, call: Call) {
        let to = call.target(self.batcher.rollup);
        debug!(call = call.type_name(), %to, value = self.value, "Queued call");
        self.batcher.pending.push(PendingCall {
            to,
            value: self.value,
            call,
        });
    }
}
