//! Validator wallets.
//!
//! Two ways of sending the agent's calls:
//!
//! - [`EoaWallet`]: the signing account is also the staker. Every call is
//!   its own transaction, so nothing can be batched atomically.
//! - [`ContractWallet`]: a smart-contract wallet holds the stake and the
//!   signing account drives it. All queued calls go out in one transaction
//!   and either all apply or none do.

use arbiter_core::{LedgerError, OutgoingTx, PendingCall, TxPayload, TxSubmitter, ValidatorWallet};
use arbiter_types::{Address, TxHash};
use async_trait::async_trait;
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

/// Which wallet variant backs the validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WalletMode {
    /// Externally-owned account.
    #[default]
    Eoa,
    /// Smart-contract wallet.
    Contract,
}

impl fmt::Display for WalletMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WalletMode::Eoa => f.write_str("eoa"),
            WalletMode::Contract => f.write_str("contract"),
        }
    }
}

impl FromStr for WalletMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "eoa" => Ok(WalletMode::Eoa),
            "contract" => Ok(WalletMode::Contract),
            other => Err(format!("unknown wallet mode: {other}")),
        }
    }
}

impl WalletMode {
    /// Build the wallet this mode names.
    ///
    /// `sender` signs every transaction. `contract` is the deployed wallet
    /// contract, ignored by [`WalletMode::Eoa`].
    pub fn build(
        self,
        sender: Address,
        contract: Option<Address>,
        submitter: Arc<dyn TxSubmitter>,
    ) -> Arc<dyn ValidatorWallet> {
        match self {
            WalletMode::Eoa => Arc::new(EoaWallet::new(sender, submitter)),
            WalletMode::Contract => Arc::new(ContractWallet::new(contract, sender, submitter)),
        }
    }
}

/// Wallet where the signing account holds the stake itself.
pub struct EoaWallet {
    account: Address,
    submitter: Arc<dyn TxSubmitter>,
}

impl EoaWallet {
    pub fn new(account: Address, submitter: Arc<dyn TxSubmitter>) -> Self {
        Self { account, submitter }
    }
}

#[async_trait]
impl ValidatorWallet for EoaWallet {
    fn address(&self) -> Option<Address> {
        Some(self.account)
    }

    fn tx_sender_address(&self) -> Option<Address> {
        Some(self.account)
    }

    fn can_batch_txs(&self) -> bool {
        false
    }

    async fn local_nonce(&self) -> Result<u64, LedgerError> {
        self.submitter.pending_nonce(self.account).await
    }

    async fn execute_transactions(
        &self,
        calls: Vec<PendingCall>,
    ) -> Result<Option<TxHash>, LedgerError> {
        let mut last = None;
        for call in calls {
            debug!(call = call.call.type_name(), to = %call.to, "Sending call");
            let tx = OutgoingTx {
                from: self.account,
                to: call.to,
                value: call.value,
                payload: TxPayload::Direct(call),
            };
            last = Some(self.submitter.send(tx).await?);
        }
        Ok(last)
    }
}

/// Smart-contract wallet driven by a separate signing account.
pub struct ContractWallet {
    wallet: Option<Address>,
    sender: Address,
    submitter: Arc<dyn TxSubmitter>,
}

impl ContractWallet {
    /// `wallet` is `None` until the wallet contract has been deployed.
    pub fn new(wallet: Option<Address>, sender: Address, submitter: Arc<dyn TxSubmitter>) -> Self {
        Self {
            wallet,
            sender,
            submitter,
        }
    }
}

#[async_trait]
impl ValidatorWallet for ContractWallet {
    fn address(&self) -> Option<Address> {
        self.wallet
    }

    fn tx_sender_address(&self) -> Option<Address> {
        Some(self.sender)
    }

    fn can_batch_txs(&self) -> bool {
        true
    }

    async fn local_nonce(&self) -> Result<u64, LedgerError> {
        self.submitter.pending_nonce(self.sender).await
    }

    async fn execute_transactions(
        &self,
        calls: Vec<PendingCall>,
    ) -> Result<Option<TxHash>, LedgerError> {
        if calls.is_empty() {
            return Ok(None);
        }
        let Some(wallet) = self.wallet else {
            return Err(LedgerError::Rejected("wallet contract not deployed".into()));
        };
        let value = calls.iter().map(|c| c.value).sum();
        debug!(calls = calls.len(), %wallet, "Sending wallet batch");
        let tx = OutgoingTx {
            from: self.sender,
            to: wallet,
            value,
            payload: TxPayload::WalletBatch(calls),
        };
        self.submitter.send(tx).await.map(Some)
    }
}
