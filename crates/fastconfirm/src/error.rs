//! Error types for fast confirmation.

use arbiter_core::LedgerError;
use arbiter_txbatch::BatchError;
use thiserror::Error;

/// Errors during fast confirmation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuorumError {
    /// No validator wallet address is configured.
    #[error("fast confirmation requires a wallet address")]
    MissingWallet,

    /// The address does not answer like a quorum contract.
    #[error("fast confirmer is not a quorum contract: {0}")]
    NotAQuorum(LedgerError),

    /// The quorum reports a threshold no owner set can meet.
    #[error("quorum threshold {threshold} invalid for {owners} owners")]
    InvalidThreshold { threshold: u64, owners: usize },

    /// A quorum or ledger read failed.
    #[error("quorum read failed: {0}")]
    Ledger(#[from] LedgerError),

    /// Flushing queued transactions failed.
    #[error("flushing transactions failed: {0}")]
    Batch(#[from] BatchError),
}
