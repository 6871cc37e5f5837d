//! Error types for external collaborators.

use arbiter_types::NodeNum;
use thiserror::Error;

/// Errors from the ledger, a quorum contract or the transaction submitter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// The call executed and reverted.
    #[error("execution reverted: {0}")]
    Reverted(String),

    /// The ledger could not be reached or returned garbage.
    #[error("transport error: {0}")]
    Transport(String),

    /// A record the caller expected does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A transaction was refused before inclusion.
    #[error("transaction rejected: {0}")]
    Rejected(String),

    /// The sender's mempool allowance is used up.
    #[error("mempool size exceeded for sender")]
    MempoolFull,
}

impl LedgerError {
    /// Check if this is a contract revert.
    pub fn is_revert(&self) -> bool {
        matches!(self, LedgerError::Reverted(_))
    }
}

/// Errors from the node-action generator or the dispute engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActionError {
    /// Local validation has not reached the node yet.
    #[error("block validation is still pending for {0}")]
    ValidationPending(NodeNum),

    /// A ledger read or write failed.
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// Any other failure.
    #[error("{0}")]
    Failed(String),
}
