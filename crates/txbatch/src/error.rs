//! Error types for batching.

use arbiter_core::LedgerError;
use thiserror::Error;

/// Errors while submitting a batch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BatchError {
    /// Calls were queued but no wallet address exists to send them from.
    #[error("no validator wallet to send from")]
    NoWallet,

    /// The wallet or submitter failed.
    #[error("submission failed: {0}")]
    Ledger(#[from] LedgerError),
}
