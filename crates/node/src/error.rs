//! Node runtime errors.

use arbiter_core::LedgerError;
use arbiter_staker::{ConfigError, StakerError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Staker(#[from] StakerError),

    #[error("probing for successor protocol: {0}")]
    Probe(LedgerError),

    #[error("building successor agent: {0}")]
    Successor(String),

    #[error("supervisor task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
