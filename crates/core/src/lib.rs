//! Core interfaces for the rollup staking agent.
//!
//! This crate defines the boundary between the agent's decision logic and
//! the outside world:
//!
//! - [`Call`]: the closed set of ledger and quorum writes, with calldata
//! - [`LedgerClient`], [`QuorumContract`], [`ValidatorWallet`], ...: the
//!   capability traits the agent consumes
//! - [`Metrics`]: an injectable metrics sink
//!
//! No decision logic lives here.

pub mod abi;
mod call;
mod error;
pub mod metrics;
mod traits;

pub use call::{
    Call, ChallengeParams, Operation, OutgoingTx, PendingCall, SafeTransaction, TxPayload,
};
pub use error::{ActionError, LedgerError};
pub use metrics::{Metrics, NoopMetrics};
pub use traits::{
    ChallengeHandler, GeneratedAction, LatestConfirmedNotifier, LatestStakedNotifier,
    LedgerClient, NodeAction, NodeActionSource, QuorumConnector, QuorumContract, TxSubmitter,
    ValidatorWallet,
};
