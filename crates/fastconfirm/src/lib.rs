//! Fast confirmation through a threshold-approval quorum.
//!
//! - [`FastConfirmQuorum`]: loads a quorum contract and drives an action
//!   through approve → execute
//! - [`ApprovalTracker`]: per-digest approval bookkeeping and the
//!   approved-hash signature blob

mod error;
mod quorum;
mod tracker;

pub use error::QuorumError;
pub use quorum::{FastConfirmQuorum, QuorumOutcome};
pub use tracker::{
    approved_hash_signature, ApprovalTracker, APPROVED_HASH_SIGNATURE_TAG, SIGNATURE_ENTRY_LEN,
};
