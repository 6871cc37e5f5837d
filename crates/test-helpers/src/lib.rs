//! Test helpers for the staking agent.
//!
//! Provides an in-memory ledger ([`MockChain`]) that applies submitted calls
//! with the same preconditions the rollup contract enforces, in-memory quorum
//! contracts ([`MockQuorum`]) that validate approved-hash signature blobs,
//! and recording fakes for the remaining collaborators.

mod chain;
mod fakes;
mod quorum;

pub use chain::{MockChain, MOCK_WASM_MODULE_ROOT};
pub use fakes::{ChainFollower, RecordingChallengeHandler, RecordingMetrics, RecordingNotifier};
pub use quorum::{quorum_digest, MockQuorum};

pub use arbiter_types::test_utils::{test_assertion, test_execution_state};
