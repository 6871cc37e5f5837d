//! Core types for the rollup staking agent.
//!
//! Everything here is a plain value: addresses, hashes, identifiers and
//! read-only mirrors of the records the ledger contract keeps about nodes,
//! stakers and conflicts. No I/O happens in this crate.

mod address;
mod approval_bitfield;
mod assertion;
mod hash;
mod identifiers;
mod records;
mod strategy;

pub use address::Address;
pub use approval_bitfield::ApprovalBitfield;
pub use assertion::{Assertion, ExecutionState, GlobalState, MachineStatus};
pub use hash::{Hash, HexError};
pub use identifiers::{BlockNumber, ChallengeId, NodeNum, Wei};
pub use records::{ConfirmType, ConflictKind, ConflictRecord, NodeRecord, StakerRecord};
pub use strategy::{Strategy, UnknownStrategy};

/// Hash of a submitted ledger transaction.
pub type TxHash = Hash;

#[cfg(feature = "test-utils")]
pub mod test_utils {
    //! Fixture builders shared by tests across the workspace.

    use super::*;

    /// Build an execution state whose block hash is derived from `seed`.
    pub fn test_execution_state(seed: &[u8], batch: u64) -> ExecutionState {
        ExecutionState {
            global_state: GlobalState {
                block_hash: Hash::from_bytes(seed),
                send_root: Hash::from_parts(&[seed, b"send"]),
                batch,
                pos_in_batch: 0,
            },
            machine_status: MachineStatus::Finished,
        }
    }

    /// Build an assertion moving from batch `from` to batch `to`.
    pub fn test_assertion(seed: &[u8], from: u64, to: u64) -> Assertion {
        Assertion {
            before_state: test_execution_state(&[seed, b"before"].concat(), from),
            after_state: test_execution_state(&[seed, b"after"].concat(), to),
            num_blocks: to.saturating_sub(from),
        }
    }
}
