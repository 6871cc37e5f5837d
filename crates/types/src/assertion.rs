//! Assertions and the execution states they connect.

use crate::hash::Hash;
use serde::{Deserialize, Serialize};

/// Position of the rollup's execution after processing some input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct GlobalState {
    /// Hash of the last rollup block produced.
    pub block_hash: Hash,
    /// Root of the outbox send tree.
    pub send_root: Hash,
    /// Inbox batch being processed.
    pub batch: u64,
    /// Position within that batch.
    pub pos_in_batch: u64,
}

impl GlobalState {
    fn append_to(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(self.block_hash.as_bytes());
        buf.extend_from_slice(self.send_root.as_bytes());
        buf.extend_from_slice(&self.batch.to_be_bytes());
        buf.extend_from_slice(&self.pos_in_batch.to_be_bytes());
    }
}

/// Status of the machine at the end of an execution range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MachineStatus {
    /// Still executing.
    #[default]
    Running,
    /// Finished cleanly.
    Finished,
    /// Hit an error.
    Errored,
}

impl MachineStatus {
    /// Wire code used by the ledger contract.
    pub fn code(self) -> u8 {
        match self {
            MachineStatus::Running => 0,
            MachineStatus::Finished => 1,
            MachineStatus::Errored => 2,
        }
    }
}

/// Opaque execution-state fingerprint supplied by the execution layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ExecutionState {
    pub global_state: GlobalState,
    pub machine_status: MachineStatus,
}

impl ExecutionState {
    fn append_to(&self, buf: &mut Vec<u8>) {
        self.global_state.append_to(buf);
        buf.push(self.machine_status.code());
    }
}

/// A claimed execution-state transition over a range of blocks.
///
/// Immutable once built. Two assertions are "the same claim" iff their
/// [`Assertion::execution_hash`] values match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Assertion {
    pub before_state: ExecutionState,
    pub after_state: ExecutionState,
    pub num_blocks: u64,
}

impl Assertion {
    /// Deterministic fingerprint of this assertion.
    pub fn execution_hash(&self) -> Hash {
        let mut buf = Vec::with_capacity(2 * 81 + 8);
        self.before_state.append_to(&mut buf);
        self.after_state.append_to(&mut buf);
        buf.extend_from_slice(&self.num_blocks.to_be_bytes());
        Hash::from_bytes(&buf)
    }
}
