//! Staking decision engine.
//!
//! Each tick the [`StakingAgent`] reads the rollup's state, decides what its
//! configured [`Strategy`](arbiter_types::Strategy) wants to do about it, and
//! submits the resulting calls as one batch:
//!
//! - [`StakeLifecycleManager`]: placing, advancing, removing and withdrawing
//!   stake, resolving nodes and timed-out disputes
//! - [`ConflictResolver`]: opening disputes against conflicting stakers
//! - [`HighGasGate`]: holding ticks back while gas is expensive
//! - [`InactiveMemo`]: nodes an inactive agent has already validated
//!
//! Fast confirmation goes through `arbiter-fastconfirm`; calls are queued on
//! an `arbiter-txbatch` batcher owned by the agent.

mod agent;
mod config;
mod conflict;
mod error;
mod gas_gate;
mod info;
mod lifecycle;
mod memo;

pub use agent::{FastConfirmer, StakerDeps, StakingAgent};
pub use config::{PostingStrategy, StakerConfig};
pub use conflict::{ConflictResolver, OpenedDispute, CONFLICT_DEPTH_LIMIT, STAKER_PAGE_SIZE};
pub use error::{ConfigError, EphemeralClass, StakerError};
pub use gas_gate::HighGasGate;
pub use info::OurStakerInfo;
pub use lifecycle::{
    ConfirmTarget, StakeLifecycleManager, MAX_STAKE_ADVANCES_PER_TICK,
    TIMED_OUT_CHALLENGES_PER_TICK,
};
pub use memo::InactiveMemo;
