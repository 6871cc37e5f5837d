//! Transaction batching for the staking agent.
//!
//! - [`TxBatcher`]: per-tick call queue with scoped [`Auth`] handles
//! - [`EoaWallet`] / [`ContractWallet`]: the two [`arbiter_core::ValidatorWallet`]
//!   variants

mod batcher;
mod error;
mod wallet;

pub use batcher::{Auth, TxBatcher};
pub use error::BatchError;
pub use wallet::{ContractWallet, EoaWallet, WalletMode};
