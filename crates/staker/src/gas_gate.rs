//! Gas-price gate for ticks.
//!
//! Keeps a budget of parent-chain blocks, like a token bucket measured in
//! blocks instead of time. While gas is cheap the budget refills by the
//! number of blocks since the last check; while gas is high it drains by
//! the same amount. A tick is held back only while gas is high and budget
//! remains, so the agent delays by at most `high_gas_delay_blocks` before
//! acting anyway.

use crate::config::PostingStrategy;
use arbiter_types::BlockNumber;
use tracing::warn;

/// Adaptive high-gas delay.
#[derive(Debug)]
pub struct HighGasGate {
    /// Blocks of delay budget left, in `[0, high_gas_delay_blocks]`.
    buffer: i64,
    /// Block seen at the previous check.
    last_block: Option<BlockNumber>,
}

impl HighGasGate {
    /// A gate with its full delay budget, so an agent started while gas is
    /// high still waits up to `high_gas_delay_blocks`.
    pub fn new(posting: &PostingStrategy) -> Self {
        Self {
            buffer: i64::try_from(posting.high_gas_delay_blocks).unwrap_or(i64::MAX),
            last_block: None,
        }
    }

    /// Decide whether this tick may act.
    ///
    /// # Arguments
    ///
    /// * `gas_price_gwei` - Current gas price, or `None` if it could not be read
    /// * `block` - Latest parent-chain block, or `None` if it could not be read
    /// * `posting` - Threshold and delay budget
    ///
    /// An unreadable gas price counts as not high. An unreadable block lets
    /// the tick act without touching the budget.
    pub fn should_act(
        &mut self,
        gas_price_gwei: Option<f64>,
        block: Option<BlockNumber>,
        posting: &PostingStrategy,
    ) -> bool {
        let gas_high = gas_price_gwei.is_some_and(|gas| gas >= posting.high_gas_threshold);

        let Some(block) = block else {
            return true;
        };
        let last = self.last_block.replace(block).unwrap_or(block);
        let elapsed = block.0 as i64 - last.0 as i64;

        if gas_high {
            self.buffer -= elapsed;
        } else {
            self.buffer += elapsed;
        }
        let ceiling = i64::try_from(posting.high_gas_delay_blocks).unwrap_or(i64::MAX);
        self.buffer = self.buffer.clamp(0, ceiling);

        if gas_high && self.buffer > 0 {
            warn!(
                gas_price = gas_price_gwei.unwrap_or_default(),
                threshold = posting.high_gas_threshold,
                buffer = self.buffer,
                "Not acting yet as gas price is high"
            );
            return false;
        }
        true
    }

    /// Blocks of delay budget left.
    pub fn buffer(&self) -> i64 {
        self.buffer
    }
}
