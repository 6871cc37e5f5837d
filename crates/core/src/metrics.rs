//! Injectable metrics sink.

/// Amount of native currency held by the transaction sender, in ether.
pub const STAKER_BALANCE: &str = "staker_balance";
/// Amount staked by our wallet, in ether.
pub const STAKER_AMOUNT_STAKED: &str = "staker_amount_staked";
/// Latest node our wallet is staked on.
pub const STAKER_STAKED_NODE: &str = "staker_staked_node";
/// Latest confirmed node.
pub const STAKER_CONFIRMED_NODE: &str = "staker_confirmed_node";
/// Unix time of the last successful tick.
pub const STAKER_ACTION_LAST_SUCCESS: &str = "staker_action_last_success";
/// Successful tick counter.
pub const STAKER_ACTION_SUCCESS: &str = "staker_action_success";
/// Failed tick counter.
pub const STAKER_ACTION_FAILURE: &str = "staker_action_failure";

/// Receives gauge updates and counter increments.
///
/// Implementations must be cheap to call; the agent reports from inside its
/// decision loop.
pub trait Metrics: Send + Sync {
    /// Set gauge `name` to `value`.
    fn update(&self, name: &'static str, value: f64);

    /// Increment counter `name` by one.
    fn increment(&self, name: &'static str);
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl Metrics for NoopMetrics {
    fn update(&self, _name: &'static str, _value: f64) {}

    fn increment(&self, _name: &'static str) {}
}

/// Convert wei to ether for gauge reporting.
pub fn wei_to_ether(wei: u128) -> f64 {
    wei as f64 / 1e18
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wei_to_ether() {
        assert_eq!(wei_to_ether(0), 0.0);
        assert_eq!(wei_to_ether(1_000_000_000_000_000_000), 1.0);
        assert_eq!(wei_to_ether(500_000_000_000_000_000), 0.5);
    }
}
