//! Staking agent configuration.

use crate::error::ConfigError;
use arbiter_core::{TxSubmitter, ValidatorWallet};
use arbiter_txbatch::WalletMode;
use arbiter_types::{Address, Strategy};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

/// When to hold back transactions because gas is expensive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PostingStrategy {
    /// Gas price, in gwei, at or above which gas counts as high.
    pub high_gas_threshold: f64,

    /// Most parent-chain blocks a tick may be delayed while gas is high.
    pub high_gas_delay_blocks: u64,
}

impl Default for PostingStrategy {
    fn default() -> Self {
        Self {
            high_gas_threshold: 0.0,
            high_gas_delay_blocks: 0,
        }
    }
}

/// Configuration for the staking agent.
#[derive(Debug, Clone, PartialEq)]
pub struct StakerConfig {
    /// How aggressively to participate.
    pub strategy: Strategy,

    /// Time between ticks.
    pub staker_interval: Duration,

    /// Never create a node that competes with an existing wrong one.
    pub disable_challenge: bool,

    /// Parent-chain confirmations the dispute engine waits for.
    pub confirmation_blocks: u64,

    /// Try to fast-confirm nodes we agree with.
    pub enable_fast_confirmation: bool,

    /// Which wallet variant backs the validator.
    pub wallet_mode: WalletMode,

    pub posting_strategy: PostingStrategy,
}

impl Default for StakerConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::Watchtower,
            staker_interval: Duration::from_secs(60),
            disable_challenge: false,
            confirmation_blocks: 12,
            enable_fast_confirmation: false,
            wallet_mode: WalletMode::Eoa,
            posting_strategy: PostingStrategy::default(),
        }
    }
}

impl StakerConfig {
    /// Create a config running `strategy` with everything else default.
    pub fn with_strategy(strategy: Strategy) -> Self {
        Self {
            strategy,
            ..Default::default()
        }
    }

    pub fn fast_confirmation(mut self, enabled: bool) -> Self {
        self.enable_fast_confirmation = enabled;
        self
    }

    pub fn challenges_disabled(mut self, disabled: bool) -> Self {
        self.disable_challenge = disabled;
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.staker_interval = interval;
        self
    }

    pub fn posting(mut self, posting_strategy: PostingStrategy) -> Self {
        self.posting_strategy = posting_strategy;
        self
    }

    pub fn wallet(mut self, wallet_mode: WalletMode) -> Self {
        self.wallet_mode = wallet_mode;
        self
    }

    /// Build the configured wallet variant for `sender`.
    pub fn build_wallet(
        &self,
        sender: Address,
        contract: Option<Address>,
        submitter: Arc<dyn TxSubmitter>,
    ) -> Arc<dyn ValidatorWallet> {
        self.wallet_mode.build(sender, contract, submitter)
    }

    /// Parse a TOML document.
    ///
    /// Keys are kebab-case. Missing keys take their default; unknown keys
    /// are rejected.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let raw: RawStakerConfig = toml::from_str(raw)?;
        raw.try_into()
    }

    /// Parse an already-read TOML table, e.g. a `[staker]` section.
    pub fn from_toml_table(table: toml::Table) -> Result<Self, ConfigError> {
        let raw: RawStakerConfig = toml::Value::Table(table).try_into()?;
        raw.try_into()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
struct RawPostingStrategy {
    high_gas_threshold: Option<f64>,
    high_gas_delay_blocks: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
struct RawStakerConfig {
    strategy: Option<String>,
    staker_interval: Option<String>,
    disable_challenge: Option<bool>,
    confirmation_blocks: Option<u64>,
    enable_fast_confirmation: Option<bool>,
    wallet_mode: Option<String>,
    posting_strategy: RawPostingStrategy,
}

impl TryFrom<RawStakerConfig> for StakerConfig {
    type Error = ConfigError;

    fn try_from(raw: RawStakerConfig) -> Result<Self, Self::Error> {
        let defaults = StakerConfig::default();

        let strategy = match raw.strategy {
            Some(name) => name.parse()?,
            None => defaults.strategy,
        };
        let staker_interval = match raw.staker_interval {
            Some(value) => humantime::parse_duration(&value)
                .map_err(|source| ConfigError::InvalidDuration { value, source })?,
            None => defaults.staker_interval,
        };
        let wallet_mode = match raw.wallet_mode {
            Some(mode) => mode.parse().map_err(ConfigError::InvalidWalletMode)?,
            None => defaults.wallet_mode,
        };

        Ok(StakerConfig {
            strategy,
            staker_interval,
            disable_challenge: raw.disable_challenge.unwrap_or(defaults.disable_challenge),
            confirmation_blocks: raw
                .confirmation_blocks
                .unwrap_or(defaults.confirmation_blocks),
            enable_fast_confirmation: raw
                .enable_fast_confirmation
                .unwrap_or(defaults.enable_fast_confirmation),
            wallet_mode,
            posting_strategy: PostingStrategy {
                high_gas_threshold: raw
                    .posting_strategy
                    .high_gas_threshold
                    .unwrap_or(defaults.posting_strategy.high_gas_threshold),
                high_gas_delay_blocks: raw
                    .posting_strategy
                    .high_gas_delay_blocks
                    .unwrap_or(defaults.posting_strategy.high_gas_delay_blocks),
            },
        })
    }
}
