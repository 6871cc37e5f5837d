//! Runtime configuration.
//!
//! A node config file has one section per component:
//!
//! ```toml
//! [staker]
//! strategy = "StakeLatest"
//! staker-interval = "1m"
//!
//! [runner]
//! backoff-ceiling = "1m"
//! ephemeral-window = "10m"
//!
//! [supervisor]
//! probe-interval = "1m"
//! ```
//!
//! Durations use humantime syntax. Missing keys take their default.

use arbiter_staker::{ConfigError, StakerConfig};
use serde::Deserialize;
use std::time::Duration;

/// Settings for the action and notifier loops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerConfig {
    /// Wait after the first failure is twice this.
    pub backoff_base: Duration,

    /// Longest wait after repeated failures.
    pub backoff_ceiling: Duration,

    /// Wait after a tick panicked.
    pub panic_backoff: Duration,

    /// How long an ephemeral error is tolerated before it is logged as a
    /// real failure.
    pub ephemeral_window: Duration,

    /// Longest wait after a tolerated ephemeral error.
    pub ephemeral_backoff_ceiling: Duration,

    /// Time between latest staked / confirmed reports. `None` uses the
    /// staker interval.
    pub notifier_interval: Option<Duration>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            backoff_base: Duration::from_secs(1),
            backoff_ceiling: Duration::from_secs(60),
            panic_backoff: Duration::from_secs(60),
            ephemeral_window: Duration::from_secs(10 * 60),
            ephemeral_backoff_ceiling: Duration::from_secs(10),
            notifier_interval: None,
        }
    }
}

impl RunnerConfig {
    pub fn with_notifier_interval(mut self, interval: Duration) -> Self {
        self.notifier_interval = Some(interval);
        self
    }

    pub fn with_backoff(mut self, base: Duration, ceiling: Duration) -> Self {
        self.backoff_base = base;
        self.backoff_ceiling = ceiling;
        self
    }
}

/// Settings for the protocol switch supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorConfig {
    /// Time between successor-protocol probes while the legacy agent runs.
    pub probe_interval: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            probe_interval: Duration::from_secs(60),
        }
    }
}

/// Everything a node needs to run one agent.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NodeConfig {
    pub staker: StakerConfig,
    pub runner: RunnerConfig,
    pub supervisor: SupervisorConfig,
}

impl NodeConfig {
    /// Parse a TOML document with `[staker]`, `[runner]` and `[supervisor]`
    /// sections.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let raw: RawNodeConfig = toml::from_str(raw)?;

        let runner_defaults = RunnerConfig::default();
        let runner = RunnerConfig {
            backoff_base: duration_or(raw.runner.backoff_base, runner_defaults.backoff_base)?,
            backoff_ceiling: duration_or(
                raw.runner.backoff_ceiling,
                runner_defaults.backoff_ceiling,
            )?,
            panic_backoff: duration_or(raw.runner.panic_backoff, runner_defaults.panic_backoff)?,
            ephemeral_window: duration_or(
                raw.runner.ephemeral_window,
                runner_defaults.ephemeral_window,
            )?,
            ephemeral_backoff_ceiling: duration_or(
                raw.runner.ephemeral_backoff_ceiling,
                runner_defaults.ephemeral_backoff_ceiling,
            )?,
            notifier_interval: raw
                .runner
                .notifier_interval
                .map(parse_duration)
                .transpose()?,
        };
        let supervisor = SupervisorConfig {
            probe_interval: duration_or(
                raw.supervisor.probe_interval,
                SupervisorConfig::default().probe_interval,
            )?,
        };

        Ok(Self {
            staker: StakerConfig::from_toml_table(raw.staker)?,
            runner,
            supervisor,
        })
    }
}

fn parse_duration(value: String) -> Result<Duration, ConfigError> {
    humantime::parse_duration(&value).map_err(|source| ConfigError::InvalidDuration { value, source })
}

fn duration_or(value: Option<String>, default: Duration) -> Result<Duration, ConfigError> {
    value.map_or(Ok(default), parse_duration)
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
struct RawRunnerConfig {
    backoff_base: Option<String>,
    backoff_ceiling: Option<String>,
    panic_backoff: Option<String>,
    ephemeral_window: Option<String>,
    ephemeral_backoff_ceiling: Option<String>,
    notifier_interval: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
struct RawSupervisorConfig {
    probe_interval: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawNodeConfig {
    staker: toml::Table,
    runner: RawRunnerConfig,
    supervisor: RawSupervisorConfig,
}
