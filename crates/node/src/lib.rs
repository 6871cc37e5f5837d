//! Staking agent runtime.
//!
//! This crate runs a [`StakingAgent`](arbiter_staker::StakingAgent) on tokio:
//!
//! - [`AgentRunner`]: the action loop (backoff, ephemeral error tolerance,
//!   panic recovery) and the notifier loop, stopped cooperatively
//! - [`ProtocolSwitchSupervisor`]: hands over from the legacy agent to the
//!   successor protocol's agent once the rollup is upgraded
//! - [`PrometheusMetrics`]: a [`Metrics`](arbiter_core::Metrics) sink backed
//!   by a Prometheus registry

mod config;
mod ephemeral;
mod error;
mod logging;
mod metrics;
mod runner;
mod supervisor;

pub use config::{NodeConfig, RunnerConfig, SupervisorConfig};
pub use ephemeral::{EphemeralErrorHandler, EphemeralHandlers};
pub use error::NodeError;
pub use logging::init_logging;
pub use metrics::PrometheusMetrics;
pub use runner::{ActionLoop, AgentRunner, NotifierLoop, Notifiers, TickOutcome};
pub use supervisor::{
    LegacyStaker, ProtocolAgent, ProtocolPhase, ProtocolSwitchSupervisor, SuccessorFactory,
    SupervisorHandle,
};
