//! Switchover from the legacy staking protocol to its successor.
//!
//! The supervisor runs the legacy agent until the rollup is upgraded, then
//! starts the successor agent and stops the legacy one. The switch happens
//! once and is never undone.
//!
//! An upgrade is detected by calling a method only the successor rollup
//! has. A revert means the rollup is still on the legacy protocol.

use crate::config::{RunnerConfig, SupervisorConfig};
use crate::error::NodeError;
use crate::runner::{AgentRunner, Notifiers};
use arbiter_core::{LedgerClient, LedgerError, Metrics};
use arbiter_staker::StakingAgent;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Which protocol's agent is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolPhase {
    Legacy,
    Migrated,
}

impl fmt::Display for ProtocolPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolPhase::Legacy => write!(f, "legacy"),
            ProtocolPhase::Migrated => write!(f, "migrated"),
        }
    }
}

/// An agent the supervisor can start and stop.
#[async_trait]
pub trait ProtocolAgent: Send + Sync {
    /// One-time setup before [`start`](Self::start).
    async fn initialize(&mut self) -> Result<(), NodeError>;

    /// Start running in the background until `cancel` fires or
    /// [`stop_and_wait`](Self::stop_and_wait) is called.
    fn start(&mut self, cancel: &CancellationToken);

    /// Stop and wait until stopped. A no-op if never started.
    async fn stop_and_wait(&mut self);
}

/// Builds the successor agent once the upgrade is detected.
#[async_trait]
pub trait SuccessorFactory: Send + Sync {
    async fn build(&self) -> Result<Box<dyn ProtocolAgent>, NodeError>;
}

/// The legacy [`StakingAgent`] behind an [`AgentRunner`].
pub struct LegacyStaker {
    agent: Option<StakingAgent>,
    runner: Option<AgentRunner>,
    config: RunnerConfig,
    metrics: Arc<dyn Metrics>,
    notifiers: Notifiers,
}

impl LegacyStaker {
    pub fn new(
        agent: StakingAgent,
        config: RunnerConfig,
        metrics: Arc<dyn Metrics>,
        notifiers: Notifiers,
    ) -> Self {
        Self {
            agent: Some(agent),
            runner: None,
            config,
            metrics,
            notifiers,
        }
    }

    pub fn is_running(&self) -> bool {
        self.runner.is_some()
    }
}

#[async_trait]
impl ProtocolAgent for LegacyStaker {
    async fn initialize(&mut self) -> Result<(), NodeError> {
        if let Some(agent) = self.agent.as_mut() {
            agent.initialize().await?;
        }
        Ok(())
    }

    fn start(&mut self, cancel: &CancellationToken) {
        if let Some(agent) = self.agent.take() {
            self.runner = Some(AgentRunner::start(
                agent,
                self.config.clone(),
                self.metrics.clone(),
                self.notifiers.clone(),
                cancel,
            ));
        }
    }

    async fn stop_and_wait(&mut self) {
        if let Some(runner) = self.runner.take() {
            self.agent = runner.stop_and_wait().await;
        }
    }
}

/// Runs whichever protocol's agent matches the rollup.
pub struct ProtocolSwitchSupervisor {
    ledger: Arc<dyn LedgerClient>,
    factory: Arc<dyn SuccessorFactory>,
    config: SupervisorConfig,
    legacy: Option<Box<dyn ProtocolAgent>>,
    successor: Option<Box<dyn ProtocolAgent>>,
    phase: watch::Sender<ProtocolPhase>,
    cancel: CancellationToken,
}

impl ProtocolSwitchSupervisor {
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        legacy: Box<dyn ProtocolAgent>,
        factory: Arc<dyn SuccessorFactory>,
        config: SupervisorConfig,
    ) -> Self {
        let (phase, _) = watch::channel(ProtocolPhase::Legacy);
        Self {
            ledger,
            factory,
            config,
            legacy: Some(legacy),
            successor: None,
            phase,
            cancel: CancellationToken::new(),
        }
    }

    pub fn phase(&self) -> ProtocolPhase {
        *self.phase.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ProtocolPhase> {
        self.phase.subscribe()
    }

    /// Whether the rollup has been upgraded.
    async fn probe(&self) -> Result<bool, NodeError> {
        match self.ledger.challenge_grace_period_blocks().await {
            Ok(_) => Ok(true),
            Err(LedgerError::Reverted(_)) => Ok(false),
            Err(e) => Err(NodeError::Probe(e)),
        }
    }

    /// Probe once and switch to the successor if the rollup was upgraded.
    ///
    /// Returns whether the successor is running.
    pub async fn check_for_switch(&mut self) -> Result<bool, NodeError> {
        if self.phase() == ProtocolPhase::Migrated {
            return Ok(true);
        }
        if !self.probe().await? {
            return Ok(false);
        }

        info!("Detected successor protocol; switching agents");
        let mut successor = self.factory.build().await?;
        successor.initialize().await?;
        successor.start(&self.cancel);
        if let Some(mut legacy) = self.legacy.take() {
            legacy.stop_and_wait().await;
            info!("Stopped legacy agent");
        }
        self.successor = Some(successor);
        self.phase.send_replace(ProtocolPhase::Migrated);
        Ok(true)
    }

    /// Start the agent matching the rollup's current protocol.
    pub async fn start(&mut self) -> Result<(), NodeError> {
        if self.check_for_switch().await? {
            return Ok(());
        }
        if let Some(legacy) = self.legacy.as_mut() {
            legacy.initialize().await?;
            legacy.start(&self.cancel);
            info!("Started legacy agent");
        }
        Ok(())
    }

    /// Stop whichever agent is running.
    pub async fn stop_and_wait(&mut self) {
        self.cancel.cancel();
        if let Some(legacy) = self.legacy.as_mut() {
            legacy.stop_and_wait().await;
        }
        if let Some(successor) = self.successor.as_mut() {
            successor.stop_and_wait().await;
        }
    }

    /// Start, then probe every `probe_interval` until switched, then keep
    /// running until `shutdown` fires.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<(), NodeError> {
        if let Err(e) = self.start().await {
            self.stop_and_wait().await;
            return Err(e);
        }

        while self.phase() == ProtocolPhase::Legacy {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.config.probe_interval) => {}
            }
            if let Err(e) = self.check_for_switch().await {
                error!(error = %e, "Error checking for protocol switch");
            }
        }

        shutdown.cancelled().await;
        self.stop_and_wait().await;
        Ok(())
    }

    /// Run on a spawned task.
    pub fn spawn(self) -> SupervisorHandle {
        let shutdown = CancellationToken::new();
        let phase = self.subscribe();
        let task = tokio::spawn(self.run(shutdown.clone()));
        SupervisorHandle {
            phase,
            shutdown,
            task,
        }
    }
}

/// Handle to a spawned supervisor.
pub struct SupervisorHandle {
    phase: watch::Receiver<ProtocolPhase>,
    shutdown: CancellationToken,
    task: JoinHandle<Result<(), NodeError>>,
}

impl SupervisorHandle {
    pub fn phase(&self) -> ProtocolPhase {
        *self.phase.borrow()
    }

    /// Wait until the successor is running.
    ///
    /// Returns `false` if the supervisor exited first.
    pub async fn wait_migrated(&mut self) -> bool {
        self.phase
            .wait_for(|phase| *phase == ProtocolPhase::Migrated)
            .await
            .is_ok()
    }

    /// Stop the running agent and wait for the supervisor to exit.
    pub async fn shutdown(self) -> Result<(), NodeError> {
        self.shutdown.cancel();
        self.task.await?
    }
}
