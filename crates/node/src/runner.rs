//! Agent runtime: the action loop and the notifier loop.
//!
//! The action loop owns the [`StakingAgent`] and calls [`StakingAgent::act`]
//! once per tick, waiting between ticks according to the outcome:
//!
//! | Outcome | Next wait |
//! |---|---|
//! | Success, tx sent, wallet cannot batch | immediately |
//! | Success | `staker_interval` |
//! | Tolerated ephemeral error | backoff, at most `ephemeral_backoff_ceiling` |
//! | Other error | backoff, doubling up to `backoff_ceiling` |
//! | Panic | `panic_backoff` |
//!
//! The notifier loop reports the latest staked and confirmed nodes to the
//! metrics sink and to registered observers.
//!
//! Both loops stop at a [`CancellationToken`]. Cancellation is only observed
//! between ticks; a tick in flight always runs to completion.

use crate::config::RunnerConfig;
use crate::ephemeral::EphemeralHandlers;
use arbiter_core::metrics::{
    STAKER_ACTION_FAILURE, STAKER_ACTION_LAST_SUCCESS, STAKER_ACTION_SUCCESS,
    STAKER_CONFIRMED_NODE, STAKER_STAKED_NODE,
};
use arbiter_core::{LatestConfirmedNotifier, LatestStakedNotifier, LedgerClient, Metrics};
use arbiter_staker::{StakerError, StakingAgent};
use arbiter_types::{Address, TxHash};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Observers of the latest staked and confirmed nodes.
#[derive(Clone, Default)]
pub struct Notifiers {
    pub staked: Vec<Arc<dyn LatestStakedNotifier>>,
    pub confirmed: Vec<Arc<dyn LatestConfirmedNotifier>>,
}

impl Notifiers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_staked(mut self, notifier: Arc<dyn LatestStakedNotifier>) -> Self {
        self.staked.push(notifier);
        self
    }

    pub fn on_confirmed(mut self, notifier: Arc<dyn LatestConfirmedNotifier>) -> Self {
        self.confirmed.push(notifier);
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Action loop
// ═══════════════════════════════════════════════════════════════════════════

/// How a tick ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// `act` succeeded; carries the submitted transaction, if any.
    Acted(Option<TxHash>),
    /// `act` failed with an error inside its ephemeral window.
    Tolerated,
    Failed,
    Panicked,
}

/// Drives one agent tick by tick.
pub struct ActionLoop {
    agent: StakingAgent,
    config: RunnerConfig,
    metrics: Arc<dyn Metrics>,
    backoff: Duration,
    ephemeral: EphemeralHandlers,
}

impl ActionLoop {
    pub fn new(agent: StakingAgent, config: RunnerConfig, metrics: Arc<dyn Metrics>) -> Self {
        Self {
            backoff: config.backoff_base,
            ephemeral: EphemeralHandlers::new(config.ephemeral_window),
            agent,
            config,
            metrics,
        }
    }

    pub fn agent(&self) -> &StakingAgent {
        &self.agent
    }

    pub fn into_agent(self) -> StakingAgent {
        self.agent
    }

    /// Current failure backoff.
    pub fn backoff(&self) -> Duration {
        self.backoff
    }

    /// Run one tick and return how it ended and how long to wait before the
    /// next one.
    pub async fn tick(&mut self) -> (TickOutcome, Duration) {
        let ledger = self.agent.ledger().clone();
        let agent = &mut self.agent;
        let result = AssertUnwindSafe(async move {
            let tx = agent.act().await?;
            if let Some(tx) = tx {
                ledger
                    .wait_for_tx_approval(tx)
                    .await
                    .map_err(|e| StakerError::from(e).context("waiting for tx receipt"))?;
                info!(%tx, "Successfully executed staker transaction");
            }
            Ok::<_, StakerError>(tx)
        })
        .catch_unwind()
        .await;

        match result {
            Ok(Ok(tx)) => (TickOutcome::Acted(tx), self.on_success(tx)),
            Ok(Err(err)) => self.on_failure(&err),
            Err(panic) => {
                error!(panic = %panic_message(&*panic), "Staker act call panicked");
                self.agent.clear_transactions();
                (TickOutcome::Panicked, self.config.panic_backoff)
            }
        }
    }

    fn on_success(&mut self, tx: Option<TxHash>) -> Duration {
        self.ephemeral.reset_all();
        self.backoff = self.config.backoff_base;
        self.metrics
            .update(STAKER_ACTION_LAST_SUCCESS, unix_now_secs());
        self.metrics.increment(STAKER_ACTION_SUCCESS);
        if tx.is_some() && !self.agent.batcher().can_batch_txs() {
            // Try to create another tx.
            return Duration::ZERO;
        }
        self.agent.config().staker_interval
    }

    fn on_failure(&mut self, err: &StakerError) -> (TickOutcome, Duration) {
        self.metrics.increment(STAKER_ACTION_FAILURE);
        self.backoff = self.backoff.saturating_mul(2);
        let capped = self.backoff > self.config.backoff_ceiling;
        if capped {
            self.backoff = self.config.backoff_ceiling;
        }

        if let Some(class) = self.ephemeral.tolerates(err, Instant::now()) {
            warn!(error = %err, class = class.name(), "Error acting as staker");
            return (
                TickOutcome::Tolerated,
                self.backoff.min(self.config.ephemeral_backoff_ceiling),
            );
        }
        if capped {
            error!(error = %err, "Error acting as staker");
        } else {
            warn!(error = %err, "Error acting as staker");
        }
        (TickOutcome::Failed, self.backoff)
    }

    /// Tick until `cancel` fires.
    pub async fn run(mut self, cancel: CancellationToken) -> StakingAgent {
        while !cancel.is_cancelled() {
            let (_, wait) = self.tick().await;
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }
        }
        self.agent
    }
}

fn unix_now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0.0, |d| d.as_secs() as f64)
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Notifier loop
// ═══════════════════════════════════════════════════════════════════════════

/// Reports the latest staked and confirmed nodes.
pub struct NotifierLoop {
    ledger: Arc<dyn LedgerClient>,
    wallet: Address,
    metrics: Arc<dyn Metrics>,
    notifiers: Notifiers,
}

impl NotifierLoop {
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        wallet: Address,
        metrics: Arc<dyn Metrics>,
        notifiers: Notifiers,
    ) -> Self {
        Self {
            ledger,
            wallet,
            metrics,
            notifiers,
        }
    }

    /// Read and report once. Errors are logged only.
    pub async fn report(&self) {
        let staked = match self.ledger.latest_staked(self.wallet).await {
            Ok(staked) => staked,
            Err(e) => {
                error!(error = %e, wallet = %self.wallet, "Error checking latest staked");
                return;
            }
        };
        self.metrics.update(STAKER_STAKED_NODE, staked.0 .0 as f64);
        for notifier in &self.notifiers.staked {
            notifier.update_latest_staked(staked.0, staked.1);
        }

        // The zero address is never staked, so its latest staked node is
        // the latest confirmed one.
        let confirmed = if self.wallet.is_zero() {
            staked
        } else {
            match self.ledger.latest_staked(Address::ZERO).await {
                Ok(confirmed) => confirmed,
                Err(e) => {
                    error!(error = %e, "Error checking latest confirmed");
                    return;
                }
            }
        };
        self.metrics
            .update(STAKER_CONFIRMED_NODE, confirmed.0 .0 as f64);
        for notifier in &self.notifiers.confirmed {
            notifier.update_latest_confirmed(confirmed.0, confirmed.1);
        }
    }

    /// Report every `interval` until `cancel` fires.
    pub async fn run(self, interval: Duration, cancel: CancellationToken) {
        while !cancel.is_cancelled() {
            self.report().await;
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Runner
// ═══════════════════════════════════════════════════════════════════════════

/// A running agent: both loops spawned on the current runtime.
pub struct AgentRunner {
    cancel: CancellationToken,
    action: JoinHandle<StakingAgent>,
    notifier: JoinHandle<()>,
}

impl AgentRunner {
    /// Spawn both loops.
    ///
    /// The loops stop when `parent` is cancelled or on
    /// [`stop_and_wait`](Self::stop_and_wait).
    pub fn start(
        agent: StakingAgent,
        config: RunnerConfig,
        metrics: Arc<dyn Metrics>,
        notifiers: Notifiers,
        parent: &CancellationToken,
    ) -> Self {
        let cancel = parent.child_token();
        let interval = config
            .notifier_interval
            .unwrap_or(agent.config().staker_interval);
        let notifier_loop = NotifierLoop::new(
            agent.ledger().clone(),
            agent.batcher().wallet_address_or_zero(),
            metrics.clone(),
            notifiers,
        );

        info!(strategy = %agent.strategy(), "Starting staker");
        let action = tokio::spawn(ActionLoop::new(agent, config, metrics).run(cancel.clone()));
        let notifier = tokio::spawn(notifier_loop.run(interval, cancel.clone()));
        Self {
            cancel,
            action,
            notifier,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.action.is_finished() && self.notifier.is_finished()
    }

    /// Stop both loops and wait for them, returning the agent.
    ///
    /// Returns `None` if the action loop task died.
    pub async fn stop_and_wait(self) -> Option<StakingAgent> {
        self.cancel.cancel();
        if let Err(e) = self.notifier.await {
            error!(error = %e, "Notifier loop task failed");
        }
        match self.action.await {
            Ok(agent) => Some(agent),
            Err(e) => {
                error!(error = %e, "Action loop task failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(&*payload), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(&*payload), "bang");
        let payload: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(&*payload), "unknown panic payload");
    }
}
