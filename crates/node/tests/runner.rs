//! Action loop and notifier loop behaviour against the in-memory ledger.

use arbiter_core::metrics::{
    STAKER_ACTION_FAILURE, STAKER_ACTION_LAST_SUCCESS, STAKER_ACTION_SUCCESS,
    STAKER_CONFIRMED_NODE, STAKER_STAKED_NODE,
};
use arbiter_core::{
    ActionError, GeneratedAction, NodeActionSource, ValidatorWallet,
};
use arbiter_node::{ActionLoop, AgentRunner, Notifiers, RunnerConfig, TickOutcome};
use arbiter_staker::{StakerConfig, StakerDeps, StakingAgent};
use arbiter_test_helpers::{
    test_assertion, ChainFollower, MockChain, RecordingChallengeHandler, RecordingMetrics,
    RecordingNotifier,
};
use arbiter_txbatch::{ContractWallet, EoaWallet};
use arbiter_types::{Address, Hash, NodeNum, Strategy};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_test::traced_test;

const ROLLUP: Address = Address::from_low_u8(0xEE);
const ME: Address = Address::from_low_u8(1);
const SENDER: Address = Address::from_low_u8(2);

fn secs(n: u64) -> Duration {
    Duration::from_secs(n)
}

fn agent_with(
    chain: &MockChain,
    config: StakerConfig,
    wallet: Arc<dyn ValidatorWallet>,
    actions: Arc<dyn NodeActionSource>,
    metrics: Arc<RecordingMetrics>,
) -> StakingAgent {
    StakingAgent::new(
        config,
        StakerDeps {
            ledger: Arc::new(chain.clone()),
            quorums: Arc::new(chain.clone()),
            wallet,
            actions,
            challenges: Arc::new(RecordingChallengeHandler::default()),
            metrics,
        },
    )
}

/// EOA agent following `chain`, with node 1 marked correct.
fn eoa_agent(
    chain: &MockChain,
    strategy: Strategy,
    metrics: Arc<RecordingMetrics>,
) -> StakingAgent {
    let follower = Arc::new(ChainFollower::new(chain.clone()));
    let n1 = chain.add_node(NodeNum::GENESIS, test_assertion(b"n1", 0, 1));
    follower.mark_correct(chain.node_hash(n1));
    let wallet = Arc::new(EoaWallet::new(ME, Arc::new(chain.clone())));
    agent_with(chain, StakerConfig::with_strategy(strategy), wallet, follower, metrics)
}

struct PanickingSource;

#[async_trait]
impl NodeActionSource for PanickingSource {
    async fn generate_node_action(
        &self,
        _from: NodeNum,
        _from_hash: Hash,
        _strategy: Strategy,
    ) -> Result<GeneratedAction, ActionError> {
        panic!("local validation state corrupted")
    }
}

#[tokio::test]
async fn test_idle_tick_waits_staker_interval() {
    let chain = MockChain::new(ROLLUP);
    let metrics = Arc::new(RecordingMetrics::default());
    let agent = eoa_agent(&chain, Strategy::Watchtower, metrics.clone());
    let mut action = ActionLoop::new(agent, RunnerConfig::default(), metrics.clone());

    let (outcome, wait) = action.tick().await;

    assert_eq!(outcome, TickOutcome::Acted(None));
    assert_eq!(wait, secs(60));
    assert_eq!(metrics.counter(STAKER_ACTION_SUCCESS), 1);
    assert!(metrics.gauge(STAKER_ACTION_LAST_SUCCESS).unwrap() > 0.0);
}

#[tokio::test]
async fn test_eoa_retries_immediately_after_sending() {
    let chain = MockChain::new(ROLLUP);
    let metrics = Arc::new(RecordingMetrics::default());
    let agent = eoa_agent(&chain, Strategy::StakeLatest, metrics.clone());
    let mut action = ActionLoop::new(agent, RunnerConfig::default(), metrics);

    let (outcome, wait) = action.tick().await;

    assert!(matches!(outcome, TickOutcome::Acted(Some(_))));
    assert_eq!(wait, Duration::ZERO);
    assert!(chain.staker(ME).is_some());
}

#[tokio::test]
async fn test_contract_wallet_waits_after_sending() {
    let chain = MockChain::new(ROLLUP);
    let metrics = Arc::new(RecordingMetrics::default());
    let follower = Arc::new(ChainFollower::new(chain.clone()));
    let n1 = chain.add_node(NodeNum::GENESIS, test_assertion(b"n1", 0, 1));
    follower.mark_correct(chain.node_hash(n1));
    let wallet = Arc::new(ContractWallet::new(
        Some(ME),
        SENDER,
        Arc::new(chain.clone()),
    ));
    let agent = agent_with(
        &chain,
        StakerConfig::with_strategy(Strategy::StakeLatest).interval(secs(30)),
        wallet,
        follower,
        metrics.clone(),
    );
    let mut action = ActionLoop::new(agent, RunnerConfig::default(), metrics);

    let (outcome, wait) = action.tick().await;

    assert!(matches!(outcome, TickOutcome::Acted(Some(_))));
    assert_eq!(wait, secs(30));
}

#[traced_test]
#[tokio::test]
async fn test_failure_backoff_doubles_and_caps() {
    let chain = MockChain::new(ROLLUP);
    let metrics = Arc::new(RecordingMetrics::default());
    let agent = eoa_agent(&chain, Strategy::StakeLatest, metrics.clone());
    let mut action = ActionLoop::new(agent, RunnerConfig::default(), metrics.clone());
    chain.set_offline(true);

    let mut waits = Vec::new();
    for _ in 0..7 {
        let (outcome, wait) = action.tick().await;
        assert_eq!(outcome, TickOutcome::Failed);
        waits.push(wait.as_secs());
    }
    assert_eq!(waits, vec![2, 4, 8, 16, 32, 60, 60]);
    assert_eq!(metrics.counter(STAKER_ACTION_FAILURE), 7);
    assert!(logs_contain("Error acting as staker"));

    chain.set_offline(false);
    let (outcome, _) = action.tick().await;
    assert!(matches!(outcome, TickOutcome::Acted(_)));
    assert_eq!(action.backoff(), secs(1));

    chain.set_offline(true);
    assert_eq!(action.tick().await.1, secs(2));
}

#[tokio::test(start_paused = true)]
async fn test_ephemeral_error_tolerated_within_window() {
    let chain = MockChain::new(ROLLUP);
    let metrics = Arc::new(RecordingMetrics::default());
    let agent = eoa_agent(&chain, Strategy::StakeLatest, metrics.clone());
    let mut action = ActionLoop::new(agent, RunnerConfig::default(), metrics);
    chain.set_pending_nonce_offset(ME, 1);

    let mut waits = Vec::new();
    for _ in 0..6 {
        let (outcome, wait) = action.tick().await;
        assert_eq!(outcome, TickOutcome::Tolerated);
        waits.push(wait.as_secs());
    }
    assert_eq!(waits, vec![2, 4, 8, 10, 10, 10]);

    tokio::time::advance(secs(11 * 60)).await;
    let (outcome, wait) = action.tick().await;
    assert_eq!(outcome, TickOutcome::Failed);
    assert_eq!(wait, secs(60));

    // Success restarts the window.
    chain.set_pending_nonce_offset(ME, 0);
    assert!(matches!(action.tick().await.0, TickOutcome::Acted(_)));
    chain.set_pending_nonce_offset(ME, 1);
    assert_eq!(action.tick().await, (TickOutcome::Tolerated, secs(2)));
}

#[traced_test]
#[tokio::test]
async fn test_panic_clears_queued_calls() {
    let chain = MockChain::new(ROLLUP);
    let metrics = Arc::new(RecordingMetrics::default());
    chain.set_withdrawable(ME, 5);
    let wallet = Arc::new(ContractWallet::new(
        Some(ME),
        SENDER,
        Arc::new(chain.clone()),
    ));
    let agent = agent_with(
        &chain,
        StakerConfig::with_strategy(Strategy::StakeLatest),
        wallet,
        Arc::new(PanickingSource),
        metrics.clone(),
    );
    let mut action = ActionLoop::new(agent, RunnerConfig::default(), metrics);

    let (outcome, wait) = action.tick().await;

    assert_eq!(outcome, TickOutcome::Panicked);
    assert_eq!(wait, secs(60));
    assert_eq!(action.agent().batcher().building_transaction_count(), 0);
    assert!(chain.sent_txs().is_empty());
    assert!(logs_contain("local validation state corrupted"));

    // The loop survives and keeps ticking.
    assert_eq!(action.tick().await.0, TickOutcome::Panicked);
}

#[tokio::test(start_paused = true)]
async fn test_runner_ticks_reports_and_stops() {
    let chain = MockChain::new(ROLLUP);
    let metrics = Arc::new(RecordingMetrics::default());
    let agent = eoa_agent(&chain, Strategy::StakeLatest, metrics.clone());
    let notifier = Arc::new(RecordingNotifier::default());
    let notifiers = Notifiers::new()
        .on_staked(notifier.clone())
        .on_confirmed(notifier.clone());
    let shutdown = CancellationToken::new();

    let runner = AgentRunner::start(
        agent,
        RunnerConfig::default().with_notifier_interval(secs(1)),
        metrics.clone(),
        notifiers,
        &shutdown,
    );
    tokio::time::sleep(secs(5)).await;

    assert_eq!(chain.staker(ME).unwrap().latest_staked_node, NodeNum(1));
    let staked = notifier.staked();
    assert!(staked.len() >= 2);
    assert_eq!(staked.last().unwrap().0, NodeNum(1));
    assert_eq!(notifier.confirmed().last().unwrap().0, NodeNum::GENESIS);
    assert_eq!(metrics.gauge(STAKER_STAKED_NODE), Some(1.0));
    assert_eq!(metrics.gauge(STAKER_CONFIRMED_NODE), Some(0.0));

    let agent = runner.stop_and_wait().await.unwrap();
    assert_eq!(agent.strategy(), Strategy::StakeLatest);
}

#[tokio::test(start_paused = true)]
async fn test_parent_cancellation_stops_both_loops() {
    let chain = MockChain::new(ROLLUP);
    let metrics = Arc::new(RecordingMetrics::default());
    let agent = eoa_agent(&chain, Strategy::Watchtower, metrics.clone());
    let shutdown = CancellationToken::new();
    let runner = AgentRunner::start(
        agent,
        RunnerConfig::default(),
        metrics,
        Notifiers::new(),
        &shutdown,
    );

    shutdown.cancel();
    tokio::time::timeout(secs(1), async {
        while !runner.is_finished() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();
    assert!(runner.stop_and_wait().await.is_some());
}
