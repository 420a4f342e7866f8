//! Budget-driven cutover: usage crosses the switch threshold, the
//! primary's agents are quiesced to a hard barrier, state crosses the
//! shared store, and the ledger flips to the failover environment.

mod common;

use common::{temp_data_dir, test_store};
use neolight::application::supervisor::{
    AgentSpec, FailoverDecision, FailoverOrchestrator, Supervisor, SupervisorConfig,
    lockfile::pid_alive,
};
use neolight::domain::control::Environment;
use neolight::domain::trading::BrokerState;
use neolight::infrastructure::persistence::{ObjectSharedStore, SharedStore};
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn switch_threshold_quiesces_primary_and_flips_ledger() {
    let store = test_store("cutover");
    store
        .save_broker_state(&BrokerState::new(dec!(42000)))
        .unwrap();
    let shared: Arc<dyn SharedStore> =
        Arc::new(ObjectSharedStore::local(&temp_data_dir("cutover-shared")).unwrap());

    // 0.1h short of the threshold, as in a long-running month.
    let mut orchestrator =
        FailoverOrchestrator::load(store.clone(), shared.clone(), 650.0, 720.0).unwrap();

    let mut supervisor = Supervisor::new(
        store.clone(),
        SupervisorConfig {
            initial_backoff: Duration::from_millis(100),
            backoff_cap: Duration::from_secs(1),
            stability_window: Duration::from_secs(60),
            shutdown_grace: Duration::from_secs(5),
        },
        vec![AgentSpec {
            name: "trade_loop".into(),
            command: "sleep".into(),
            args: vec!["60".into()],
            required: true,
            priority: 1,
        }],
    );
    supervisor.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    let child_pid = supervisor.registry().read().await["trade_loop"].pid.unwrap();
    assert!(pid_alive(child_pid));

    // Seed usage just below the threshold, then advance past it.
    let now = chrono::Utc::now();
    let hours_to_go = 719.9;
    let decision = orchestrator
        .tick(
            now,
            Duration::from_secs_f64(hours_to_go * 3600.0),
            true,
        )
        .await
        .unwrap();
    assert_eq!(decision, FailoverDecision::Warn);

    let decision = orchestrator
        .tick(now, Duration::from_secs(720), true)
        .await
        .unwrap();
    assert_eq!(decision, FailoverDecision::SwitchToFailover);

    // Stop-the-world barrier, then the ledger flip.
    supervisor.stop_agents().await;
    assert!(!pid_alive(child_pid), "no child survives the barrier");

    orchestrator.complete_switch(now).await.unwrap();
    assert_eq!(
        orchestrator.ledger().active_environment,
        Environment::Failover
    );

    // The failover side sees the flipped ledger and the broker snapshot.
    assert_eq!(
        orchestrator.shared_active_environment().await.unwrap(),
        Environment::Failover
    );
    let pushed = shared.get("state/broker_state.json").await.unwrap();
    assert!(pushed.is_some());
    let restored: BrokerState = serde_json::from_slice(&pushed.unwrap()).unwrap();
    assert_eq!(restored.cash, dec!(42000));
}
