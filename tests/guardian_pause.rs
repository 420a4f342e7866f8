//! Guardian pause: the pause file stops new orders between ticks and
//! trading resumes when it is removed, with no catch-up burst.

mod common;

use common::{FixedProvider, test_config, test_store};
use neolight::application::quotes::{QuoteService, QuoteServiceConfig};
use neolight::application::risk::{BreakerRegistry, QUOTE_FETCH};
use neolight::application::trading::TradeLoop;
use neolight::domain::control::GuardianPause;
use neolight::domain::ports::Broker;
use neolight::domain::trading::BrokerState;
use neolight::infrastructure::brokers::PaperBroker;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use tokio::sync::{RwLock, watch};

#[tokio::test]
async fn pause_file_halts_and_resumes_trading() {
    let store = test_store("pause");
    let config = test_config(
        store.paths().state_dir().parent().unwrap().to_path_buf(),
        &["BTC-USD"],
    );

    let state = Arc::new(RwLock::new(BrokerState::new(dec!(100000))));
    let breakers = BreakerRegistry::standard(&config);
    let quotes = Arc::new(QuoteService::new(
        vec![FixedProvider::at(dec!(60000))],
        breakers.get(QUOTE_FETCH).unwrap(),
        QuoteServiceConfig::default(),
    ));
    let broker: Arc<dyn Broker> = Arc::new(PaperBroker::new(state.clone(), quotes.clone()));

    let mut trade_loop = TradeLoop::new(
        config,
        store.clone(),
        quotes,
        broker,
        state.clone(),
        &breakers,
        dec!(100000),
    )
    .unwrap();
    trade_loop.startup_check().unwrap();
    let (_tx, rx) = watch::channel(false);

    // Guardian pauses before the first tick.
    store
        .write_json(
            &store.paths().guardian_pause(),
            &GuardianPause {
                paused: true,
                reason: Some("anomaly review".into()),
            },
        )
        .unwrap();

    trade_loop.tick(&rx).await;
    assert!(state.read().await.position("BTC-USD").is_flat());
    assert_eq!(trade_loop.counters().snapshot().trades_executed, 0);

    // Pause lifts; the next tick trades normally.
    std::fs::remove_file(store.paths().guardian_pause()).unwrap();
    trade_loop.tick(&rx).await;
    assert!(state.read().await.position("BTC-USD").qty > Decimal::ZERO);
    assert_eq!(trade_loop.counters().snapshot().trades_executed, 1);
}
