//! Trade-loop agent.
//!
//! One of the supervisor's managed processes: drives paper or live
//! trading iterations over the configured symbol universe, persisting
//! account state after every mutation. Exits 0 on SIGTERM, 2 when
//! persisted state is corrupt.

use clap::Parser;
use neolight::application::quotes::{QuoteService, QuoteServiceConfig};
use neolight::application::risk::{BreakerRegistry, QUOTE_FETCH};
use neolight::application::trading::{MetricsReporter, TradeLoop};
use neolight::config::Config;
use neolight::domain::control::{ModeFile, TradingMode};
use neolight::domain::errors::StateError;
use neolight::domain::ports::Broker;
use neolight::domain::trading::BrokerState;
use neolight::infrastructure::brokers::{AlpacaBroker, PaperBroker};
use neolight::infrastructure::core::HttpClientFactory;
use neolight::infrastructure::persistence::{StatePaths, StateStore};
use neolight::infrastructure::providers::build_providers;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, watch};
use tracing::{Level, error, info};
use tracing_subscriber::prelude::*;

#[derive(Parser, Debug)]
#[command(name = "trader", about = "Neolight trade-loop agent")]
struct Cli {
    /// Run exactly one tick and exit (smoke-testing the pipeline).
    #[arg(long)]
    once: bool,
}

fn exit_corrupt(e: &StateError) -> ! {
    error!("Refusing to start on corrupt persistent state: {e}");
    std::process::exit(2);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let stdout_layer = tracing_subscriber::fmt::layer().with_target(false);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(stdout_layer)
        .init();

    info!("Trader {} starting...", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;
    let store = StateStore::new(StatePaths::new(config.data_dir.clone()));
    store.ensure_dirs().map_err(|e| {
        error!("Cannot create data directories: {e}");
        anyhow::anyhow!("data directory setup failed")
    })?;

    // The mode file is authoritative; the environment is the fallback for
    // first boot. Changing mode requires a restart by design.
    let mode = match store.load_trading_mode() {
        Ok(Some(file)) => file.mode,
        Ok(None) => {
            let file = ModeFile {
                mode: config.trading_mode,
                timestamp: chrono::Utc::now(),
            };
            store
                .save_trading_mode(&file)
                .unwrap_or_else(|e| error!("Could not record trading mode: {e}"));
            file.mode
        }
        Err(e) => exit_corrupt(&e),
    };
    let mut config = config;
    config.trading_mode = mode;
    info!(
        "Trader: mode {:?}, symbols {:?}, tick every {}s",
        config.trading_mode, config.symbols, config.tick_interval_secs
    );

    let broker_state = match store.load_broker_state() {
        Ok(Some(state)) => {
            info!(
                "Trader: loaded snapshot (cash {}, {} positions)",
                state.cash,
                state.positions.len()
            );
            state
        }
        Ok(None) => {
            info!("Trader: no snapshot, opening with {}", config.initial_cash);
            BrokerState::new(config.initial_cash)
        }
        Err(e) => exit_corrupt(&e),
    };
    let initial_equity = broker_state.equity_cached;
    let state = Arc::new(RwLock::new(broker_state));

    let breakers = BreakerRegistry::standard(&config);
    let quote_breaker = breakers
        .get(QUOTE_FETCH)
        .expect("standard registry holds QuoteFetch");

    let client = HttpClientFactory::create_client(Duration::from_secs(30));
    let quote_config = QuoteServiceConfig {
        fanout: config.quote_fanout,
        provider_timeout: Duration::from_secs(config.provider_timeout_secs),
        backoff_base: Duration::from_secs(config.quote_backoff_base_secs),
        backoff_cap: Duration::from_secs(config.quote_backoff_cap_secs),
    };

    // Live mode routes quotes and orders through the upstream broker; the
    // other modes use the built-in simulator, which prices fills off the
    // quote service and therefore must not also feed it.
    let (quotes, broker): (Arc<QuoteService>, Arc<dyn Broker>) = match config.trading_mode {
        TradingMode::Live => {
            let alpaca: Arc<dyn Broker> = Arc::new(AlpacaBroker::new(
                client.clone(),
                config.alpaca_api_key.clone(),
                config.alpaca_secret_key.clone(),
                config.alpaca_base_url.clone(),
                config.alpaca_data_url.clone(),
            ));
            let providers = build_providers(&config, client.clone(), Some(alpaca.clone()));
            let quotes = Arc::new(QuoteService::new(providers, quote_breaker, quote_config));
            (quotes, alpaca)
        }
        TradingMode::Paper | TradingMode::Test => {
            let providers = build_providers(&config, client.clone(), None);
            let quotes = Arc::new(QuoteService::new(providers, quote_breaker, quote_config));
            let paper: Arc<dyn Broker> =
                Arc::new(PaperBroker::new(state.clone(), quotes.clone()));
            (quotes, paper)
        }
    };

    let mut trade_loop = TradeLoop::new(
        config.clone(),
        store.clone(),
        quotes.clone(),
        broker,
        state.clone(),
        &breakers,
        initial_equity,
    )?;
    if let Err(e) = trade_loop.startup_check() {
        exit_corrupt(&e);
    }

    let reporter = MetricsReporter::new(
        store.clone(),
        state.clone(),
        quotes.metrics(),
        trade_loop.counters(),
        Duration::from_secs(15),
    );
    tokio::spawn(reporter.run());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("SIGTERM handler");
        tokio::select! {
            _ = sigterm.recv() => info!("Trader: SIGTERM received"),
            _ = tokio::signal::ctrl_c() => info!("Trader: interrupt received"),
        }
        let _ = shutdown_tx.send(true);
    });

    if cli.once {
        trade_loop.tick(&shutdown_rx).await;
        info!("Trader: single tick complete");
        return Ok(());
    }

    trade_loop.run(shutdown_rx).await;
    Ok(())
}
