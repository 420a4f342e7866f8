//! Shared fixtures for the end-to-end scenarios.
#![allow(dead_code)]

use async_trait::async_trait;
use neolight::config::Config;
use neolight::domain::control::{Environment, TradingMode};
use neolight::domain::errors::ProviderError;
use neolight::domain::ports::QuoteProvider;
use neolight::domain::quote::{Quote, QuoteSource};
use neolight::infrastructure::persistence::{StatePaths, StateStore};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

pub fn temp_data_dir(tag: &str) -> PathBuf {
    std::env::temp_dir().join(format!("neolight-e2e-{tag}-{}", uuid::Uuid::new_v4()))
}

pub fn test_store(tag: &str) -> StateStore {
    let store = StateStore::new(StatePaths::new(temp_data_dir(tag)));
    store.ensure_dirs().unwrap();
    store
}

/// A config wired for fast, deterministic test runs: short windows, no
/// network providers, generous risk limits.
pub fn test_config(data_dir: PathBuf, symbols: &[&str]) -> Config {
    Config {
        trading_mode: TradingMode::Test,
        environment: Environment::Primary,
        data_dir,
        symbols: symbols.iter().map(|s| s.to_string()).collect(),
        tick_interval_secs: 1,
        quote_providers: vec![QuoteSource::Finnhub],
        quote_max_age_secs: 60,
        quote_fanout: 2,
        provider_timeout_secs: 2,
        quote_backoff_base_secs: 0,
        quote_backoff_cap_secs: 1,
        finnhub_api_key: String::new(),
        twelvedata_api_key: String::new(),
        alphavantage_api_key: String::new(),
        alpaca_api_key: String::new(),
        alpaca_secret_key: String::new(),
        alpaca_base_url: "https://paper-api.alpaca.markets".into(),
        alpaca_data_url: "https://data.alpaca.markets".into(),
        initial_cash: dec!(100000),
        min_trade_notional: dec!(25),
        max_daily_loss_pct: 0.05,
        max_trades_per_day: 50,
        max_drawdown_pct: 0.10,
        exec_failure_threshold: 5,
        exec_recovery_secs: 1,
        quote_failure_threshold: 10,
        quote_recovery_secs: 1,
        half_open_success_threshold: 1,
        fast_sma_period: 3,
        slow_sma_period: 5,
        sma_threshold: 0.001,
        rsi_period: 3,
        rsi_overbought: 70.0,
        cold_start_override: true,
        symbol_backoff_base_secs: 0,
        symbol_backoff_cap_secs: 1,
        roster_path: PathBuf::from("config/agents.json"),
        agent_initial_backoff_secs: 1,
        agent_backoff_cap_secs: 4,
        agent_stability_window_secs: 60,
        shutdown_grace_secs: 2,
        http_bind: "127.0.0.1:0".into(),
        render_mode: false,
        failover_warn_hours: 650.0,
        failover_switch_hours: 720.0,
        shared_store_path: temp_data_dir("shared"),
        keepalive_url: None,
        keepalive_interval_secs: 600,
        usage_tick_secs: 60,
    }
}

/// Provider that always answers with a fixed price.
pub struct FixedProvider {
    pub price: Decimal,
    pub calls: AtomicUsize,
}

impl FixedProvider {
    pub fn at(price: Decimal) -> Arc<Self> {
        Arc::new(Self {
            price,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl QuoteProvider for FixedProvider {
    fn source(&self) -> QuoteSource {
        QuoteSource::Finnhub
    }

    async fn fetch(&self, symbol: &str) -> Result<Quote, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Quote::new(symbol, self.price, QuoteSource::Finnhub).unwrap())
    }
}
