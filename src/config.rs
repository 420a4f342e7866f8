use crate::domain::control::{Environment, TradingMode};
use crate::domain::quote::QuoteSource;
use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

/// Explicit configuration record loaded once at startup and passed by
/// reference. No component other than this loader reads environment
/// variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub trading_mode: TradingMode,
    pub environment: Environment,
    pub data_dir: PathBuf,
    pub symbols: Vec<String>,
    pub tick_interval_secs: u64,
    // Quote service
    pub quote_providers: Vec<QuoteSource>,
    pub quote_max_age_secs: u64,
    pub quote_fanout: usize,
    pub provider_timeout_secs: u64,
    pub quote_backoff_base_secs: u64,
    pub quote_backoff_cap_secs: u64,
    pub finnhub_api_key: String,
    pub twelvedata_api_key: String,
    pub alphavantage_api_key: String,
    // Broker
    pub alpaca_api_key: String,
    pub alpaca_secret_key: String,
    pub alpaca_base_url: String,
    pub alpaca_data_url: String,
    pub initial_cash: Decimal,
    pub min_trade_notional: Decimal,
    // Risk limits
    pub max_daily_loss_pct: f64,
    pub max_trades_per_day: u32,
    pub max_drawdown_pct: f64,
    // Circuit breakers
    pub exec_failure_threshold: usize,
    pub exec_recovery_secs: u64,
    pub quote_failure_threshold: usize,
    pub quote_recovery_secs: u64,
    pub half_open_success_threshold: usize,
    // Signals
    pub fast_sma_period: usize,
    pub slow_sma_period: usize,
    pub sma_threshold: f64,
    pub rsi_period: usize,
    pub rsi_overbought: f64,
    pub cold_start_override: bool,
    // Per-symbol backoff
    pub symbol_backoff_base_secs: u64,
    pub symbol_backoff_cap_secs: u64,
    // Supervisor
    pub roster_path: PathBuf,
    pub agent_initial_backoff_secs: u64,
    pub agent_backoff_cap_secs: u64,
    pub agent_stability_window_secs: u64,
    pub shutdown_grace_secs: u64,
    pub http_bind: String,
    pub render_mode: bool,
    // Cloud failover
    pub failover_warn_hours: f64,
    pub failover_switch_hours: f64,
    pub shared_store_path: PathBuf,
    pub keepalive_url: Option<String>,
    pub keepalive_interval_secs: u64,
    pub usage_tick_secs: u64,
}

fn parse_var<T: FromStr>(name: &str, default: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    raw.parse::<T>()
        .map_err(|e| anyhow::anyhow!("Failed to parse {name}='{raw}': {e}"))
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let trading_mode_str = env::var("TRADING_MODE").unwrap_or_else(|_| "paper".to_string());
        let trading_mode = TradingMode::from_str(&trading_mode_str)?;

        let environment_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "primary".to_string());
        let environment = Environment::from_str(&environment_str)?;

        let data_dir = PathBuf::from(env::var("DATA_DIR").unwrap_or_else(|_| "data".to_string()));

        let symbols_str =
            env::var("SYMBOLS").unwrap_or_else(|_| "BTC-USD,ETH-USD".to_string());
        let symbols: Vec<String> = symbols_str
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let providers_str = env::var("QUOTE_PROVIDERS")
            .unwrap_or_else(|_| "broker,finnhub,twelvedata,alphavantage,yahoo".to_string());
        let mut quote_providers = Vec::new();
        for entry in providers_str.split(',') {
            let source = QuoteSource::from_str(entry)
                .map_err(|e| anyhow::anyhow!("Failed to parse QUOTE_PROVIDERS: {e}"))?;
            // A provider listed twice would be fetched twice per tick.
            if !quote_providers.contains(&source) {
                quote_providers.push(source);
            }
        }

        let initial_cash = parse_var::<f64>("INITIAL_CASH", "100000.0")
            .context("Failed to parse INITIAL_CASH")?;
        let min_trade_notional = parse_var::<f64>("MIN_TRADE_NOTIONAL", "25.0")
            .context("Failed to parse MIN_TRADE_NOTIONAL")?;

        let render_mode = parse_var::<bool>("RENDER_MODE", "false").unwrap_or(false);
        // Render-style deployments must bind publicly for platform health
        // probes; everywhere else stays loopback-only.
        let default_bind = if render_mode {
            "0.0.0.0:8080"
        } else {
            "127.0.0.1:8080"
        };
        let http_bind = env::var("HTTP_BIND").unwrap_or_else(|_| default_bind.to_string());

        Ok(Config {
            trading_mode,
            environment,
            data_dir,
            symbols,
            tick_interval_secs: parse_var("TICK_INTERVAL_SECONDS", "5")?,
            quote_providers,
            quote_max_age_secs: parse_var("QUOTE_MAX_AGE_SECONDS", "60")?,
            quote_fanout: parse_var("QUOTE_FANOUT", "3")?,
            provider_timeout_secs: parse_var("PROVIDER_TIMEOUT_SECONDS", "8")?,
            quote_backoff_base_secs: parse_var("QUOTE_BACKOFF_BASE_SECONDS", "30")?,
            quote_backoff_cap_secs: parse_var("QUOTE_BACKOFF_CAP_SECONDS", "900")?,
            finnhub_api_key: env::var("FINNHUB_API_KEY").unwrap_or_default(),
            twelvedata_api_key: env::var("TWELVEDATA_API_KEY").unwrap_or_default(),
            alphavantage_api_key: env::var("ALPHAVANTAGE_API_KEY").unwrap_or_default(),
            alpaca_api_key: env::var("ALPACA_API_KEY").unwrap_or_default(),
            alpaca_secret_key: env::var("ALPACA_SECRET_KEY").unwrap_or_default(),
            alpaca_base_url: env::var("ALPACA_BASE_URL")
                .unwrap_or_else(|_| "https://paper-api.alpaca.markets".to_string()),
            alpaca_data_url: env::var("ALPACA_DATA_URL")
                .unwrap_or_else(|_| "https://data.alpaca.markets".to_string()),
            initial_cash: Decimal::from_f64(initial_cash).unwrap_or(Decimal::from(100000)),
            min_trade_notional: Decimal::from_f64(min_trade_notional)
                .unwrap_or(Decimal::from(25)),
            max_daily_loss_pct: parse_var("RISK_MAX_DAILY_LOSS_PCT", "0.05")?,
            max_trades_per_day: parse_var("RISK_MAX_TRADES_PER_DAY", "50")?,
            max_drawdown_pct: parse_var("RISK_MAX_DRAWDOWN_PCT", "0.10")?,
            exec_failure_threshold: parse_var("EXEC_BREAKER_FAILURES", "5")?,
            exec_recovery_secs: parse_var("EXEC_BREAKER_RECOVERY_SECONDS", "600")?,
            quote_failure_threshold: parse_var("QUOTE_BREAKER_FAILURES", "10")?,
            quote_recovery_secs: parse_var("QUOTE_BREAKER_RECOVERY_SECONDS", "120")?,
            half_open_success_threshold: parse_var("BREAKER_HALF_OPEN_SUCCESSES", "2")?,
            fast_sma_period: parse_var("FAST_SMA_PERIOD", "20")?,
            slow_sma_period: parse_var("SLOW_SMA_PERIOD", "60")?,
            sma_threshold: parse_var("SMA_THRESHOLD", "0.001")?,
            rsi_period: parse_var("RSI_PERIOD", "14")?,
            rsi_overbought: parse_var("RSI_OVERBOUGHT", "70.0")?,
            cold_start_override: parse_var("COLD_START_OVERRIDE", "true").unwrap_or(true),
            symbol_backoff_base_secs: parse_var("SYMBOL_BACKOFF_BASE_SECONDS", "60")?,
            symbol_backoff_cap_secs: parse_var("SYMBOL_BACKOFF_CAP_SECONDS", "900")?,
            roster_path: PathBuf::from(
                env::var("AGENT_ROSTER").unwrap_or_else(|_| "config/agents.json".to_string()),
            ),
            agent_initial_backoff_secs: parse_var("AGENT_INITIAL_BACKOFF_SECONDS", "2")?,
            agent_backoff_cap_secs: parse_var("AGENT_BACKOFF_CAP_SECONDS", "60")?,
            agent_stability_window_secs: parse_var("AGENT_STABILITY_WINDOW_SECONDS", "60")?,
            shutdown_grace_secs: parse_var("SHUTDOWN_GRACE_SECONDS", "30")?,
            http_bind,
            render_mode,
            failover_warn_hours: parse_var("FAILOVER_WARN_HOURS", "650.0")?,
            failover_switch_hours: parse_var("FAILOVER_SWITCH_HOURS", "720.0")?,
            shared_store_path: PathBuf::from(
                env::var("SHARED_STORE_PATH").unwrap_or_else(|_| "data/shared".to_string()),
            ),
            keepalive_url: env::var("KEEPALIVE_URL").ok().filter(|s| !s.is_empty()),
            keepalive_interval_secs: parse_var("KEEPALIVE_INTERVAL_SECONDS", "600")?,
            usage_tick_secs: parse_var("USAGE_TICK_SECONDS", "60")?,
        })
    }
}
