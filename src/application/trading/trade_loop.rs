use crate::application::quotes::QuoteService;
use crate::application::quotes::backoff::Backoff;
use crate::application::risk::{BreakerRegistry, RiskGate, RiskGateConfig, TRADE_EXECUTION};
use crate::application::trading::allocations::AllocationLoader;
use crate::application::trading::signal::{SignalConfig, SignalEngine};
use crate::application::trading::sizing::{SizingInputs, size_buy, size_sell};
use crate::config::Config;
use crate::domain::allocation::AllocationMap;
use crate::domain::control::{BrainState, TradingMode};
use crate::domain::errors::{BrokerError, StateError};
use crate::domain::ports::Broker;
use crate::domain::risk::RiskState;
use crate::domain::symbol::SymbolClass;
use crate::domain::trading::BrokerState;
use crate::domain::trading::types::{OrderRequest, OrderSide, Signal, TradeEvent};
use crate::infrastructure::core::CircuitBreaker;
use crate::infrastructure::persistence::StateStore;
use anyhow::Context;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock, watch};
use tracing::{debug, error, info, warn};

/// Outcome of one pass through the atomic execution block. The first
/// three continue the sweep; `Fatal` additionally records a breaker
/// failure and puts the symbol under backoff.
#[derive(Debug)]
pub enum ExecOutcome {
    Filled(Box<TradeEvent>),
    PolicyDenied(String),
    UpstreamFailed(String),
    Fatal(String),
}

/// Counters distinguishing a quiet market from a broken system: policy
/// skips are normal control flow, faults are not.
#[derive(Debug, Default)]
pub struct TradeCounters {
    pub trades_executed: AtomicU64,
    pub policy_skips: AtomicU64,
    pub trade_faults: AtomicU64,
    pub quote_misses: AtomicU64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TradeCountersSnapshot {
    pub trades_executed: u64,
    pub policy_skips: u64,
    pub trade_faults: u64,
    pub quote_misses: u64,
}

impl TradeCounters {
    pub fn snapshot(&self) -> TradeCountersSnapshot {
        TradeCountersSnapshot {
            trades_executed: self.trades_executed.load(Ordering::Relaxed),
            policy_skips: self.policy_skips.load(Ordering::Relaxed),
            trade_faults: self.trade_faults.load(Ordering::Relaxed),
            quote_misses: self.quote_misses.load(Ordering::Relaxed),
        }
    }
}

/// One paper or live trading iteration per configured interval.
///
/// Single writer of `BrokerState`; every mutation is snapshotted before
/// the sweep moves on. Interruptible at symbol boundaries.
pub struct TradeLoop {
    config: Config,
    store: StateStore,
    quotes: Arc<QuoteService>,
    broker: Arc<dyn Broker>,
    state: Arc<RwLock<BrokerState>>,
    risk_state: RiskState,
    gate: RiskGate,
    exec_breaker: Arc<CircuitBreaker>,
    signals: SignalEngine,
    alloc_loader: AllocationLoader,
    symbol_backoff: HashMap<String, Backoff>,
    symbol_locks: HashMap<String, Arc<Mutex<()>>>,
    counters: Arc<TradeCounters>,
}

impl TradeLoop {
    pub fn new(
        config: Config,
        store: StateStore,
        quotes: Arc<QuoteService>,
        broker: Arc<dyn Broker>,
        state: Arc<RwLock<BrokerState>>,
        breakers: &BreakerRegistry,
        initial_equity: Decimal,
    ) -> anyhow::Result<Self> {
        let exec_breaker = breakers
            .get(TRADE_EXECUTION)
            .context("TradeExecution breaker missing from registry")?;

        let now = Utc::now();
        let mut risk_state = match store.load_risk_state()? {
            Some(state) => state,
            None => RiskState::open_day(now, initial_equity),
        };
        risk_state.roll_over_if_new_day(now, initial_equity);

        let gate = RiskGate::new(RiskGateConfig {
            max_daily_loss_pct: config.max_daily_loss_pct,
            max_trades_per_day: config.max_trades_per_day,
            max_drawdown_pct: config.max_drawdown_pct,
            halt_path: store.paths().halt_trading(),
        });

        let signals = SignalEngine::new(SignalConfig {
            fast_sma_period: config.fast_sma_period,
            slow_sma_period: config.slow_sma_period,
            sma_threshold: config.sma_threshold,
            rsi_period: config.rsi_period,
            rsi_overbought: config.rsi_overbought,
            cold_start_override: config.cold_start_override,
        });

        let alloc_loader = AllocationLoader::new(store.clone());

        Ok(Self {
            config,
            store,
            quotes,
            broker,
            state,
            risk_state,
            gate,
            exec_breaker,
            signals,
            alloc_loader,
            symbol_backoff: HashMap::new(),
            symbol_locks: HashMap::new(),
            counters: Arc::new(TradeCounters::default()),
        })
    }

    pub fn counters(&self) -> Arc<TradeCounters> {
        self.counters.clone()
    }

    /// Startup validation: corrupt allocation input is refused here so
    /// the binary can exit 2 before any trading starts.
    pub fn startup_check(&mut self) -> Result<(), StateError> {
        self.alloc_loader.load_startup()?;
        let _ = self.store.save_risk_state(&self.risk_state);
        Ok(())
    }

    /// Drive ticks until shutdown. SIGTERM finishes the current symbol
    /// and exits cleanly; state is persisted on the way out.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "TradeLoop: starting ({:?} mode, {} symbols, every {}s)",
            self.config.trading_mode,
            self.config.symbols.len(),
            self.config.tick_interval_secs
        );

        let mut interval =
            tokio::time::interval(Duration::from_secs(self.config.tick_interval_secs.max(1)));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick(&shutdown).await;
                    if *shutdown.borrow() {
                        break;
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        let state = self.state.read().await;
        if let Err(e) = self.store.save_broker_state(&state) {
            error!("TradeLoop: final state snapshot failed: {e}");
        }
        let _ = self.store.save_risk_state(&self.risk_state);
        info!("TradeLoop: stopped cleanly");
    }

    /// One sweep over the configured universe.
    pub async fn tick(&mut self, shutdown: &watch::Receiver<bool>) {
        let now = Utc::now();
        let equity = self.state.read().await.equity_cached;
        if self.risk_state.roll_over_if_new_day(now, equity) {
            info!("TradeLoop: new trading day, daily counters reset");
            let _ = self.store.save_risk_state(&self.risk_state);
        }

        if self.store.guardian_paused() {
            info!("TradeLoop: guardian pause active, skipping sweep");
            return;
        }

        let allocations = self.alloc_loader.load_tick();
        let brain = self.store.load_brain_state();

        for symbol in self.config.symbols.clone() {
            if *shutdown.borrow() {
                info!("TradeLoop: shutdown requested, stopping after {symbol}");
                break;
            }
            self.process_symbol(&symbol, &allocations, &brain).await;
        }

        let equity = self.state.read().await.equity_cached;
        self.risk_state.observe_equity(equity);
        let _ = self.store.save_risk_state(&self.risk_state);
    }

    #[tracing::instrument(skip(self, allocations, brain), fields(symbol = %symbol))]
    async fn process_symbol(
        &mut self,
        symbol: &str,
        allocations: &AllocationMap,
        brain: &BrainState,
    ) {
        let class = SymbolClass::of(symbol);

        if self
            .symbol_backoff
            .get(symbol)
            .is_some_and(|b| b.is_active())
        {
            debug!("TradeLoop: {symbol} under backoff, skipping");
            self.counters.policy_skips.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let max_age = Duration::from_secs(self.config.quote_max_age_secs);
        let hit = match self.quotes.get_quote(symbol, max_age, true).await {
            Some(hit) => hit,
            None => {
                warn!("TradeLoop: no quote for {symbol}, entering symbol backoff");
                self.counters.quote_misses.fetch_add(1, Ordering::Relaxed);
                self.symbol_backoff_mut(symbol).record_failure();
                return;
            }
        };
        let quote = hit.quote().clone();

        {
            let mut state = self.state.write().await;
            state.observe_price(symbol, quote.price);
        }
        self.signals
            .observe(symbol, quote.price.to_f64().unwrap_or(0.0));
        if let Some(backoff) = self.symbol_backoff.get_mut(symbol) {
            backoff.record_success();
        }

        let (has_position, held_qty, current_value, equity) = {
            let state = self.state.read().await;
            let position = state.position(symbol);
            (
                !position.is_flat(),
                position.qty,
                state.position_value(symbol),
                state.equity_cached,
            )
        };

        let signal = self.signals.evaluate(symbol, has_position);
        if signal == Signal::Hold {
            return;
        }

        {
            let state = self.state.read().await;
            if let Err(deny) = self.gate.evaluate(symbol, &state, &self.risk_state, Utc::now()) {
                info!("TradeLoop: {symbol} {signal} rejected by risk gate: {deny}");
                self.counters.policy_skips.fetch_add(1, Ordering::Relaxed);
                return;
            }
        }

        if !self.exec_breaker.can_proceed().await {
            info!("TradeLoop: {symbol} {signal} rejected: TradeExecution breaker open");
            self.counters.policy_skips.fetch_add(1, Ordering::Relaxed);
            return;
        }

        // Allocation interpretation: the risk scaler applies here, exactly
        // once, and sub-minimum fractions get the class floor.
        let mut fraction = allocations.fraction(symbol);
        if fraction < 0.01 {
            fraction = class.min_allocation_fraction();
        }
        let scaled = fraction * brain.risk_scaler;
        let target_value = equity * Decimal::from_f64(scaled).unwrap_or(Decimal::ZERO);

        let sized = match signal {
            Signal::Buy => size_buy(
                class,
                &SizingInputs {
                    target_value,
                    current_value,
                    price: quote.price,
                    min_notional: self.config.min_trade_notional,
                },
            )
            .map(|qty| (OrderSide::Buy, qty)),
            Signal::Sell => size_sell(class, held_qty).map(|qty| (OrderSide::Sell, qty)),
            Signal::Hold => None,
        };
        let Some((side, qty)) = sized else {
            debug!("TradeLoop: {symbol} {signal} produced no order after sizing");
            return;
        };

        let outcome = self.execute_order(symbol, side, qty).await;
        match outcome {
            ExecOutcome::Filled(event) => {
                self.counters.trades_executed.fetch_add(1, Ordering::Relaxed);
                info!(
                    "TradeLoop: executed {} {} {} @ {} (realized pnl {}, cash {})",
                    event.receipt.side,
                    event.receipt.qty,
                    symbol,
                    event.receipt.fill_price,
                    event.realized_pnl,
                    event.cash_after
                );
            }
            ExecOutcome::PolicyDenied(reason) => {
                info!("TradeLoop: {symbol} {side} denied: {reason}");
                self.counters.policy_skips.fetch_add(1, Ordering::Relaxed);
            }
            ExecOutcome::UpstreamFailed(reason) => {
                warn!("TradeLoop: {symbol} {side} failed upstream: {reason}");
                self.counters.trade_faults.fetch_add(1, Ordering::Relaxed);
                self.symbol_backoff_mut(symbol).record_failure();
            }
            ExecOutcome::Fatal(detail) => {
                error!(
                    "TradeLoop: fatal fault executing {side} {qty} {symbol}: {detail}; \
                     symbol goes under backoff, loop continues"
                );
                self.counters.trade_faults.fetch_add(1, Ordering::Relaxed);
                self.symbol_backoff_mut(symbol).record_failure();
            }
        }
    }

    /// The atomic execution block: per-symbol lock, freshness re-check,
    /// submit, apply, persist. No silent fallbacks inside.
    #[tracing::instrument(skip(self), fields(symbol = %symbol, side = %side, qty = %qty))]
    async fn execute_order(&mut self, symbol: &str, side: OrderSide, qty: Decimal) -> ExecOutcome {
        let lock = self
            .symbol_locks
            .entry(symbol.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        let max_age = Duration::from_secs(self.config.quote_max_age_secs);
        if self.quotes.get_quote(symbol, max_age, false).await.is_none() {
            // Quote-side trouble is already counted by the QuoteFetch
            // breaker; it does not dent TradeExecution.
            return ExecOutcome::UpstreamFailed(format!(
                "quote freshness re-check failed for {symbol}"
            ));
        }

        let order = OrderRequest {
            symbol: symbol.to_string(),
            side,
            qty,
            limit_price: None,
        };

        match self.broker.submit_order(order).await {
            Ok(receipt) => {
                let event = {
                    let mut state = self.state.write().await;
                    let realized = state.apply_fill(&receipt);
                    if self.config.trading_mode == TradingMode::Test && !state.test_trade_executed
                    {
                        state.test_trade_executed = true;
                        info!("TradeLoop: self-test trade path verified end-to-end");
                    }
                    let event = TradeEvent {
                        receipt: receipt.clone(),
                        realized_pnl: realized,
                        cash_after: state.cash,
                        equity_after: state.equity_cached,
                    };
                    if let Err(e) = self.store.save_broker_state(&state) {
                        self.exec_breaker.record_failure().await;
                        return ExecOutcome::Fatal(format!(
                            "state snapshot failed after fill {}: {e}",
                            receipt.order_id
                        ));
                    }
                    event
                };

                self.risk_state.record_trade(Utc::now(), event.realized_pnl);
                let _ = self.store.save_risk_state(&self.risk_state);
                if let Err(e) = self.store.append_trade_event(&event) {
                    warn!("TradeLoop: trade event append failed: {e}");
                }
                self.exec_breaker.record_success().await;
                ExecOutcome::Filled(Box::new(event))
            }
            Err(e) if e.is_transient() => {
                self.exec_breaker.record_failure().await;
                ExecOutcome::UpstreamFailed(e.to_string())
            }
            Err(
                e @ (BrokerError::InsufficientFunds(_)
                | BrokerError::MarketClosed(_)
                | BrokerError::UnknownSymbol(_)),
            ) => ExecOutcome::PolicyDenied(e.to_string()),
            Err(e) => {
                self.exec_breaker.record_failure().await;
                ExecOutcome::Fatal(format!("unexpected broker failure: {e}"))
            }
        }
    }

    fn symbol_backoff_mut(&mut self, symbol: &str) -> &mut Backoff {
        let base = Duration::from_secs(self.config.symbol_backoff_base_secs);
        let cap = Duration::from_secs(self.config.symbol_backoff_cap_secs);
        self.symbol_backoff
            .entry(symbol.to_string())
            .or_insert_with(|| Backoff::new(base, cap))
    }
}
