use crate::application::quotes::{QuoteMetricsSnapshot, QuoteServiceMetrics};
use crate::application::trading::trade_loop::{TradeCounters, TradeCountersSnapshot};
use crate::domain::trading::BrokerState;
use crate::infrastructure::persistence::StateStore;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Snapshot the trader process publishes for the supervisor's HTTP
/// surface. Files are the cross-process medium; the supervisor never
/// shares memory with agents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeLoopSnapshot {
    pub timestamp: DateTime<Utc>,
    pub quote: QuoteMetricsSnapshot,
    pub counters: TradeCountersSnapshot,
    pub cash: Decimal,
    pub equity: Decimal,
    pub open_positions: usize,
    pub test_trade_executed: bool,
}

/// Periodically writes the trade-loop snapshot to
/// `runtime/metrics/trade_loop.json` (atomic replace).
pub struct MetricsReporter {
    store: StateStore,
    state: Arc<RwLock<BrokerState>>,
    quote_metrics: Arc<QuoteServiceMetrics>,
    counters: Arc<TradeCounters>,
    interval: Duration,
}

impl MetricsReporter {
    pub fn new(
        store: StateStore,
        state: Arc<RwLock<BrokerState>>,
        quote_metrics: Arc<QuoteServiceMetrics>,
        counters: Arc<TradeCounters>,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            state,
            quote_metrics,
            counters,
            interval,
        }
    }

    pub async fn snapshot(&self) -> TradeLoopSnapshot {
        let state = self.state.read().await;
        TradeLoopSnapshot {
            timestamp: Utc::now(),
            quote: self.quote_metrics.snapshot(),
            counters: self.counters.snapshot(),
            cash: state.cash,
            equity: state.equity_cached,
            open_positions: state.positions.len(),
            test_trade_executed: state.test_trade_executed,
        }
    }

    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let snapshot = self.snapshot().await;
            let path = self.store.paths().trade_loop_metrics();
            match self.store.write_json(&path, &snapshot) {
                Ok(()) => debug!("MetricsReporter: snapshot written"),
                Err(e) => warn!("MetricsReporter: snapshot write failed: {e}"),
            }
        }
    }
}
