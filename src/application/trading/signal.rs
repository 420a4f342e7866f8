use crate::domain::symbol::SymbolClass;
use crate::domain::trading::types::Signal;
use std::collections::HashMap;
use ta::Next;
use ta::indicators::{RelativeStrengthIndex, SimpleMovingAverage};
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct SignalConfig {
    pub fast_sma_period: usize,
    pub slow_sma_period: usize,
    /// Relative divergence the fast average must show over the slow one.
    pub sma_threshold: f64,
    pub rsi_period: usize,
    pub rsi_overbought: f64,
    /// Bootstrap rule: a 24/7 instrument with no position and an RSI
    /// below the overbought threshold gets a forced BUY, so a universe of
    /// SELL votes cannot deadlock an empty book.
    pub cold_start_override: bool,
}

/// Per-symbol strategy evaluation over a rolling window of observed
/// prices. One instance per trade loop; histories are keyed by symbol.
pub struct SignalEngine {
    config: SignalConfig,
    histories: HashMap<String, Vec<f64>>,
    capacity: usize,
}

impl SignalEngine {
    pub fn new(config: SignalConfig) -> Self {
        let capacity = config
            .slow_sma_period
            .max(config.rsi_period + 1)
            .max(2)
            * 2;
        Self {
            config,
            histories: HashMap::new(),
            capacity,
        }
    }

    pub fn observe(&mut self, symbol: &str, price: f64) {
        if !price.is_finite() || price <= 0.0 {
            return;
        }
        let history = self.histories.entry(symbol.to_string()).or_default();
        history.push(price);
        let capacity = self.capacity;
        if history.len() > capacity {
            history.drain(..history.len() - capacity);
        }
    }

    fn rsi(&self, history: &[f64]) -> Option<f64> {
        if history.len() <= self.config.rsi_period {
            return None;
        }
        let mut rsi = RelativeStrengthIndex::new(self.config.rsi_period).ok()?;
        let mut value = 50.0;
        for price in history {
            value = rsi.next(*price);
        }
        // A perfectly flat series divides 0 gains by 0 losses; treat the
        // NaN as "no reading" rather than letting it poison comparisons.
        Some(value).filter(|v| v.is_finite())
    }

    fn sma(&self, history: &[f64], period: usize) -> Option<f64> {
        if history.len() < period {
            return None;
        }
        let mut sma = SimpleMovingAverage::new(period).ok()?;
        let mut value = 0.0;
        for price in history {
            value = sma.next(*price);
        }
        Some(value)
    }

    /// One vote per symbol per tick.
    pub fn evaluate(&mut self, symbol: &str, has_position: bool) -> Signal {
        let history = self
            .histories
            .get(symbol)
            .cloned()
            .unwrap_or_default();

        let rsi = self.rsi(&history);

        // The cold-start override is checked first: without it a fresh
        // book sees SELL/HOLD votes forever and never trades. An unknown
        // RSI counts as neutral for the same reason.
        if self.config.cold_start_override
            && SymbolClass::of(symbol) == SymbolClass::Crypto
            && !has_position
            && rsi.unwrap_or(50.0) < self.config.rsi_overbought
        {
            info!(
                "SignalEngine: cold-start BUY override for {} (rsi: {:?})",
                symbol, rsi
            );
            return Signal::Buy;
        }

        let fast = self.sma(&history, self.config.fast_sma_period);
        let slow = self.sma(&history, self.config.slow_sma_period);
        let (fast, slow) = match (fast, slow) {
            (Some(f), Some(s)) if s > 0.0 => (f, s),
            _ => {
                debug!("SignalEngine: insufficient history for {symbol}, holding");
                return Signal::Hold;
            }
        };

        let divergence = (fast - slow) / slow;
        if divergence > self.config.sma_threshold {
            // Overbought damping only applies to fresh longs.
            if rsi.is_some_and(|r| r >= self.config.rsi_overbought) {
                debug!("SignalEngine: {symbol} overbought, damping BUY to HOLD");
                return Signal::Hold;
            }
            Signal::Buy
        } else if divergence < -self.config.sma_threshold {
            Signal::Sell
        } else {
            Signal::Hold
        }
    }
}
