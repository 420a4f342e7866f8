use crate::domain::risk::RiskState;
use crate::domain::symbol::SymbolClass;
use crate::domain::trading::BrokerState;
use chrono::{DateTime, Utc};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RiskGateConfig {
    /// Daily realized+unrealized loss as a fraction of day-open equity.
    pub max_daily_loss_pct: f64,
    pub max_trades_per_day: u32,
    pub max_drawdown_pct: f64,
    /// Manual halt file; presence alone rejects all trades.
    pub halt_path: PathBuf,
}

/// Structured reason a trade was rejected. These are normal control-flow
/// outcomes: logged at info level, never counted as failures.
#[derive(Debug, Clone, PartialEq)]
pub enum DenyReason {
    DailyLossLimit { loss_fraction: f64, limit: f64 },
    TradeCountCap { count: u32, cap: u32 },
    ManualHalt,
    Cooldown { symbol: String, remaining: Duration },
    DrawdownCeiling { drawdown: f64, limit: f64 },
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenyReason::DailyLossLimit { loss_fraction, limit } => write!(
                f,
                "daily loss {:.2}% exceeds limit {:.2}%",
                loss_fraction * 100.0,
                limit * 100.0
            ),
            DenyReason::TradeCountCap { count, cap } => {
                write!(f, "daily trade count {count} at cap {cap}")
            }
            DenyReason::ManualHalt => write!(f, "manual halt file present"),
            DenyReason::Cooldown { symbol, remaining } => {
                write!(f, "{symbol} under cooldown for {remaining:?}")
            }
            DenyReason::DrawdownCeiling { drawdown, limit } => write!(
                f,
                "drawdown {:.2}% exceeds ceiling {:.2}%",
                drawdown * 100.0,
                limit * 100.0
            ),
        }
    }
}

/// Synchronous pre-trade validation. Pure over its inputs apart from the
/// halt-file existence probe.
pub struct RiskGate {
    config: RiskGateConfig,
}

impl RiskGate {
    pub fn new(config: RiskGateConfig) -> Self {
        Self { config }
    }

    pub fn evaluate(
        &self,
        symbol: &str,
        broker_state: &BrokerState,
        risk_state: &RiskState,
        now: DateTime<Utc>,
    ) -> Result<(), DenyReason> {
        if self.config.halt_path.exists() {
            return Err(DenyReason::ManualHalt);
        }

        let equity = broker_state.equity_cached;

        let loss_fraction = risk_state.daily_loss_fraction(equity);
        if loss_fraction > self.config.max_daily_loss_pct {
            return Err(DenyReason::DailyLossLimit {
                loss_fraction,
                limit: self.config.max_daily_loss_pct,
            });
        }

        if risk_state.trades_today >= self.config.max_trades_per_day {
            return Err(DenyReason::TradeCountCap {
                count: risk_state.trades_today,
                cap: self.config.max_trades_per_day,
            });
        }

        if let Some(last) = broker_state.last_trade_at(symbol) {
            let cooldown = SymbolClass::of(symbol).cooldown();
            let elapsed = now
                .signed_duration_since(last)
                .to_std()
                .unwrap_or(Duration::ZERO);
            if elapsed < cooldown {
                return Err(DenyReason::Cooldown {
                    symbol: symbol.to_string(),
                    remaining: cooldown - elapsed,
                });
            }
        }

        let drawdown = risk_state.drawdown_fraction(equity);
        if drawdown > self.config.max_drawdown_pct {
            return Err(DenyReason::DrawdownCeiling {
                drawdown,
                limit: self.config.max_drawdown_pct,
            });
        }

        Ok(())
    }
}
