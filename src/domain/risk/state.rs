use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Day-session risk accounting, persisted to `state/risk_state.json`.
///
/// Rolls over when the UTC date changes: the day-open equity resets and
/// the trade counter zeroes, while the high-water mark survives so the
/// drawdown ceiling is measured against all-time peak equity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskState {
    pub reference_date: NaiveDate,
    pub daily_start_equity: Decimal,
    pub equity_high_water_mark: Decimal,
    pub trades_today: u32,
    pub realized_pnl_today: Decimal,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl RiskState {
    pub fn open_day(now: DateTime<Utc>, equity: Decimal) -> Self {
        Self {
            reference_date: now.date_naive(),
            daily_start_equity: equity,
            equity_high_water_mark: equity,
            trades_today: 0,
            realized_pnl_today: Decimal::ZERO,
            updated_at: Some(now),
        }
    }

    /// Reset daily counters on a date boundary. Returns true if a rollover
    /// happened.
    pub fn roll_over_if_new_day(&mut self, now: DateTime<Utc>, equity: Decimal) -> bool {
        if now.date_naive() == self.reference_date {
            return false;
        }
        self.reference_date = now.date_naive();
        self.daily_start_equity = equity;
        self.trades_today = 0;
        self.realized_pnl_today = Decimal::ZERO;
        self.updated_at = Some(now);
        true
    }

    pub fn record_trade(&mut self, now: DateTime<Utc>, realized_pnl: Decimal) {
        self.trades_today += 1;
        self.realized_pnl_today += realized_pnl;
        self.updated_at = Some(now);
    }

    pub fn observe_equity(&mut self, equity: Decimal) {
        if equity > self.equity_high_water_mark {
            self.equity_high_water_mark = equity;
        }
    }

    /// Fraction of day-open equity lost so far today. Positive values are
    /// losses; gains clamp to zero.
    pub fn daily_loss_fraction(&self, current_equity: Decimal) -> f64 {
        use rust_decimal::prelude::ToPrimitive;
        if self.daily_start_equity <= Decimal::ZERO {
            return 0.0;
        }
        let loss = (self.daily_start_equity - current_equity) / self.daily_start_equity;
        loss.to_f64().unwrap_or(0.0).max(0.0)
    }

    /// Current drawdown against the high-water mark.
    pub fn drawdown_fraction(&self, current_equity: Decimal) -> f64 {
        use rust_decimal::prelude::ToPrimitive;
        if self.equity_high_water_mark <= Decimal::ZERO {
            return 0.0;
        }
        let dd = (self.equity_high_water_mark - current_equity) / self.equity_high_water_mark;
        dd.to_f64().unwrap_or(0.0).max(0.0)
    }
}
