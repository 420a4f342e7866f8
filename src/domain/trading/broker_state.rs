use crate::domain::trading::types::{OrderReceipt, OrderSide};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// An open position. `qty` may be negative for a short. A position whose
/// quantity reaches zero is removed from the book entirely; readers never
/// see a zero-qty entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub qty: Decimal,
    pub avg_price: Decimal,
    #[serde(default)]
    pub last_trade_at: Option<DateTime<Utc>>,
}

impl Position {
    pub fn flat(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            qty: Decimal::ZERO,
            avg_price: Decimal::ZERO,
            last_trade_at: None,
        }
    }

    pub fn is_flat(&self) -> bool {
        self.qty.is_zero()
    }
}

/// Durable account state for one trading agent. Single writer (the trade
/// loop), snapshotted to disk after every mutation. Maps are ordered so a
/// reload/reserialize round trip is byte-identical.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerState {
    pub cash: Decimal,
    pub positions: BTreeMap<String, Position>,
    /// Marks from the freshest observed quotes, used for equity. Never
    /// computed from `avg_price` for drawdown purposes.
    pub last_prices: BTreeMap<String, Decimal>,
    pub equity_cached: Decimal,
    #[serde(default)]
    pub test_trade_executed: bool,
}

impl BrokerState {
    pub fn new(initial_cash: Decimal) -> Self {
        Self {
            cash: initial_cash,
            positions: BTreeMap::new(),
            last_prices: BTreeMap::new(),
            equity_cached: initial_cash,
            test_trade_executed: false,
        }
    }

    /// Position for a symbol; a flat record when absent. Readers must not
    /// distinguish "no position" from "zero position".
    pub fn position(&self, symbol: &str) -> Position {
        self.positions
            .get(symbol)
            .cloned()
            .unwrap_or_else(|| Position::flat(symbol))
    }

    pub fn last_trade_at(&self, symbol: &str) -> Option<DateTime<Utc>> {
        self.positions.get(symbol).and_then(|p| p.last_trade_at)
    }

    /// Current market value of a position at the last known price.
    pub fn position_value(&self, symbol: &str) -> Decimal {
        let pos = match self.positions.get(symbol) {
            Some(p) => p,
            None => return Decimal::ZERO,
        };
        let mark = self
            .last_prices
            .get(symbol)
            .copied()
            .unwrap_or(pos.avg_price);
        pos.qty * mark
    }

    /// Record a freshly observed price and refresh the cached equity.
    pub fn observe_price(&mut self, symbol: &str, price: Decimal) {
        if price <= Decimal::ZERO {
            return;
        }
        self.last_prices.insert(symbol.to_string(), price);
        self.equity_cached = self.equity();
    }

    /// `cash + Σ qty × last_known_price`.
    pub fn equity(&self) -> Decimal {
        let held: Decimal = self
            .positions
            .keys()
            .map(|s| self.position_value(s))
            .sum();
        self.cash + held
    }

    /// Apply a fill to cash and the position book.
    ///
    /// Same-side adds use the weighted-average rule; opposite-side fills
    /// realize P&L at `(fill - avg) × closed_qty`; a full close deletes
    /// the record. Returns the realized P&L of this fill.
    pub fn apply_fill(&mut self, receipt: &OrderReceipt) -> Decimal {
        let signed_qty = match receipt.side {
            OrderSide::Buy => receipt.qty,
            OrderSide::Sell => -receipt.qty,
        };
        let price = receipt.fill_price;
        self.cash -= signed_qty * price;

        let mut pos = self.position(&receipt.symbol);
        let old_qty = pos.qty;
        let new_qty = old_qty + signed_qty;
        let mut realized = Decimal::ZERO;

        if old_qty.is_zero() {
            pos.qty = signed_qty;
            pos.avg_price = price;
        } else if (old_qty > Decimal::ZERO) == (signed_qty > Decimal::ZERO) {
            // Adding to the same side.
            pos.avg_price = (old_qty * pos.avg_price + signed_qty * price) / new_qty;
            pos.qty = new_qty;
        } else {
            let closed = signed_qty.abs().min(old_qty.abs());
            realized = if old_qty > Decimal::ZERO {
                (price - pos.avg_price) * closed
            } else {
                (pos.avg_price - price) * closed
            };
            pos.qty = new_qty;
            if !new_qty.is_zero() && (new_qty > Decimal::ZERO) != (old_qty > Decimal::ZERO) {
                // Flipped through zero; remainder opens at the fill price.
                pos.avg_price = price;
            }
        }

        pos.last_trade_at = Some(receipt.submitted_at);

        if pos.is_flat() {
            self.positions.remove(&receipt.symbol);
        } else {
            self.positions.insert(receipt.symbol.clone(), pos);
        }

        // The fill price is itself a last known price.
        self.last_prices.insert(receipt.symbol.clone(), price);
        self.equity_cached = self.equity();
        realized
    }

    /// Sanity checks applied when a snapshot is loaded from disk.
    pub fn validate(&self) -> Result<(), String> {
        for (symbol, pos) in &self.positions {
            if pos.qty.is_zero() {
                return Err(format!("position {symbol} persisted with qty == 0"));
            }
            if pos.avg_price <= Decimal::ZERO {
                return Err(format!("position {symbol} has non-positive avg_price"));
            }
            if symbol != &pos.symbol {
                return Err(format!("position key {symbol} != record symbol {}", pos.symbol));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn receipt(symbol: &str, side: OrderSide, qty: Decimal, price: Decimal) -> OrderReceipt {
        OrderReceipt {
            order_id: Uuid::new_v4(),
            symbol: symbol.to_string(),
            side,
            qty,
            fill_price: price,
            fill_price_source: crate::domain::trading::types::FillPriceSource::QuoteMid,
            submitted_at: Utc::now(),
        }
    }

    #[test]
    fn buy_decrements_cash_and_opens_position() {
        let mut state = BrokerState::new(dec!(100000));
        state.apply_fill(&receipt("BTC-USD", OrderSide::Buy, dec!(0.0327), dec!(107000)));

        assert_eq!(state.cash, dec!(100000) - dec!(0.0327) * dec!(107000));
        assert_eq!(state.position("BTC-USD").qty, dec!(0.0327));
        assert_eq!(state.position("BTC-USD").avg_price, dec!(107000));
    }

    #[test]
    fn same_side_add_uses_weighted_average() {
        let mut state = BrokerState::new(dec!(10000));
        state.apply_fill(&receipt("SPY", OrderSide::Buy, dec!(10), dec!(100)));
        state.apply_fill(&receipt("SPY", OrderSide::Buy, dec!(10), dec!(110)));

        assert_eq!(state.position("SPY").qty, dec!(20));
        assert_eq!(state.position("SPY").avg_price, dec!(105));
    }

    #[test]
    fn opposite_side_realizes_pnl() {
        let mut state = BrokerState::new(dec!(10000));
        state.apply_fill(&receipt("SPY", OrderSide::Buy, dec!(10), dec!(100)));
        let pnl = state.apply_fill(&receipt("SPY", OrderSide::Sell, dec!(4), dec!(110)));

        assert_eq!(pnl, dec!(40));
        assert_eq!(state.position("SPY").qty, dec!(6));
        // Average is untouched by a partial close.
        assert_eq!(state.position("SPY").avg_price, dec!(100));
    }

    #[test]
    fn full_close_deletes_the_record() {
        let mut state = BrokerState::new(dec!(10000));
        state.apply_fill(&receipt("SPY", OrderSide::Buy, dec!(10), dec!(100)));
        state.apply_fill(&receipt("SPY", OrderSide::Sell, dec!(10), dec!(90)));

        assert!(!state.positions.contains_key("SPY"));
        // Readers see a flat record, indistinguishable from never-held.
        assert!(state.position("SPY").is_flat());
    }

    #[test]
    fn short_close_realizes_inverted_pnl() {
        let mut state = BrokerState::new(dec!(10000));
        state.apply_fill(&receipt("SPY", OrderSide::Sell, dec!(5), dec!(100)));
        assert_eq!(state.position("SPY").qty, dec!(-5));

        let pnl = state.apply_fill(&receipt("SPY", OrderSide::Buy, dec!(5), dec!(90)));
        assert_eq!(pnl, dec!(50));
        assert!(state.position("SPY").is_flat());
    }

    #[test]
    fn equity_tracks_cash_plus_marks() {
        let mut state = BrokerState::new(dec!(1000));
        state.apply_fill(&receipt("SPY", OrderSide::Buy, dec!(5), dec!(100)));
        assert_eq!(state.equity(), dec!(1000));

        state.observe_price("SPY", dec!(120));
        assert_eq!(state.equity(), dec!(500) + dec!(5) * dec!(120));
        assert_eq!(state.equity_cached, state.equity());
    }

    #[test]
    fn reload_then_reserialize_is_identical() {
        let mut state = BrokerState::new(dec!(50000));
        state.apply_fill(&receipt("BTC-USD", OrderSide::Buy, dec!(0.5), dec!(107000)));
        state.apply_fill(&receipt("SPY", OrderSide::Buy, dec!(10), dec!(500)));

        let first = serde_json::to_string_pretty(&state).unwrap();
        let reloaded: BrokerState = serde_json::from_str(&first).unwrap();
        let second = serde_json::to_string_pretty(&reloaded).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn validate_rejects_zero_qty_entries() {
        let mut state = BrokerState::new(dec!(1000));
        state.positions.insert(
            "SPY".to_string(),
            Position {
                symbol: "SPY".to_string(),
                qty: Decimal::ZERO,
                avg_price: dec!(100),
                last_trade_at: None,
            },
        );
        assert!(state.validate().is_err());
    }
}
