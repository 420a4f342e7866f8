use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

/// Per-symbol strategy vote for one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Buy,
    Sell,
    Hold,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Signal::Buy => write!(f, "BUY"),
            Signal::Sell => write!(f, "SELL"),
            Signal::Hold => write!(f, "HOLD"),
        }
    }
}

/// An order handed to the broker adapter. `qty` is always positive;
/// direction is carried by `side`.
#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub qty: Decimal,
    pub limit_price: Option<Decimal>,
}

/// Where the paper simulator took its fill price from. Logged per trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FillPriceSource {
    QuoteMid,
    LastPrice,
    AvgPrice,
}

impl fmt::Display for FillPriceSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FillPriceSource::QuoteMid => write!(f, "quote_mid"),
            FillPriceSource::LastPrice => write!(f, "last_price"),
            FillPriceSource::AvgPrice => write!(f, "avg_price"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderReceipt {
    pub order_id: Uuid,
    pub symbol: String,
    pub side: OrderSide,
    pub qty: Decimal,
    pub fill_price: Decimal,
    pub fill_price_source: FillPriceSource,
    pub submitted_at: DateTime<Utc>,
}

/// Emitted after every executed trade; append-persisted for audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeEvent {
    pub receipt: OrderReceipt,
    pub realized_pnl: Decimal,
    pub cash_after: Decimal,
    pub equity_after: Decimal,
}
