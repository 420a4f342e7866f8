use crate::domain::errors::{BrokerError, ProviderError};
use crate::domain::quote::{Quote, QuoteSource};
use crate::domain::trading::broker_state::Position;
use crate::domain::trading::types::{OrderReceipt, OrderRequest};
use async_trait::async_trait;
use rust_decimal::Decimal;

/// A single upstream quote source. Providers are constructed into a
/// priority list at startup; the quote service owns fallback, backoff and
/// caching on top of them.
#[async_trait]
pub trait QuoteProvider: Send + Sync {
    fn source(&self) -> QuoteSource;

    async fn fetch(&self, symbol: &str) -> Result<Quote, ProviderError>;
}

/// Narrow capability contract over an upstream broker or the built-in
/// paper simulator.
#[async_trait]
pub trait Broker: Send + Sync {
    async fn fetch_quote(&self, symbol: &str) -> Result<Quote, BrokerError>;

    async fn submit_order(&self, order: OrderRequest) -> Result<OrderReceipt, BrokerError>;

    /// Returns a zero-qty record when no position is held.
    async fn get_position(&self, symbol: &str) -> Result<Position, BrokerError>;

    async fn get_cash(&self) -> Result<Decimal, BrokerError>;

    async fn get_equity(&self) -> Result<Decimal, BrokerError>;
}
