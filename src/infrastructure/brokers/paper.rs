use crate::application::quotes::QuoteService;
use crate::domain::errors::BrokerError;
use crate::domain::ports::Broker;
use crate::domain::quote::Quote;
use crate::domain::trading::BrokerState;
use crate::domain::trading::Position;
use crate::domain::trading::types::{FillPriceSource, OrderReceipt, OrderRequest, OrderSide};
use crate::domain::symbol::SymbolClass;
use async_trait::async_trait;
use chrono::{Datelike, Timelike, Utc, Weekday};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Built-in paper simulator.
///
/// Shares the trade loop's `BrokerState` for balance checks; fills are
/// applied to the state by the loop itself (one writer), so submission
/// here only validates and prices the order.
pub struct PaperBroker {
    state: Arc<RwLock<BrokerState>>,
    quotes: Arc<QuoteService>,
    allow_short: bool,
}

impl PaperBroker {
    pub fn new(state: Arc<RwLock<BrokerState>>, quotes: Arc<QuoteService>) -> Self {
        Self {
            state,
            quotes,
            allow_short: false,
        }
    }

    pub fn with_short_selling(mut self, allow: bool) -> Self {
        self.allow_short = allow;
        self
    }

    /// US regular session, UTC. Crypto never closes.
    fn market_open(symbol: &str) -> bool {
        if SymbolClass::of(symbol) == SymbolClass::Crypto {
            return true;
        }
        let now = Utc::now();
        if matches!(now.weekday(), Weekday::Sat | Weekday::Sun) {
            return false;
        }
        let minutes = now.hour() * 60 + now.minute();
        // 14:30-21:00 UTC covers the 9:30-16:00 New York session.
        (14 * 60 + 30..21 * 60).contains(&minutes)
    }

    /// Fill price: mid of a fresh quote, else the last cached price, else
    /// the position's average as a last resort. The choice is logged per
    /// trade by the caller through the receipt.
    async fn fill_price(
        &self,
        symbol: &str,
    ) -> Result<(Decimal, FillPriceSource), BrokerError> {
        if let Some(hit) = self
            .quotes
            .get_quote(symbol, Duration::from_secs(60), false)
            .await
        {
            return Ok((hit.quote().mid(), FillPriceSource::QuoteMid));
        }

        if let Some(cached) = self.quotes.last_cached(symbol).await {
            return Ok((cached.price, FillPriceSource::LastPrice));
        }

        let state = self.state.read().await;
        let pos = state.position(symbol);
        if !pos.is_flat() {
            return Ok((pos.avg_price, FillPriceSource::AvgPrice));
        }

        Err(BrokerError::UpstreamUnavailable(format!(
            "no price available to fill {symbol}"
        )))
    }
}

#[async_trait]
impl Broker for PaperBroker {
    async fn fetch_quote(&self, symbol: &str) -> Result<Quote, BrokerError> {
        self.quotes
            .get_quote(symbol, Duration::from_secs(60), true)
            .await
            .map(|hit| hit.into_quote())
            .ok_or_else(|| {
                BrokerError::UpstreamUnavailable(format!("no quote for {symbol}"))
            })
    }

    async fn submit_order(&self, order: OrderRequest) -> Result<OrderReceipt, BrokerError> {
        if order.qty <= Decimal::ZERO {
            return Err(BrokerError::UpstreamRejected(format!(
                "non-positive qty {} for {}",
                order.qty, order.symbol
            )));
        }
        if !Self::market_open(&order.symbol) {
            return Err(BrokerError::MarketClosed(order.symbol.clone()));
        }

        let (fill_price, source) = self.fill_price(&order.symbol).await?;
        let fill_price = match (order.limit_price, order.side) {
            // A marketable limit caps the simulated fill.
            (Some(limit), OrderSide::Buy) => fill_price.min(limit),
            (Some(limit), OrderSide::Sell) => fill_price.max(limit),
            (None, _) => fill_price,
        };

        {
            let state = self.state.read().await;
            match order.side {
                OrderSide::Buy => {
                    let needed = order.qty * fill_price;
                    if needed > state.cash {
                        return Err(BrokerError::InsufficientFunds(format!(
                            "need {needed}, available {}",
                            state.cash
                        )));
                    }
                }
                OrderSide::Sell => {
                    let held = state.position(&order.symbol).qty;
                    if !self.allow_short && order.qty > held {
                        return Err(BrokerError::UpstreamRejected(format!(
                            "sell {} exceeds held {held} and short selling is disabled",
                            order.qty
                        )));
                    }
                }
            }
        }

        let receipt = OrderReceipt {
            order_id: Uuid::new_v4(),
            symbol: order.symbol.clone(),
            side: order.side,
            qty: order.qty,
            fill_price,
            fill_price_source: source,
            submitted_at: Utc::now(),
        };
        tracing::info!(
            "PaperBroker: filled {} {} {} @ {} (price source: {})",
            receipt.side,
            receipt.qty,
            receipt.symbol,
            receipt.fill_price,
            receipt.fill_price_source
        );
        Ok(receipt)
    }

    async fn get_position(&self, symbol: &str) -> Result<Position, BrokerError> {
        Ok(self.state.read().await.position(symbol))
    }

    async fn get_cash(&self) -> Result<Decimal, BrokerError> {
        Ok(self.state.read().await.cash)
    }

    async fn get_equity(&self) -> Result<Decimal, BrokerError> {
        Ok(self.state.read().await.equity())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::ProviderError;
    use crate::domain::ports::QuoteProvider;
    use crate::domain::quote::QuoteSource;
    use crate::infrastructure::core::{BreakerConfig, CircuitBreaker};
    use rust_decimal_macros::dec;

    struct FixedProvider {
        price: Decimal,
    }

    #[async_trait]
    impl QuoteProvider for FixedProvider {
        fn source(&self) -> QuoteSource {
            QuoteSource::Finnhub
        }

        async fn fetch(&self, symbol: &str) -> Result<Quote, ProviderError> {
            Ok(Quote::new(symbol, self.price, QuoteSource::Finnhub).unwrap())
        }
    }

    struct DeadProvider;

    #[async_trait]
    impl QuoteProvider for DeadProvider {
        fn source(&self) -> QuoteSource {
            QuoteSource::Yahoo
        }

        async fn fetch(&self, symbol: &str) -> Result<Quote, ProviderError> {
            Err(ProviderError::NoData(symbol.to_string()))
        }
    }

    fn quotes(providers: Vec<Arc<dyn QuoteProvider>>) -> Arc<QuoteService> {
        Arc::new(QuoteService::new(
            providers,
            Arc::new(CircuitBreaker::new("QuoteFetch", BreakerConfig::default())),
            Default::default(),
        ))
    }

    fn broker(
        cash: Decimal,
        providers: Vec<Arc<dyn QuoteProvider>>,
    ) -> (PaperBroker, Arc<RwLock<BrokerState>>) {
        let state = Arc::new(RwLock::new(BrokerState::new(cash)));
        let broker = PaperBroker::new(state.clone(), quotes(providers));
        (broker, state)
    }

    #[tokio::test]
    async fn buy_fills_at_quote_price() {
        let (broker, _) = broker(dec!(100000), vec![Arc::new(FixedProvider { price: dec!(107000) })]);

        let receipt = broker
            .submit_order(OrderRequest {
                symbol: "BTC-USD".into(),
                side: OrderSide::Buy,
                qty: dec!(0.03),
                limit_price: None,
            })
            .await
            .unwrap();

        assert_eq!(receipt.fill_price, dec!(107000));
        assert_eq!(receipt.fill_price_source, FillPriceSource::QuoteMid);
    }

    #[tokio::test]
    async fn buy_beyond_cash_is_rejected() {
        let (broker, _) = broker(dec!(100), vec![Arc::new(FixedProvider { price: dec!(107000) })]);

        let err = broker
            .submit_order(OrderRequest {
                symbol: "BTC-USD".into(),
                side: OrderSide::Buy,
                qty: dec!(1),
                limit_price: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::InsufficientFunds(_)));
    }

    #[tokio::test]
    async fn sell_without_position_is_rejected() {
        let (broker, _) = broker(dec!(1000), vec![Arc::new(FixedProvider { price: dec!(50) })]);

        let err = broker
            .submit_order(OrderRequest {
                symbol: "BTC-USD".into(),
                side: OrderSide::Sell,
                qty: dec!(1),
                limit_price: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::UpstreamRejected(_)));
    }

    #[tokio::test]
    async fn fill_price_falls_back_to_avg_price() {
        let (broker, state) = broker(dec!(1000), vec![Arc::new(DeadProvider)]);
        {
            let mut s = state.write().await;
            s.positions.insert(
                "BTC-USD".into(),
                Position {
                    symbol: "BTC-USD".into(),
                    qty: dec!(0.5),
                    avg_price: dec!(90000),
                    last_trade_at: None,
                },
            );
        }

        let receipt = broker
            .submit_order(OrderRequest {
                symbol: "BTC-USD".into(),
                side: OrderSide::Sell,
                qty: dec!(0.5),
                limit_price: None,
            })
            .await
            .unwrap();
        assert_eq!(receipt.fill_price, dec!(90000));
        assert_eq!(receipt.fill_price_source, FillPriceSource::AvgPrice);
    }

    #[tokio::test]
    async fn zero_qty_is_rejected() {
        let (broker, _) = broker(dec!(1000), vec![Arc::new(FixedProvider { price: dec!(50) })]);
        let err = broker
            .submit_order(OrderRequest {
                symbol: "BTC-USD".into(),
                side: OrderSide::Buy,
                qty: Decimal::ZERO,
                limit_price: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::UpstreamRejected(_)));
    }
}
