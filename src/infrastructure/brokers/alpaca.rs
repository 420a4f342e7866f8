use crate::domain::errors::BrokerError;
use crate::domain::ports::Broker;
use crate::domain::quote::{Quote, QuoteSource};
use crate::domain::symbol::SymbolClass;
use crate::domain::trading::Position;
use crate::domain::trading::types::{FillPriceSource, OrderReceipt, OrderRequest, OrderSide};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::StatusCode;
use reqwest_middleware::ClientWithMiddleware;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use url::Url;
use uuid::Uuid;

/// REST adapter over the Alpaca trading and data APIs. All upstream
/// failures are wrapped into the documented `BrokerError` kinds; nothing
/// Alpaca-specific escapes this module.
pub struct AlpacaBroker {
    client: ClientWithMiddleware,
    api_key: String,
    api_secret: String,
    base_url: String,
    data_url: String,
}

#[derive(Debug, Serialize)]
struct AlpacaOrderBody {
    symbol: String,
    qty: String,
    side: &'static str,
    #[serde(rename = "type")]
    order_type: &'static str,
    time_in_force: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    limit_price: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AlpacaOrder {
    id: String,
    #[serde(default)]
    filled_avg_price: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AlpacaPosition {
    qty: String,
    avg_entry_price: String,
}

#[derive(Debug, Deserialize)]
struct AlpacaAccount {
    cash: String,
    equity: String,
}

#[derive(Debug, Deserialize)]
struct StockQuoteEnvelope {
    quote: AlpacaQuote,
}

#[derive(Debug, Deserialize)]
struct CryptoQuoteEnvelope {
    quotes: std::collections::HashMap<String, AlpacaQuote>,
}

#[derive(Debug, Deserialize)]
struct AlpacaQuote {
    #[serde(default)]
    bp: f64,
    #[serde(default)]
    ap: f64,
}

impl AlpacaBroker {
    pub fn new(
        client: ClientWithMiddleware,
        api_key: String,
        api_secret: String,
        base_url: String,
        data_url: String,
    ) -> Self {
        Self {
            client,
            api_key,
            api_secret,
            base_url,
            data_url,
        }
    }

    /// Alpaca crypto endpoints use slash pairs.
    fn upstream_symbol(symbol: &str) -> String {
        match SymbolClass::of(symbol) {
            SymbolClass::Crypto => symbol.replace('-', "/"),
            SymbolClass::Equity => symbol.to_string(),
        }
    }

    fn request(
        &self,
        method: reqwest::Method,
        url: Url,
    ) -> reqwest_middleware::RequestBuilder {
        self.client
            .request(method, url)
            .header("APCA-API-KEY-ID", &self.api_key)
            .header("APCA-API-SECRET-KEY", &self.api_secret)
    }

    fn transport_err(e: reqwest_middleware::Error) -> BrokerError {
        BrokerError::UpstreamUnavailable(e.to_string())
    }

    /// Map an upstream status into the documented error kinds. Body text
    /// is carried only as human-readable detail.
    async fn check_status(
        symbol: &str,
        response: reqwest::Response,
    ) -> Result<reqwest::Response, BrokerError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(match status {
            StatusCode::TOO_MANY_REQUESTS => BrokerError::RateLimited(body),
            StatusCode::FORBIDDEN if body.contains("buying power") => {
                BrokerError::InsufficientFunds(body)
            }
            StatusCode::UNPROCESSABLE_ENTITY if body.contains("not found") => {
                BrokerError::UnknownSymbol(symbol.to_string())
            }
            StatusCode::NOT_FOUND => BrokerError::UnknownSymbol(symbol.to_string()),
            StatusCode::FORBIDDEN | StatusCode::UNPROCESSABLE_ENTITY => {
                BrokerError::UpstreamRejected(body)
            }
            s if s.as_u16() == 425 => BrokerError::MarketClosed(symbol.to_string()),
            _ => BrokerError::UpstreamUnavailable(format!("status {status}: {body}")),
        })
    }

    fn parse_decimal(field: &str, raw: &str) -> Result<Decimal, BrokerError> {
        Decimal::from_str(raw).map_err(|e| {
            BrokerError::UpstreamUnavailable(format!("unparseable {field} '{raw}': {e}"))
        })
    }
}

#[async_trait]
impl Broker for AlpacaBroker {
    async fn fetch_quote(&self, symbol: &str) -> Result<Quote, BrokerError> {
        let upstream = Self::upstream_symbol(symbol);
        let quote = match SymbolClass::of(symbol) {
            SymbolClass::Equity => {
                let url = Url::parse(&format!(
                    "{}/v2/stocks/{}/quotes/latest",
                    self.data_url, upstream
                ))
                .map_err(|e| BrokerError::UpstreamUnavailable(e.to_string()))?;
                let response = self
                    .request(reqwest::Method::GET, url)
                    .send()
                    .await
                    .map_err(Self::transport_err)?;
                let envelope: StockQuoteEnvelope = Self::check_status(symbol, response)
                    .await?
                    .json()
                    .await
                    .map_err(|e| BrokerError::UpstreamUnavailable(e.to_string()))?;
                envelope.quote
            }
            SymbolClass::Crypto => {
                let url = Url::parse_with_params(
                    &format!("{}/v1beta3/crypto/us/latest/quotes", self.data_url),
                    &[("symbols", upstream.as_str())],
                )
                .map_err(|e| BrokerError::UpstreamUnavailable(e.to_string()))?;
                let response = self
                    .request(reqwest::Method::GET, url)
                    .send()
                    .await
                    .map_err(Self::transport_err)?;
                let mut envelope: CryptoQuoteEnvelope = Self::check_status(symbol, response)
                    .await?
                    .json()
                    .await
                    .map_err(|e| BrokerError::UpstreamUnavailable(e.to_string()))?;
                envelope
                    .quotes
                    .remove(&upstream)
                    .ok_or_else(|| BrokerError::UnknownSymbol(symbol.to_string()))?
            }
        };

        use rust_decimal::prelude::FromPrimitive;
        let bid = Decimal::from_f64(quote.bp).filter(|b| *b > Decimal::ZERO);
        let ask = Decimal::from_f64(quote.ap).filter(|a| *a > Decimal::ZERO);
        let last = match (bid, ask) {
            (Some(b), Some(a)) => (b + a) / Decimal::TWO,
            (Some(b), None) => b,
            (None, Some(a)) => a,
            (None, None) => {
                return Err(BrokerError::UpstreamUnavailable(format!(
                    "empty book for {symbol}"
                )));
            }
        };

        Quote::new(symbol, last, QuoteSource::Broker)
            .map(|q| q.with_book(bid, ask))
            .map_err(|e| BrokerError::UpstreamUnavailable(e.to_string()))
    }

    async fn submit_order(&self, order: OrderRequest) -> Result<OrderReceipt, BrokerError> {
        if order.qty <= Decimal::ZERO {
            return Err(BrokerError::UpstreamRejected(format!(
                "non-positive qty {} for {}",
                order.qty, order.symbol
            )));
        }

        let url = Url::parse(&format!("{}/v2/orders", self.base_url))
            .map_err(|e| BrokerError::UpstreamUnavailable(e.to_string()))?;
        let body = AlpacaOrderBody {
            symbol: Self::upstream_symbol(&order.symbol),
            qty: order.qty.to_string(),
            side: match order.side {
                OrderSide::Buy => "buy",
                OrderSide::Sell => "sell",
            },
            order_type: if order.limit_price.is_some() {
                "limit"
            } else {
                "market"
            },
            time_in_force: "gtc",
            limit_price: order.limit_price.map(|p| p.to_string()),
        };

        let response = self
            .request(reqwest::Method::POST, url)
            .json(&body)
            .send()
            .await
            .map_err(Self::transport_err)?;
        let placed: AlpacaOrder = Self::check_status(&order.symbol, response)
            .await?
            .json()
            .await
            .map_err(|e| BrokerError::UpstreamUnavailable(e.to_string()))?;

        // Market orders may not report a fill immediately; fall back to
        // the latest book so the local mirror stays close to reality.
        let (fill_price, fill_price_source) = match placed.filled_avg_price.as_deref() {
            Some(raw) => (Self::parse_decimal("filled_avg_price", raw)?, FillPriceSource::QuoteMid),
            None => {
                let quote = self.fetch_quote(&order.symbol).await?;
                (quote.mid(), FillPriceSource::LastPrice)
            }
        };

        Ok(OrderReceipt {
            order_id: Uuid::parse_str(&placed.id).unwrap_or_else(|_| Uuid::new_v4()),
            symbol: order.symbol,
            side: order.side,
            qty: order.qty,
            fill_price,
            fill_price_source,
            submitted_at: Utc::now(),
        })
    }

    async fn get_position(&self, symbol: &str) -> Result<Position, BrokerError> {
        let url = Url::parse(&format!(
            "{}/v2/positions/{}",
            self.base_url,
            Self::upstream_symbol(symbol)
        ))
        .map_err(|e| BrokerError::UpstreamUnavailable(e.to_string()))?;

        let response = self
            .request(reqwest::Method::GET, url)
            .send()
            .await
            .map_err(Self::transport_err)?;

        // A missing position is a flat record, not an error.
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Position::flat(symbol));
        }

        let position: AlpacaPosition = Self::check_status(symbol, response)
            .await?
            .json()
            .await
            .map_err(|e| BrokerError::UpstreamUnavailable(e.to_string()))?;

        Ok(Position {
            symbol: symbol.to_string(),
            qty: Self::parse_decimal("qty", &position.qty)?,
            avg_price: Self::parse_decimal("avg_entry_price", &position.avg_entry_price)?,
            last_trade_at: None,
        })
    }

    async fn get_cash(&self) -> Result<Decimal, BrokerError> {
        let account = self.account().await?;
        Self::parse_decimal("cash", &account.cash)
    }

    async fn get_equity(&self) -> Result<Decimal, BrokerError> {
        let account = self.account().await?;
        Self::parse_decimal("equity", &account.equity)
    }
}

impl AlpacaBroker {
    async fn account(&self) -> Result<AlpacaAccount, BrokerError> {
        let url = Url::parse(&format!("{}/v2/account", self.base_url))
            .map_err(|e| BrokerError::UpstreamUnavailable(e.to_string()))?;
        let response = self
            .request(reqwest::Method::GET, url)
            .send()
            .await
            .map_err(Self::transport_err)?;
        Self::check_status("account", response)
            .await?
            .json()
            .await
            .map_err(|e| BrokerError::UpstreamUnavailable(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crypto_symbols_map_to_slash_pairs() {
        assert_eq!(AlpacaBroker::upstream_symbol("BTC-USD"), "BTC/USD");
        assert_eq!(AlpacaBroker::upstream_symbol("AAPL"), "AAPL");
    }

    #[test]
    fn parses_order_payload() {
        let order: AlpacaOrder = serde_json::from_str(
            r#"{"id":"61e69015-8549-4bfd-b9c3-01e75843f47d","status":"filled","filled_avg_price":"107000.25"}"#,
        )
        .unwrap();
        assert_eq!(order.filled_avg_price.as_deref(), Some("107000.25"));
    }

    #[test]
    fn parses_account_payload() {
        let account: AlpacaAccount =
            serde_json::from_str(r#"{"cash":"100000","equity":"103500.50","buying_power":"200000"}"#)
                .unwrap();
        assert_eq!(account.cash, "100000");
        assert_eq!(account.equity, "103500.50");
    }

    #[test]
    fn parses_crypto_quote_envelope() {
        let envelope: CryptoQuoteEnvelope = serde_json::from_str(
            r#"{"quotes":{"BTC/USD":{"ap":107010.0,"bp":106990.0,"as":0.5,"bs":0.4}}}"#,
        )
        .unwrap();
        assert_eq!(envelope.quotes["BTC/USD"].ap, 107010.0);
    }
}
