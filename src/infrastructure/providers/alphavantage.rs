use crate::domain::errors::ProviderError;
use crate::domain::ports::QuoteProvider;
use crate::domain::quote::{Quote, QuoteSource};
use crate::domain::symbol::SymbolClass;
use async_trait::async_trait;
use reqwest_middleware::ClientWithMiddleware;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;
use url::Url;

const BASE_URL: &str = "https://www.alphavantage.co";

pub struct AlphaVantageProvider {
    client: ClientWithMiddleware,
    api_key: String,
    base_url: String,
}

/// Equity endpoint payload (`GLOBAL_QUOTE`). The free tier signals rate
/// limiting with a 200 body containing only a `Note`.
#[derive(Debug, Deserialize)]
struct GlobalQuoteResponse {
    #[serde(rename = "Global Quote")]
    quote: Option<GlobalQuote>,
    #[serde(rename = "Note")]
    note: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GlobalQuote {
    #[serde(rename = "05. price")]
    price: String,
}

/// Crypto endpoint payload (`CURRENCY_EXCHANGE_RATE`).
#[derive(Debug, Deserialize)]
struct ExchangeRateResponse {
    #[serde(rename = "Realtime Currency Exchange Rate")]
    rate: Option<ExchangeRate>,
    #[serde(rename = "Note")]
    note: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ExchangeRate {
    #[serde(rename = "5. Exchange Rate")]
    rate: String,
}

impl AlphaVantageProvider {
    pub fn new(client: ClientWithMiddleware, api_key: String) -> Self {
        Self {
            client,
            api_key,
            base_url: BASE_URL.to_string(),
        }
    }

    fn parse_price(symbol: &str, raw: &str) -> Result<Decimal, ProviderError> {
        Decimal::from_str(raw)
            .map_err(|e| ProviderError::InvalidPayload(format!("{symbol} price {raw}: {e}")))
    }
}

#[async_trait]
impl QuoteProvider for AlphaVantageProvider {
    fn source(&self) -> QuoteSource {
        QuoteSource::AlphaVantage
    }

    async fn fetch(&self, symbol: &str) -> Result<Quote, ProviderError> {
        let endpoint = format!("{}/query", self.base_url);
        let url = match SymbolClass::of(symbol) {
            SymbolClass::Equity => Url::parse_with_params(
                &endpoint,
                &[
                    ("function", "GLOBAL_QUOTE"),
                    ("symbol", symbol),
                    ("apikey", self.api_key.as_str()),
                ],
            ),
            SymbolClass::Crypto => Url::parse_with_params(
                &endpoint,
                &[
                    ("function", "CURRENCY_EXCHANGE_RATE"),
                    ("from_currency", symbol.trim_end_matches("-USD")),
                    ("to_currency", "USD"),
                    ("apikey", self.api_key.as_str()),
                ],
            ),
        }
        .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(super::map_request_error)?;
        super::check_status(response.status())?;

        let price = match SymbolClass::of(symbol) {
            SymbolClass::Equity => {
                let payload: GlobalQuoteResponse = response
                    .json()
                    .await
                    .map_err(|e| ProviderError::InvalidPayload(e.to_string()))?;
                if payload.note.is_some() {
                    return Err(ProviderError::RateLimited);
                }
                let quote = payload
                    .quote
                    .ok_or_else(|| ProviderError::NoData(symbol.to_string()))?;
                Self::parse_price(symbol, &quote.price)?
            }
            SymbolClass::Crypto => {
                let payload: ExchangeRateResponse = response
                    .json()
                    .await
                    .map_err(|e| ProviderError::InvalidPayload(e.to_string()))?;
                if payload.note.is_some() {
                    return Err(ProviderError::RateLimited);
                }
                let rate = payload
                    .rate
                    .ok_or_else(|| ProviderError::NoData(symbol.to_string()))?;
                Self::parse_price(symbol, &rate.rate)?
            }
        };

        Quote::new(symbol, price, QuoteSource::AlphaVantage)
            .map_err(|_| ProviderError::NoData(symbol.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_global_quote() {
        let body = r#"{"Global Quote":{"01. symbol":"SPY","05. price":"512.3400","07. latest trading day":"2025-01-03"}}"#;
        let payload: GlobalQuoteResponse = serde_json::from_str(body).unwrap();
        assert_eq!(payload.quote.unwrap().price, "512.3400");
    }

    #[test]
    fn parses_exchange_rate() {
        let body = r#"{"Realtime Currency Exchange Rate":{"1. From_Currency Code":"BTC","5. Exchange Rate":"107000.00000000"}}"#;
        let payload: ExchangeRateResponse = serde_json::from_str(body).unwrap();
        assert_eq!(payload.rate.unwrap().rate, "107000.00000000");
    }

    #[test]
    fn note_only_body_means_rate_limited() {
        let body = r#"{"Note":"Thank you for using Alpha Vantage! Our standard API rate limit is 25 requests per day."}"#;
        let payload: GlobalQuoteResponse = serde_json::from_str(body).unwrap();
        assert!(payload.quote.is_none());
        assert!(payload.note.is_some());
    }
}
