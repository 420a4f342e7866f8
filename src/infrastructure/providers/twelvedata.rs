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

const BASE_URL: &str = "https://api.twelvedata.com";

pub struct TwelveDataProvider {
    client: ClientWithMiddleware,
    api_key: String,
    base_url: String,
}

/// Twelve Data returns errors inside a 200 body: `{"code":429,...}`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TwelveDataResponse {
    Err { code: u16, message: String },
    Price { price: String },
}

impl TwelveDataProvider {
    pub fn new(client: ClientWithMiddleware, api_key: String) -> Self {
        Self {
            client,
            api_key,
            base_url: BASE_URL.to_string(),
        }
    }

    fn upstream_symbol(symbol: &str) -> String {
        match SymbolClass::of(symbol) {
            SymbolClass::Crypto => symbol.replace('-', "/"),
            SymbolClass::Equity => symbol.to_string(),
        }
    }
}

#[async_trait]
impl QuoteProvider for TwelveDataProvider {
    fn source(&self) -> QuoteSource {
        QuoteSource::TwelveData
    }

    async fn fetch(&self, symbol: &str) -> Result<Quote, ProviderError> {
        let url = Url::parse_with_params(
            &format!("{}/price", self.base_url),
            &[
                ("symbol", Self::upstream_symbol(symbol).as_str()),
                ("apikey", self.api_key.as_str()),
            ],
        )
        .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(super::map_request_error)?;
        super::check_status(response.status())?;

        let payload: TwelveDataResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidPayload(e.to_string()))?;

        let price_str = match payload {
            TwelveDataResponse::Price { price } => price,
            TwelveDataResponse::Err { code: 429, .. } => return Err(ProviderError::RateLimited),
            TwelveDataResponse::Err { code, message } => {
                return Err(ProviderError::InvalidPayload(format!("{code}: {message}")));
            }
        };

        let price = Decimal::from_str(&price_str)
            .map_err(|e| ProviderError::InvalidPayload(format!("price {price_str}: {e}")))?;
        Quote::new(symbol, price, QuoteSource::TwelveData)
            .map_err(|_| ProviderError::NoData(symbol.to_string()))
    }
}
