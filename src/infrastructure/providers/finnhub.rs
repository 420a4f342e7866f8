use crate::domain::errors::ProviderError;
use crate::domain::ports::QuoteProvider;
use crate::domain::quote::{Quote, QuoteSource};
use crate::domain::symbol::SymbolClass;
use async_trait::async_trait;
use reqwest_middleware::ClientWithMiddleware;
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use serde::Deserialize;
use url::Url;

const BASE_URL: &str = "https://finnhub.io/api/v1";

pub struct FinnhubProvider {
    client: ClientWithMiddleware,
    api_key: String,
    base_url: String,
}

/// `GET /quote` payload. `c` is the current price; a symbol finnhub does
/// not know comes back as all zeros rather than an error status.
#[derive(Debug, Deserialize)]
struct FinnhubQuote {
    #[serde(default)]
    c: f64,
}

impl FinnhubProvider {
    pub fn new(client: ClientWithMiddleware, api_key: String) -> Self {
        Self {
            client,
            api_key,
            base_url: BASE_URL.to_string(),
        }
    }

    /// Finnhub quotes crypto through exchange-prefixed pairs.
    fn upstream_symbol(symbol: &str) -> String {
        match SymbolClass::of(symbol) {
            SymbolClass::Crypto => {
                let base = symbol.trim_end_matches("-USD");
                format!("BINANCE:{base}USDT")
            }
            SymbolClass::Equity => symbol.to_string(),
        }
    }
}

#[async_trait]
impl QuoteProvider for FinnhubProvider {
    fn source(&self) -> QuoteSource {
        QuoteSource::Finnhub
    }

    async fn fetch(&self, symbol: &str) -> Result<Quote, ProviderError> {
        let url = Url::parse_with_params(
            &format!("{}/quote", self.base_url),
            &[
                ("symbol", Self::upstream_symbol(symbol).as_str()),
                ("token", self.api_key.as_str()),
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

        let payload: FinnhubQuote = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidPayload(e.to_string()))?;

        let price = Decimal::from_f64(payload.c)
            .ok_or_else(|| ProviderError::InvalidPayload(format!("price {}", payload.c)))?;
        Quote::new(symbol, price, QuoteSource::Finnhub)
            .map_err(|_| ProviderError::NoData(symbol.to_string()))
    }
}
