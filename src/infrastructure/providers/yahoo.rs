use crate::domain::errors::ProviderError;
use crate::domain::ports::QuoteProvider;
use crate::domain::quote::{Quote, QuoteSource};
use async_trait::async_trait;
use reqwest_middleware::ClientWithMiddleware;
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use serde::Deserialize;
use url::Url;

const BASE_URL: &str = "https://query1.finance.yahoo.com";

/// Keyless last-resort provider. Yahoo natively understands the
/// `BTC-USD` suffix convention, so no symbol mapping is needed.
pub struct YahooProvider {
    client: ClientWithMiddleware,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: Chart,
}

#[derive(Debug, Deserialize)]
struct Chart {
    result: Option<Vec<ChartResult>>,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    meta: ChartMeta,
}

#[derive(Debug, Deserialize)]
struct ChartMeta {
    #[serde(rename = "regularMarketPrice")]
    regular_market_price: Option<f64>,
}

impl YahooProvider {
    pub fn new(client: ClientWithMiddleware) -> Self {
        Self {
            client,
            base_url: BASE_URL.to_string(),
        }
    }
}

#[async_trait]
impl QuoteProvider for YahooProvider {
    fn source(&self) -> QuoteSource {
        QuoteSource::Yahoo
    }

    async fn fetch(&self, symbol: &str) -> Result<Quote, ProviderError> {
        let url = Url::parse_with_params(
            &format!("{}/v8/finance/chart/{}", self.base_url, symbol),
            &[("interval", "1m"), ("range", "1d")],
        )
        .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(super::map_request_error)?;
        super::check_status(response.status())?;

        let payload: ChartResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidPayload(e.to_string()))?;

        let price = payload
            .chart
            .result
            .and_then(|r| r.into_iter().next())
            .and_then(|r| r.meta.regular_market_price)
            .ok_or_else(|| ProviderError::NoData(symbol.to_string()))?;

        let price = Decimal::from_f64(price)
            .ok_or_else(|| ProviderError::InvalidPayload(format!("price {price}")))?;
        Quote::new(symbol, price, QuoteSource::Yahoo)
            .map_err(|_| ProviderError::NoData(symbol.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_chart_payload() {
        let body = r#"{"chart":{"result":[{"meta":{"symbol":"BTC-USD","regularMarketPrice":107000.5}}],"error":null}}"#;
        let payload: ChartResponse = serde_json::from_str(body).unwrap();
        let price = payload.chart.result.unwrap()[0]
            .meta
            .regular_market_price
            .unwrap();
        assert_eq!(price, 107000.5);
    }

    #[test]
    fn empty_result_is_no_data() {
        let body = r#"{"chart":{"result":null,"error":{"code":"Not Found"}}}"#;
        let payload: ChartResponse = serde_json::from_str(body).unwrap();
        assert!(payload.chart.result.is_none());
    }
}
