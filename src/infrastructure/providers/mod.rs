// Upstream quote providers, constructed into a priority list at startup.
pub mod alphavantage;
pub mod finnhub;
pub mod twelvedata;
pub mod yahoo;

use crate::config::Config;
use crate::domain::errors::{BrokerError, ProviderError};
use crate::domain::ports::{Broker, QuoteProvider};
use crate::domain::quote::{Quote, QuoteSource};
use async_trait::async_trait;
use reqwest_middleware::ClientWithMiddleware;
use std::sync::Arc;
use tracing::info;

pub use alphavantage::AlphaVantageProvider;
pub use finnhub::FinnhubProvider;
pub use twelvedata::TwelveDataProvider;
pub use yahoo::YahooProvider;

/// The broker's own data feed exposed as the first-priority provider.
pub struct BrokerQuoteProvider {
    broker: Arc<dyn Broker>,
}

impl BrokerQuoteProvider {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self { broker }
    }
}

#[async_trait]
impl QuoteProvider for BrokerQuoteProvider {
    fn source(&self) -> QuoteSource {
        QuoteSource::Broker
    }

    async fn fetch(&self, symbol: &str) -> Result<Quote, ProviderError> {
        self.broker
            .fetch_quote(symbol)
            .await
            .map_err(|e| match e {
                BrokerError::RateLimited(_) => ProviderError::RateLimited,
                BrokerError::UnknownSymbol(s) => ProviderError::NoData(s),
                other => ProviderError::Transport(other.to_string()),
            })
    }
}

/// Build the provider priority list from config. Providers without an API
/// key configured are skipped with a log line rather than constructed to
/// fail on every call. `broker` is `None` in paper mode, where the broker
/// is itself a consumer of this service and must not appear in the list.
pub fn build_providers(
    config: &Config,
    client: ClientWithMiddleware,
    broker: Option<Arc<dyn Broker>>,
) -> Vec<Arc<dyn QuoteProvider>> {
    let mut providers: Vec<Arc<dyn QuoteProvider>> = Vec::new();

    for source in &config.quote_providers {
        match source {
            QuoteSource::Broker => match &broker {
                Some(broker) => {
                    providers.push(Arc::new(BrokerQuoteProvider::new(broker.clone())));
                }
                None => {
                    info!("QuoteService: no broker data feed in this mode, skipping");
                }
            },
            QuoteSource::Finnhub => {
                if config.finnhub_api_key.is_empty() {
                    info!("QuoteService: finnhub not configured, skipping");
                    continue;
                }
                providers.push(Arc::new(FinnhubProvider::new(
                    client.clone(),
                    config.finnhub_api_key.clone(),
                )));
            }
            QuoteSource::TwelveData => {
                if config.twelvedata_api_key.is_empty() {
                    info!("QuoteService: twelvedata not configured, skipping");
                    continue;
                }
                providers.push(Arc::new(TwelveDataProvider::new(
                    client.clone(),
                    config.twelvedata_api_key.clone(),
                )));
            }
            QuoteSource::AlphaVantage => {
                if config.alphavantage_api_key.is_empty() {
                    info!("QuoteService: alphavantage not configured, skipping");
                    continue;
                }
                providers.push(Arc::new(AlphaVantageProvider::new(
                    client.clone(),
                    config.alphavantage_api_key.clone(),
                )));
            }
            QuoteSource::Yahoo => {
                providers.push(Arc::new(YahooProvider::new(client.clone())));
            }
        }
    }

    providers
}

/// Shared mapping from transport-layer failures to the provider error
/// taxonomy.
pub(crate) fn map_request_error(e: reqwest_middleware::Error) -> ProviderError {
    match e {
        reqwest_middleware::Error::Reqwest(err) if err.is_timeout() => {
            ProviderError::Timeout(std::time::Duration::from_secs(0))
        }
        reqwest_middleware::Error::Reqwest(err) => ProviderError::Transport(err.to_string()),
        reqwest_middleware::Error::Middleware(err) => ProviderError::Transport(err.to_string()),
    }
}

pub(crate) fn check_status(status: reqwest::StatusCode) -> Result<(), ProviderError> {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return Err(ProviderError::RateLimited);
    }
    if !status.is_success() {
        return Err(ProviderError::Status(status.as_u16()));
    }
    Ok(())
}
