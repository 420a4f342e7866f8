use rust_decimal::Decimal;

/// Broker adapter failures. Every upstream error is wrapped into one of
/// these kinds; nothing provider-specific leaks to callers.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("unknown symbol: {0}")]
    UnknownSymbol(String),

    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("insufficient funds: {0}")]
    InsufficientFunds(String),

    #[error("market closed for {0}")]
    MarketClosed(String),

    #[error("upstream rejected order: {0}")]
    UpstreamRejected(String),
}

impl BrokerError {
    /// Transient upstream faults feed backoff and the execution breaker;
    /// the rest are policy or validation outcomes.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BrokerError::UpstreamUnavailable(_)
                | BrokerError::RateLimited(_)
                | BrokerError::UpstreamRejected(_)
        )
    }
}

/// Quote provider failures, grouped by handling policy rather than origin.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("rate limited")]
    RateLimited,

    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("upstream returned status {0}")]
    Status(u16),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("unparseable payload: {0}")]
    InvalidPayload(String),

    #[error("provider has no data for symbol {0}")]
    NoData(String),
}

#[derive(Debug, thiserror::Error)]
pub enum QuoteError {
    #[error("non-positive price {price} for {symbol}")]
    NonPositivePrice { symbol: String, price: Decimal },
}

/// Persistent-state failures. Corrupt state is fatal at startup (exit 2)
/// and never silently healed.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("corrupt state in {path}: {detail}")]
    Corrupt { path: String, detail: String },

    #[error("i/o failure on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
