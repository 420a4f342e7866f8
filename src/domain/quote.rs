use crate::domain::errors::QuoteError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Identifies which configured provider produced a quote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QuoteSource {
    /// The broker's own data feed, first in the default priority list.
    Broker,
    Finnhub,
    TwelveData,
    AlphaVantage,
    Yahoo,
}

impl fmt::Display for QuoteSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuoteSource::Broker => write!(f, "broker"),
            QuoteSource::Finnhub => write!(f, "finnhub"),
            QuoteSource::TwelveData => write!(f, "twelvedata"),
            QuoteSource::AlphaVantage => write!(f, "alphavantage"),
            QuoteSource::Yahoo => write!(f, "yahoo"),
        }
    }
}

impl std::str::FromStr for QuoteSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "broker" | "primary" => Ok(QuoteSource::Broker),
            "finnhub" => Ok(QuoteSource::Finnhub),
            "twelvedata" => Ok(QuoteSource::TwelveData),
            "alphavantage" => Ok(QuoteSource::AlphaVantage),
            "yahoo" => Ok(QuoteSource::Yahoo),
            other => Err(format!("unknown quote source: {other}")),
        }
    }
}

/// A single observed price for a symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub price: Decimal,
    pub source: QuoteSource,
    pub fetched_at: DateTime<Utc>,
    pub bid: Option<Decimal>,
    pub ask: Option<Decimal>,
}

impl Quote {
    /// Construct a quote, rejecting non-positive prices. Providers that
    /// return zero or negative prices yield no quote at all.
    pub fn new(
        symbol: impl Into<String>,
        price: Decimal,
        source: QuoteSource,
    ) -> Result<Self, QuoteError> {
        let symbol = symbol.into();
        if price <= Decimal::ZERO {
            return Err(QuoteError::NonPositivePrice { symbol, price });
        }
        Ok(Self {
            symbol,
            price,
            source,
            fetched_at: Utc::now(),
            bid: None,
            ask: None,
        })
    }

    pub fn with_book(mut self, bid: Option<Decimal>, ask: Option<Decimal>) -> Self {
        self.bid = bid.filter(|b| *b > Decimal::ZERO);
        self.ask = ask.filter(|a| *a > Decimal::ZERO);
        self
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now.signed_duration_since(self.fetched_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    pub fn is_stale(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        self.age(now) > max_age
    }

    /// Mid price when both sides of the book are known, last price otherwise.
    pub fn mid(&self) -> Decimal {
        match (self.bid, self.ask) {
            (Some(b), Some(a)) => (b + a) / Decimal::TWO,
            _ => self.price,
        }
    }
}

/// Result of a quote-service lookup. Staleness is a property of the
/// returned quote and is never silently upgraded to fresh.
#[derive(Debug, Clone)]
pub enum QuoteHit {
    Fresh(Quote),
    Stale(Quote),
}

impl QuoteHit {
    pub fn quote(&self) -> &Quote {
        match self {
            QuoteHit::Fresh(q) | QuoteHit::Stale(q) => q,
        }
    }

    pub fn into_quote(self) -> Quote {
        match self {
            QuoteHit::Fresh(q) | QuoteHit::Stale(q) => q,
        }
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, QuoteHit::Stale(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn rejects_non_positive_price() {
        assert!(Quote::new("BTC-USD", dec!(0), QuoteSource::Finnhub).is_err());
        assert!(Quote::new("BTC-USD", dec!(-1.5), QuoteSource::Finnhub).is_err());
        assert!(Quote::new("BTC-USD", dec!(107000), QuoteSource::Finnhub).is_ok());
    }

    #[test]
    fn mid_uses_book_when_present() {
        let q = Quote::new("SPY", dec!(500), QuoteSource::Yahoo)
            .unwrap()
            .with_book(Some(dec!(499)), Some(dec!(501)));
        assert_eq!(q.mid(), dec!(500));

        let q = Quote::new("SPY", dec!(500), QuoteSource::Yahoo)
            .unwrap()
            .with_book(Some(dec!(499)), None);
        assert_eq!(q.mid(), dec!(500));
    }

    #[test]
    fn staleness_is_relative_to_max_age() {
        let mut q = Quote::new("SPY", dec!(500), QuoteSource::Yahoo).unwrap();
        q.fetched_at = Utc::now() - chrono::Duration::seconds(120);
        let now = Utc::now();
        assert!(q.is_stale(now, Duration::from_secs(60)));
        assert!(!q.is_stale(now, Duration::from_secs(300)));
    }
}
