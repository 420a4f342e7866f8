// Multi-source quote retrieval with freshness, cache and per-source
// fallback.
pub mod backoff;

use crate::domain::ports::QuoteProvider;
use crate::domain::quote::{Quote, QuoteHit, QuoteSource};
use crate::infrastructure::core::CircuitBreaker;
use backoff::Backoff;
use chrono::Utc;
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Observable counters for the quote service. Read by the metrics
/// reporter and exported through the supervisor's HTTP surface.
#[derive(Debug, Default)]
pub struct QuoteServiceMetrics {
    pub cache_hits_fresh: AtomicU64,
    pub cache_hits_stale: AtomicU64,
    pub fetch_successes: AtomicU64,
    pub fetch_failures: AtomicU64,
    pub max_cache_age_seen_secs: AtomicU64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuoteMetricsSnapshot {
    pub cache_hits_fresh: u64,
    pub cache_hits_stale: u64,
    pub fetch_successes: u64,
    pub fetch_failures: u64,
    pub max_cache_age_seen_secs: u64,
    pub stale_cache_usage_rate: f64,
}

impl QuoteServiceMetrics {
    pub fn snapshot(&self) -> QuoteMetricsSnapshot {
        let fresh = self.cache_hits_fresh.load(Ordering::Relaxed);
        let stale = self.cache_hits_stale.load(Ordering::Relaxed);
        let rate = if fresh + stale > 0 {
            stale as f64 / (fresh + stale) as f64
        } else {
            0.0
        };
        QuoteMetricsSnapshot {
            cache_hits_fresh: fresh,
            cache_hits_stale: stale,
            fetch_successes: self.fetch_successes.load(Ordering::Relaxed),
            fetch_failures: self.fetch_failures.load(Ordering::Relaxed),
            max_cache_age_seen_secs: self.max_cache_age_seen_secs.load(Ordering::Relaxed),
            stale_cache_usage_rate: rate,
        }
    }

    fn observe_cache_age(&self, age: Duration) {
        let secs = age.as_secs();
        self.max_cache_age_seen_secs
            .fetch_max(secs, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone)]
pub struct QuoteServiceConfig {
    /// Concurrent provider fan-out ceiling for one symbol's fetch.
    pub fanout: usize,
    /// Deadline applied to each provider attempt.
    pub provider_timeout: Duration,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
}

impl Default for QuoteServiceConfig {
    fn default() -> Self {
        Self {
            fanout: 3,
            provider_timeout: Duration::from_secs(8),
            backoff_base: Duration::from_secs(30),
            backoff_cap: Duration::from_secs(15 * 60),
        }
    }
}

/// Tiered quote retrieval: fresh cache, then providers in priority order
/// (skipping any under per-source backoff), then the stale cache if the
/// caller allows it.
pub struct QuoteService {
    providers: Vec<Arc<dyn QuoteProvider>>,
    cache: RwLock<HashMap<String, Quote>>,
    backoffs: Mutex<HashMap<QuoteSource, Backoff>>,
    metrics: Arc<QuoteServiceMetrics>,
    breaker: Arc<CircuitBreaker>,
    config: QuoteServiceConfig,
}

impl QuoteService {
    pub fn new(
        providers: Vec<Arc<dyn QuoteProvider>>,
        breaker: Arc<CircuitBreaker>,
        config: QuoteServiceConfig,
    ) -> Self {
        Self {
            providers,
            cache: RwLock::new(HashMap::new()),
            backoffs: Mutex::new(HashMap::new()),
            metrics: Arc::new(QuoteServiceMetrics::default()),
            breaker,
            config,
        }
    }

    pub fn metrics(&self) -> Arc<QuoteServiceMetrics> {
        self.metrics.clone()
    }

    /// Freshest acceptable quote for a symbol, or `None`.
    ///
    /// Each provider is attempted at most once per call. `max_age` of
    /// zero always bypasses the fresh-cache check and forces a fetch.
    pub async fn get_quote(
        &self,
        symbol: &str,
        max_age: Duration,
        use_stale_cache: bool,
    ) -> Option<QuoteHit> {
        let now = Utc::now();

        if !max_age.is_zero() {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.get(symbol) {
                if !cached.is_stale(now, max_age) {
                    self.metrics.cache_hits_fresh.fetch_add(1, Ordering::Relaxed);
                    self.metrics.observe_cache_age(cached.age(now));
                    return Some(QuoteHit::Fresh(cached.clone()));
                }
            }
        }

        if self.breaker.can_proceed().await {
            if let Some(quote) = self.fetch_tiered(symbol).await {
                self.breaker.record_success().await;
                return Some(QuoteHit::Fresh(quote));
            }
            self.breaker.record_failure().await;
        } else {
            debug!("QuoteService: {} breaker open, skipping fetch for {}",
                self.breaker.name(), symbol);
        }

        if use_stale_cache {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.get(symbol) {
                let age = cached.age(Utc::now());
                self.metrics.cache_hits_stale.fetch_add(1, Ordering::Relaxed);
                self.metrics.observe_cache_age(age);
                warn!(
                    "QuoteService: serving stale cache for {} (age {:?}, source {})",
                    symbol, age, cached.source
                );
                return Some(QuoteHit::Stale(cached.clone()));
            }
        }

        None
    }

    /// Attempt providers in priority order with bounded concurrent
    /// fan-out. First positive-price quote wins; losers are dropped.
    async fn fetch_tiered(&self, symbol: &str) -> Option<Quote> {
        let eligible = self.eligible_providers().await;
        if eligible.is_empty() {
            debug!("QuoteService: no eligible providers for {symbol}");
            return None;
        }

        for wave in eligible.chunks(self.config.fanout.max(1)) {
            let mut futures: FuturesUnordered<_> = wave
                .iter()
                .map(|provider| {
                    let provider = provider.clone();
                    let symbol = symbol.to_string();
                    let deadline = self.config.provider_timeout;
                    async move {
                        let source = provider.source();
                        let result = tokio::time::timeout(deadline, provider.fetch(&symbol)).await;
                        (source, result)
                    }
                })
                .collect();

            while let Some((source, result)) = futures.next().await {
                match result {
                    Ok(Ok(quote)) => {
                        self.record_provider_success(source).await;
                        self.metrics.fetch_successes.fetch_add(1, Ordering::Relaxed);
                        // Dropping the stream cancels the slower providers.
                        drop(futures);
                        let cached = self.cache_insert(quote).await;
                        return Some(cached);
                    }
                    Ok(Err(e)) => {
                        debug!("QuoteService: {source} failed for {symbol}: {e}");
                        self.record_provider_failure(source).await;
                        self.metrics.fetch_failures.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(_elapsed) => {
                        debug!(
                            "QuoteService: {source} timed out for {symbol} after {:?}",
                            self.config.provider_timeout
                        );
                        self.record_provider_failure(source).await;
                        self.metrics.fetch_failures.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        }

        None
    }

    async fn eligible_providers(&self) -> Vec<Arc<dyn QuoteProvider>> {
        let backoffs = self.backoffs.lock().await;
        self.providers
            .iter()
            .filter(|p| {
                backoffs
                    .get(&p.source())
                    .map(|b| !b.is_active())
                    .unwrap_or(true)
            })
            .cloned()
            .collect()
    }

    async fn record_provider_failure(&self, source: QuoteSource) {
        let mut backoffs = self.backoffs.lock().await;
        let backoff = backoffs.entry(source).or_insert_with(|| {
            Backoff::new(self.config.backoff_base, self.config.backoff_cap)
        });
        backoff.record_failure();
        info!(
            "QuoteService: {} entering backoff for {:?} ({} consecutive failures)",
            source,
            backoff.current_window(),
            backoff.consecutive_failures()
        );
    }

    async fn record_provider_success(&self, source: QuoteSource) {
        let mut backoffs = self.backoffs.lock().await;
        if let Some(backoff) = backoffs.get_mut(&source) {
            backoff.record_success();
        }
    }

    /// Cache entries are never backdated; insertion restamps `fetched_at`.
    async fn cache_insert(&self, mut quote: Quote) -> Quote {
        quote.fetched_at = Utc::now();
        self.cache
            .write()
            .await
            .insert(quote.symbol.clone(), quote.clone());
        quote
    }

    /// Most recent cached quote regardless of age, without touching the
    /// hit counters. Used by the paper simulator's fill pricing.
    pub async fn last_cached(&self, symbol: &str) -> Option<Quote> {
        self.cache.read().await.get(symbol).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::ProviderError;
    use crate::infrastructure::core::BreakerConfig;
    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::sync::atomic::AtomicUsize;

    /// Scripted provider: fails `fail_first` times, then succeeds.
    struct ScriptedProvider {
        source: QuoteSource,
        price: Decimal,
        fail_first: usize,
        calls: AtomicUsize,
    }

    impl ScriptedProvider {
        fn new(source: QuoteSource, price: Decimal, fail_first: usize) -> Arc<Self> {
            Arc::new(Self {
                source,
                price,
                fail_first,
                calls: AtomicUsize::new(0),
            })
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl QuoteProvider for ScriptedProvider {
        fn source(&self) -> QuoteSource {
            self.source
        }

        async fn fetch(&self, symbol: &str) -> Result<Quote, ProviderError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first {
                return Err(ProviderError::Status(500));
            }
            Ok(Quote::new(symbol, self.price, self.source).unwrap())
        }
    }

    fn service(providers: Vec<Arc<dyn QuoteProvider>>) -> QuoteService {
        let breaker = Arc::new(CircuitBreaker::new(
            "QuoteFetch",
            BreakerConfig {
                failure_threshold: 10,
                recovery_timeout: Duration::from_secs(120),
                half_open_success_threshold: 2,
                half_open_failure_threshold: 1,
            },
        ));
        QuoteService::new(
            providers,
            breaker,
            QuoteServiceConfig {
                fanout: 1,
                provider_timeout: Duration::from_millis(500),
                backoff_base: Duration::from_secs(60),
                backoff_cap: Duration::from_secs(600),
            },
        )
    }

    #[tokio::test]
    async fn fresh_cache_hit_skips_providers() {
        let provider = ScriptedProvider::new(QuoteSource::Finnhub, dec!(100), 0);
        let svc = service(vec![provider.clone()]);

        let first = svc
            .get_quote("SPY", Duration::from_secs(60), true)
            .await
            .unwrap();
        assert!(!first.is_stale());
        assert_eq!(provider.call_count(), 1);

        let second = svc
            .get_quote("SPY", Duration::from_secs(60), true)
            .await
            .unwrap();
        assert!(!second.is_stale());
        // Second lookup was served from cache without network I/O.
        assert_eq!(provider.call_count(), 1);
        assert_eq!(svc.metrics().snapshot().cache_hits_fresh, 1);
    }

    #[tokio::test]
    async fn max_age_zero_forces_fetch() {
        let provider = ScriptedProvider::new(QuoteSource::Finnhub, dec!(100), 0);
        let svc = service(vec![provider.clone()]);

        svc.get_quote("SPY", Duration::from_secs(60), false).await;
        svc.get_quote("SPY", Duration::ZERO, false).await;
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn failing_primary_falls_through_to_secondary() {
        let primary = ScriptedProvider::new(QuoteSource::Finnhub, dec!(100), usize::MAX);
        let secondary = ScriptedProvider::new(QuoteSource::Yahoo, dec!(101), 0);
        let svc = service(vec![primary.clone(), secondary.clone()]);

        let hit = svc
            .get_quote("SPY", Duration::ZERO, false)
            .await
            .unwrap();
        assert_eq!(hit.quote().price, dec!(101));
        assert_eq!(hit.quote().source, QuoteSource::Yahoo);
        assert_eq!(svc.metrics().snapshot().cache_hits_stale, 0);
    }

    #[tokio::test]
    async fn provider_in_backoff_is_skipped() {
        let primary = ScriptedProvider::new(QuoteSource::Finnhub, dec!(100), usize::MAX);
        let secondary = ScriptedProvider::new(QuoteSource::Yahoo, dec!(101), 0);
        let svc = service(vec![primary.clone(), secondary.clone()]);

        svc.get_quote("SPY", Duration::ZERO, false).await;
        assert_eq!(primary.call_count(), 1);

        // Primary is now under backoff; the next fetch must not touch it.
        svc.get_quote("SPY", Duration::ZERO, false).await;
        assert_eq!(primary.call_count(), 1);
        assert_eq!(secondary.call_count(), 2);
    }

    #[tokio::test]
    async fn stale_cache_is_served_when_all_providers_fail() {
        let failing = ScriptedProvider::new(QuoteSource::Finnhub, dec!(100), usize::MAX);
        let svc = service(vec![failing.clone()]);
        // An old cache entry from a healthier time.
        svc.cache_insert(Quote::new("SPY", dec!(99), QuoteSource::Finnhub).unwrap())
            .await;

        let hit = svc.get_quote("SPY", Duration::ZERO, true).await.unwrap();
        assert!(hit.is_stale());
        assert_eq!(hit.quote().price, dec!(99));

        let snap = svc.metrics().snapshot();
        assert_eq!(snap.cache_hits_stale, 1);
        assert!(snap.stale_cache_usage_rate > 0.99);

        // Without the stale escape hatch the result is null.
        assert!(svc.get_quote("MSFT", Duration::ZERO, false).await.is_none());
    }

    #[tokio::test]
    async fn cached_fetched_at_is_nondecreasing() {
        let provider = ScriptedProvider::new(QuoteSource::Finnhub, dec!(100), 0);
        let svc = service(vec![provider.clone()]);

        svc.get_quote("SPY", Duration::ZERO, false).await.unwrap();
        let first = svc.last_cached("SPY").await.unwrap().fetched_at;

        tokio::time::sleep(Duration::from_millis(10)).await;
        svc.get_quote("SPY", Duration::ZERO, false).await.unwrap();
        let second = svc.last_cached("SPY").await.unwrap().fetched_at;

        assert!(second >= first);
    }
}
