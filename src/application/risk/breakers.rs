use crate::config::Config;
use crate::infrastructure::core::{BreakerConfig, CircuitBreaker, CircuitState};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub const TRADE_EXECUTION: &str = "TradeExecution";
pub const QUOTE_FETCH: &str = "QuoteFetch";

/// Named registry of circuit breakers. The registry is the only owner of
/// breakers and lives in the trade-loop process; breakers are never
/// shared across process boundaries or persisted, so a fresh process
/// always starts with closed circuits.
pub struct BreakerRegistry {
    breakers: HashMap<String, Arc<CircuitBreaker>>,
}

impl BreakerRegistry {
    pub fn new() -> Self {
        Self {
            breakers: HashMap::new(),
        }
    }

    /// The two standard breakers every trade loop carries.
    pub fn standard(config: &Config) -> Self {
        let mut registry = Self::new();
        registry.register(
            TRADE_EXECUTION,
            BreakerConfig {
                failure_threshold: config.exec_failure_threshold,
                recovery_timeout: Duration::from_secs(config.exec_recovery_secs),
                half_open_success_threshold: config.half_open_success_threshold,
                half_open_failure_threshold: 1,
            },
        );
        registry.register(
            QUOTE_FETCH,
            BreakerConfig {
                failure_threshold: config.quote_failure_threshold,
                recovery_timeout: Duration::from_secs(config.quote_recovery_secs),
                half_open_success_threshold: config.half_open_success_threshold,
                half_open_failure_threshold: 1,
            },
        );
        registry
    }

    pub fn register(&mut self, name: &str, config: BreakerConfig) -> Arc<CircuitBreaker> {
        let breaker = Arc::new(CircuitBreaker::new(name, config));
        self.breakers.insert(name.to_string(), breaker.clone());
        breaker
    }

    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(name).cloned()
    }

    pub async fn states(&self) -> Vec<(String, CircuitState)> {
        let mut states = Vec::with_capacity(self.breakers.len());
        for (name, breaker) in &self.breakers {
            states.push((name.clone(), breaker.state().await));
        }
        states
    }
}

impl Default for BreakerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
