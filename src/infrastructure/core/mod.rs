pub mod circuit_breaker;
pub mod http_client;

pub use circuit_breaker::{BreakerConfig, CircuitBreaker, CircuitState};
pub use http_client::HttpClientFactory;
