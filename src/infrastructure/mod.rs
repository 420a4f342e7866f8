// Broker adapters (paper simulator and upstream REST)
pub mod brokers;

// Shared primitives (circuit breaker, HTTP client factory)
pub mod core;

// Prometheus metrics
pub mod observability;

// Durable state on disk and the failover shared store
pub mod persistence;

// Upstream quote providers
pub mod providers;
