//! Prometheus metrics definitions.
//!
//! All metrics use the `neolight_` prefix. The supervisor process owns
//! the registry; values originating in agent processes arrive through
//! their snapshot files and are set at scrape time.

use prometheus::{
    Gauge, GaugeVec, Opts, Registry, TextEncoder,
    core::{AtomicF64, GenericGauge, GenericGaugeVec},
};
use std::sync::Arc;

#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,
    /// Supervisor uptime in seconds
    pub uptime_seconds: GenericGauge<AtomicF64>,
    /// Agents currently running
    pub agents_running: GenericGauge<AtomicF64>,
    /// Agents in the roster
    pub agents_total: GenericGauge<AtomicF64>,
    /// Restart count per agent
    pub agent_restarts: GenericGaugeVec<AtomicF64>,
    /// Fresh cache hits in the quote service
    pub quote_cache_hits_fresh: GenericGauge<AtomicF64>,
    /// Stale cache hits in the quote service
    pub quote_cache_hits_stale: GenericGauge<AtomicF64>,
    /// Successful provider fetches
    pub quote_fetch_successes: GenericGauge<AtomicF64>,
    /// Failed provider fetches
    pub quote_fetch_failures: GenericGauge<AtomicF64>,
    /// Largest cache age served, in seconds
    pub quote_max_cache_age_seconds: GenericGauge<AtomicF64>,
    /// cache_hits_stale / (cache_hits_fresh + cache_hits_stale)
    pub quote_stale_usage_rate: GenericGauge<AtomicF64>,
    /// Total portfolio equity in USD
    pub portfolio_equity_usd: GenericGauge<AtomicF64>,
    /// Available cash in USD
    pub portfolio_cash_usd: GenericGauge<AtomicF64>,
    /// Number of open positions
    pub positions_count: GenericGauge<AtomicF64>,
    /// Trades executed since agent start
    pub trades_executed: GenericGauge<AtomicF64>,
    /// Ticks skipped by policy (risk gate, cooldown, breaker, pause)
    pub policy_skips: GenericGauge<AtomicF64>,
    /// Execution faults (breaker-counted failures)
    pub trade_faults: GenericGauge<AtomicF64>,
    /// Primary compute hours used this period
    pub primary_hours_used: GenericGauge<AtomicF64>,
    /// Active environment (0 = primary, 1 = failover)
    pub active_environment: GenericGauge<AtomicF64>,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        fn gauge(registry: &Registry, name: &str, help: &str) -> anyhow::Result<Gauge> {
            let g = Gauge::with_opts(Opts::new(name, help))?;
            registry.register(Box::new(g.clone()))?;
            Ok(g)
        }

        let uptime_seconds = gauge(
            &registry,
            "neolight_uptime_seconds",
            "Supervisor uptime in seconds",
        )?;
        let agents_running = gauge(
            &registry,
            "neolight_agents_running",
            "Agents currently running",
        )?;
        let agents_total = gauge(&registry, "neolight_agents_total", "Agents in the roster")?;

        let agent_restarts = GaugeVec::new(
            Opts::new("neolight_agent_restarts", "Restart count per agent"),
            &["agent"],
        )?;
        registry.register(Box::new(agent_restarts.clone()))?;

        let quote_cache_hits_fresh = gauge(
            &registry,
            "neolight_quote_cache_hits_fresh",
            "Fresh cache hits in the quote service",
        )?;
        let quote_cache_hits_stale = gauge(
            &registry,
            "neolight_quote_cache_hits_stale",
            "Stale cache hits in the quote service",
        )?;
        let quote_fetch_successes = gauge(
            &registry,
            "neolight_quote_fetch_successes",
            "Successful provider fetches",
        )?;
        let quote_fetch_failures = gauge(
            &registry,
            "neolight_quote_fetch_failures",
            "Failed provider fetches",
        )?;
        let quote_max_cache_age_seconds = gauge(
            &registry,
            "neolight_quote_max_cache_age_seconds",
            "Largest cache age served in seconds",
        )?;
        let quote_stale_usage_rate = gauge(
            &registry,
            "neolight_quote_stale_usage_rate",
            "Share of cache hits that were stale",
        )?;

        let portfolio_equity_usd = gauge(
            &registry,
            "neolight_portfolio_equity_usd",
            "Total portfolio equity in USD",
        )?;
        let portfolio_cash_usd = gauge(
            &registry,
            "neolight_portfolio_cash_usd",
            "Available cash in USD",
        )?;
        let positions_count = gauge(
            &registry,
            "neolight_positions_count",
            "Number of open positions",
        )?;
        let trades_executed = gauge(
            &registry,
            "neolight_trades_executed",
            "Trades executed since agent start",
        )?;
        let policy_skips = gauge(
            &registry,
            "neolight_policy_skips",
            "Symbol ticks skipped by policy",
        )?;
        let trade_faults = gauge(
            &registry,
            "neolight_trade_faults",
            "Execution faults counted against the breaker",
        )?;

        let primary_hours_used = gauge(
            &registry,
            "neolight_primary_hours_used",
            "Primary compute hours used this period",
        )?;
        let active_environment = gauge(
            &registry,
            "neolight_active_environment",
            "Active environment (0 = primary, 1 = failover)",
        )?;

        Ok(Self {
            registry: Arc::new(registry),
            uptime_seconds,
            agents_running,
            agents_total,
            agent_restarts,
            quote_cache_hits_fresh,
            quote_cache_hits_stale,
            quote_fetch_successes,
            quote_fetch_failures,
            quote_max_cache_age_seconds,
            quote_stale_usage_rate,
            portfolio_equity_usd,
            portfolio_cash_usd,
            positions_count,
            trades_executed,
            policy_skips,
            trade_faults,
            primary_hours_used,
            active_environment,
        })
    }

    /// Render all metrics in Prometheus text format
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        encoder
            .encode_to_string(&metric_families)
            .unwrap_or_default()
    }

    pub fn set_agent_restarts(&self, agent: &str, restarts: f64) {
        self.agent_restarts.with_label_values(&[agent]).set(restarts);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_render_with_prefix() {
        let metrics = Metrics::new().expect("Failed to create metrics");
        assert!(metrics.render().contains("neolight_"));
    }

    #[test]
    fn quote_counters_appear_in_exposition() {
        let metrics = Metrics::new().expect("Failed to create metrics");
        metrics.quote_cache_hits_fresh.set(42.0);
        metrics.quote_stale_usage_rate.set(0.25);
        let output = metrics.render();
        assert!(output.contains("neolight_quote_cache_hits_fresh 42"));
        assert!(output.contains("neolight_quote_stale_usage_rate 0.25"));
    }

    #[test]
    fn per_agent_restart_labels() {
        let metrics = Metrics::new().expect("Failed to create metrics");
        metrics.set_agent_restarts("trade_loop", 3.0);
        let output = metrics.render();
        assert!(output.contains("neolight_agent_restarts"));
        assert!(output.contains("trade_loop"));
    }
}
