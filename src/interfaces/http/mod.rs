//! Observability HTTP surface hosted by the supervisor.
//!
//! Read-only: every value served here comes from the agent registry or
//! the snapshot files agents publish; no handler mutates trading state.

use crate::application::supervisor::{AgentRegistry, AgentStatus, UsageLedger};
use crate::application::trading::TradeLoopSnapshot;
use crate::domain::control::Environment;
use crate::infrastructure::observability::Metrics;
use crate::infrastructure::persistence::StateStore;
use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::net::TcpListener;
use tracing::info;

#[derive(Clone)]
pub struct AppState {
    pub started_at: DateTime<Utc>,
    pub registry: AgentRegistry,
    pub store: StateStore,
    pub metrics: Metrics,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/agents", get(agents))
        .route("/metrics/quote-service", get(quote_service_metrics))
        .route("/metrics", get(metrics_exposition))
        .with_state(state)
}

pub async fn serve(bind: String, state: AppState) -> anyhow::Result<()> {
    let listener = TcpListener::bind(&bind).await?;
    info!("HTTP: observability surface listening on {bind}");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let registry = state.registry.read().await;
    let running = registry
        .values()
        .filter(|v| v.status == AgentStatus::Running)
        .count();
    Json(json!({
        "status": "ok",
        "uptime_seconds": (Utc::now() - state.started_at).num_seconds(),
        "agents_running": running,
        "agents_total": registry.len(),
    }))
}

async fn agents(State(state): State<AppState>) -> Json<serde_json::Value> {
    let registry = state.registry.read().await;
    let mut agents: Vec<_> = registry.values().cloned().collect();
    agents.sort_by(|a, b| a.name.cmp(&b.name));
    Json(json!({ "agents": agents }))
}

fn read_trade_snapshot(store: &StateStore) -> Option<TradeLoopSnapshot> {
    store
        .read_json::<TradeLoopSnapshot>(&store.paths().trade_loop_metrics())
        .ok()
        .flatten()
}

async fn quote_service_metrics(State(state): State<AppState>) -> Json<serde_json::Value> {
    match read_trade_snapshot(&state.store) {
        Some(snapshot) => Json(json!({
            "updated": snapshot.timestamp,
            "counters": snapshot.quote,
        })),
        None => Json(json!({
            "updated": null,
            "counters": null,
        })),
    }
}

/// Text exposition for a time-series scraper. Gauges are refreshed from
/// the registry and snapshot files at scrape time.
async fn metrics_exposition(State(state): State<AppState>) -> impl IntoResponse {
    let metrics = &state.metrics;
    metrics
        .uptime_seconds
        .set((Utc::now() - state.started_at).num_seconds() as f64);

    {
        let registry = state.registry.read().await;
        let running = registry
            .values()
            .filter(|v| v.status == AgentStatus::Running)
            .count();
        metrics.agents_running.set(running as f64);
        metrics.agents_total.set(registry.len() as f64);
        for view in registry.values() {
            metrics.set_agent_restarts(&view.name, view.restarts as f64);
        }
    }

    if let Some(snapshot) = read_trade_snapshot(&state.store) {
        use rust_decimal::prelude::ToPrimitive;
        metrics
            .quote_cache_hits_fresh
            .set(snapshot.quote.cache_hits_fresh as f64);
        metrics
            .quote_cache_hits_stale
            .set(snapshot.quote.cache_hits_stale as f64);
        metrics
            .quote_fetch_successes
            .set(snapshot.quote.fetch_successes as f64);
        metrics
            .quote_fetch_failures
            .set(snapshot.quote.fetch_failures as f64);
        metrics
            .quote_max_cache_age_seconds
            .set(snapshot.quote.max_cache_age_seen_secs as f64);
        metrics
            .quote_stale_usage_rate
            .set(snapshot.quote.stale_cache_usage_rate);
        metrics
            .portfolio_cash_usd
            .set(snapshot.cash.to_f64().unwrap_or(0.0));
        metrics
            .portfolio_equity_usd
            .set(snapshot.equity.to_f64().unwrap_or(0.0));
        metrics.positions_count.set(snapshot.open_positions as f64);
        metrics
            .trades_executed
            .set(snapshot.counters.trades_executed as f64);
        metrics
            .policy_skips
            .set(snapshot.counters.policy_skips as f64);
        metrics
            .trade_faults
            .set(snapshot.counters.trade_faults as f64);
    }

    if let Ok(Some(ledger)) = state
        .store
        .read_json::<UsageLedger>(&state.store.paths().usage_ledger())
    {
        metrics
            .primary_hours_used
            .set(ledger.primary_hours_used_this_period);
        metrics.active_environment.set(match ledger.active_environment {
            Environment::Primary => 0.0,
            Environment::Failover => 1.0,
        });
    }

    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics.render(),
    )
}
