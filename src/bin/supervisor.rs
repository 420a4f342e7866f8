//! Agent supervisor and cloud-failover orchestrator.
//!
//! Owns the roster of long-running agents (the trade loop among them),
//! restarts crashed agents with exponential backoff, hosts the
//! observability HTTP surface, and migrates the workload to the failover
//! environment when the primary's monthly compute budget runs out.
//!
//! Exit codes: 0 graceful shutdown, 1 required-agent launch failure,
//! 2 corrupt persistent state.

use clap::Parser;
use neolight::application::supervisor::{
    FailoverDecision, FailoverOrchestrator, KeepAlivePinger, Supervisor, SupervisorConfig,
    load_roster,
};
use neolight::config::Config;
use neolight::domain::control::Environment;
use neolight::domain::errors::StateError;
use neolight::infrastructure::observability::Metrics;
use neolight::infrastructure::persistence::{ObjectSharedStore, SharedStore, StatePaths, StateStore};
use neolight::interfaces::http::{AppState, serve};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{Level, error, info, warn};
use tracing_subscriber::prelude::*;

#[derive(Parser, Debug)]
#[command(name = "supervisor", about = "Neolight agent supervisor")]
struct Cli {
    /// Override the roster file path from AGENT_ROSTER.
    #[arg(long)]
    roster: Option<PathBuf>,
}

fn exit_corrupt(e: &StateError) -> ! {
    error!("Refusing to start on corrupt persistent state: {e}");
    std::process::exit(2);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let stdout_layer = tracing_subscriber::fmt::layer().with_target(false);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(stdout_layer)
        .init();

    info!("Supervisor {} starting...", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;
    let store = StateStore::new(StatePaths::new(config.data_dir.clone()));
    if let Err(e) = store.ensure_dirs() {
        error!("Cannot create data directories: {e}");
        std::process::exit(2);
    }

    let roster_path = cli.roster.unwrap_or_else(|| config.roster_path.clone());
    let roster = match load_roster(&roster_path) {
        Ok(roster) => roster,
        Err(e @ StateError::Corrupt { .. }) => exit_corrupt(&e),
        Err(e) => {
            error!("Roster unreadable: {e}");
            std::process::exit(2);
        }
    };
    if roster.is_empty() {
        info!("Supervisor: zero-agent roster at {}, nothing to do", roster_path.display());
        return Ok(());
    }
    info!(
        "Supervisor: {} agents rostered ({:?} environment)",
        roster.len(),
        config.environment
    );

    let shared: Arc<dyn SharedStore> = Arc::new(
        ObjectSharedStore::local(&config.shared_store_path)
            .map_err(|e| anyhow::anyhow!("shared store setup failed: {e}"))?,
    );
    let mut orchestrator = match FailoverOrchestrator::load(
        store.clone(),
        shared.clone(),
        config.failover_warn_hours,
        config.failover_switch_hours,
    ) {
        Ok(orchestrator) => orchestrator,
        Err(e) => exit_corrupt(&e),
    };

    let metrics = Metrics::new()?;
    let mut supervisor = Supervisor::new(
        store.clone(),
        SupervisorConfig {
            initial_backoff: Duration::from_secs(config.agent_initial_backoff_secs),
            backoff_cap: Duration::from_secs(config.agent_backoff_cap_secs),
            stability_window: Duration::from_secs(config.agent_stability_window_secs),
            shutdown_grace: Duration::from_secs(config.shutdown_grace_secs),
        },
        roster,
    );

    let http_state = AppState {
        started_at: chrono::Utc::now(),
        registry: supervisor.registry(),
        store: store.clone(),
        metrics,
    };
    let bind = config.http_bind.clone();
    tokio::spawn(async move {
        if let Err(e) = serve(bind, http_state).await {
            error!("HTTP: observability surface failed: {e}");
        }
    });

    if let Some(url) = config.keepalive_url.clone() {
        let pinger =
            KeepAlivePinger::new(url, Duration::from_secs(config.keepalive_interval_secs));
        tokio::spawn(pinger.run());
    }

    let mut agents_active = false;
    if config.environment == Environment::Primary
        && orchestrator.ledger().active_environment == Environment::Primary
    {
        if let Err(e) = supervisor.start().await {
            error!("Supervisor: {e}");
            std::process::exit(1);
        }
        agents_active = true;
    } else if config.environment == Environment::Primary {
        info!("Supervisor: failover environment is active; primary standing by");
    }

    let usage_tick = Duration::from_secs(config.usage_tick_secs.max(1));
    let mut ticker = tokio::time::interval(usage_tick);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match config.environment {
                    Environment::Primary => {
                        let running = supervisor.running_count().await > 0;
                        match orchestrator.tick(chrono::Utc::now(), usage_tick, running).await {
                            Ok(FailoverDecision::SwitchToFailover) => {
                                info!("Supervisor: budget exhausted, quiescing primary");
                                supervisor.stop_agents().await;
                                if let Err(e) = orchestrator.complete_switch(chrono::Utc::now()).await {
                                    error!("Supervisor: cutover failed: {e}");
                                } else {
                                    agents_active = false;
                                }
                            }
                            Ok(FailoverDecision::Reset) => {
                                if !agents_active {
                                    info!("Supervisor: new period, resuming on primary");
                                    if let Err(e) = supervisor.start().await {
                                        error!("Supervisor: {e}");
                                        std::process::exit(1);
                                    }
                                    agents_active = true;
                                }
                            }
                            Ok(_) => {}
                            Err(e) => warn!("Supervisor: orchestrator tick failed: {e}"),
                        }
                    }
                    Environment::Failover => {
                        match orchestrator.shared_active_environment().await {
                            Ok(Environment::Failover) if !agents_active => {
                                info!("Supervisor: taking over from primary");
                                if let Err(e) = orchestrator.pull_state_from_shared().await {
                                    warn!("Supervisor: state pull failed: {e}");
                                }
                                if let Err(e) = supervisor.start().await {
                                    error!("Supervisor: {e}");
                                    std::process::exit(1);
                                }
                                agents_active = true;
                            }
                            Ok(Environment::Primary) if agents_active => {
                                info!("Supervisor: primary resumed, handing state back");
                                supervisor.stop_agents().await;
                                if let Err(e) = orchestrator.push_state_to_shared().await {
                                    warn!("Supervisor: state push failed: {e}");
                                }
                                agents_active = false;
                            }
                            Ok(_) => {
                                // While active, keep the shared copy fresh so
                                // the reset handover loses nothing.
                                if agents_active {
                                    if let Err(e) = orchestrator.push_state_to_shared().await {
                                        warn!("Supervisor: periodic state push failed: {e}");
                                    }
                                }
                            }
                            Err(e) => warn!("Supervisor: shared ledger unreadable: {e}"),
                        }
                    }
                }
            }
            _ = sigterm.recv() => {
                info!("Supervisor: SIGTERM received");
                break;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Supervisor: interrupt received");
                break;
            }
        }
    }

    supervisor.stop_agents().await;
    info!("Supervisor: graceful shutdown complete");
    Ok(())
}
