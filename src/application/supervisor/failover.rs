use crate::domain::control::Environment;
use crate::domain::errors::StateError;
use crate::infrastructure::persistence::{SharedStore, StateStore};
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Primary-environment usage accounting against the monthly budget.
/// Persisted at every transition and mirrored through the shared store so
/// the failover environment can see it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UsageLedger {
    pub primary_hours_used_this_period: f64,
    pub period_start: NaiveDate,
    pub active_environment: Environment,
    pub last_switch_at: Option<DateTime<Utc>>,
}

impl UsageLedger {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            primary_hours_used_this_period: 0.0,
            period_start: period_of(now),
            active_environment: Environment::Primary,
            last_switch_at: None,
        }
    }
}

/// First day of the month containing `now`; the budget period boundary.
fn period_of(now: DateTime<Utc>) -> NaiveDate {
    now.date_naive().with_day(1).expect("day 1 always exists")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailoverDecision {
    /// Within budget; keep running where we are.
    Steady,
    /// Past the warn threshold; notification raised, still on primary.
    Warn,
    /// Past the switch threshold; caller must quiesce, then call
    /// `complete_switch`.
    SwitchToFailover,
    /// Period boundary crossed; counter zeroed, back to primary.
    Reset,
}

/// Tracks primary hours against the monthly cap and drives the
/// PRIMARY_ACTIVE -> PRIMARY_WARN -> FAILOVER_ACTIVE -> RESET cycle.
pub struct FailoverOrchestrator {
    store: StateStore,
    shared: Arc<dyn SharedStore>,
    warn_hours: f64,
    switch_hours: f64,
    ledger: UsageLedger,
    warned: bool,
}

const LEDGER_KEY: &str = "state/usage_ledger.json";

impl FailoverOrchestrator {
    /// Load the ledger from disk; corrupt ledger state is refused, not
    /// healed.
    pub fn load(
        store: StateStore,
        shared: Arc<dyn SharedStore>,
        warn_hours: f64,
        switch_hours: f64,
    ) -> Result<Self, StateError> {
        let ledger = store
            .read_json::<UsageLedger>(&store.paths().usage_ledger())?
            .unwrap_or_else(|| UsageLedger::new(Utc::now()));
        Ok(Self {
            store,
            shared,
            warn_hours,
            switch_hours,
            ledger,
            warned: false,
        })
    }

    pub fn ledger(&self) -> &UsageLedger {
        &self.ledger
    }

    /// One orchestrator tick. `elapsed` is wall time since the previous
    /// tick; hours accrue only while agents are actually running, so
    /// keep-alive pings never burn budget.
    pub async fn tick(
        &mut self,
        now: DateTime<Utc>,
        elapsed: Duration,
        agents_running: bool,
    ) -> anyhow::Result<FailoverDecision> {
        if period_of(now) != self.ledger.period_start {
            info!(
                "FailoverOrchestrator: period boundary crossed ({} -> {}), resetting usage",
                self.ledger.period_start,
                period_of(now)
            );
            let was_failover = self.ledger.active_environment == Environment::Failover;
            if was_failover {
                // The failover environment holds the freshest state; pull
                // it back before primary resumes.
                self.pull_state_from_shared().await?;
            }
            self.ledger.primary_hours_used_this_period = 0.0;
            self.ledger.period_start = period_of(now);
            self.ledger.active_environment = Environment::Primary;
            self.ledger.last_switch_at = Some(now);
            self.warned = false;
            self.persist_and_mirror().await?;
            return Ok(FailoverDecision::Reset);
        }

        if self.ledger.active_environment != Environment::Primary {
            return Ok(FailoverDecision::Steady);
        }

        if agents_running {
            self.ledger.primary_hours_used_this_period += elapsed.as_secs_f64() / 3600.0;
            self.store
                .write_json(&self.store.paths().usage_ledger(), &self.ledger)?;
        }

        let hours = self.ledger.primary_hours_used_this_period;
        if hours >= self.switch_hours {
            warn!(
                "FailoverOrchestrator: {hours:.1}h used >= switch threshold {:.1}h",
                self.switch_hours
            );
            return Ok(FailoverDecision::SwitchToFailover);
        }
        if hours >= self.warn_hours {
            if !self.warned {
                warn!(
                    "FailoverOrchestrator: {hours:.1}h of primary budget used (warn at {:.1}h, switch at {:.1}h)",
                    self.warn_hours, self.switch_hours
                );
                self.warned = true;
            }
            return Ok(FailoverDecision::Warn);
        }
        Ok(FailoverDecision::Steady)
    }

    /// Finish the cutover after the caller has quiesced the primary's
    /// agents: state goes to the shared store, then the ledger flips.
    /// Order matters; the failover side only acts on the flipped ledger,
    /// by which time the state it needs is already uploaded.
    pub async fn complete_switch(&mut self, now: DateTime<Utc>) -> anyhow::Result<()> {
        self.push_state_to_shared().await?;
        self.ledger.active_environment = Environment::Failover;
        self.ledger.last_switch_at = Some(now);
        self.persist_and_mirror().await?;
        info!("FailoverOrchestrator: cutover complete, failover environment is active");
        Ok(())
    }

    pub async fn push_state_to_shared(&self) -> anyhow::Result<usize> {
        let mut pushed = 0;
        for (key, path) in self.store.handoff_artifacts() {
            match std::fs::read(&path) {
                Ok(bytes) => {
                    self.shared.put(key, bytes).await?;
                    pushed += 1;
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    debug!("FailoverOrchestrator: no {key} to push");
                }
                Err(e) => return Err(e.into()),
            }
        }
        info!("FailoverOrchestrator: pushed {pushed} state artifacts to shared store");
        Ok(pushed)
    }

    pub async fn pull_state_from_shared(&self) -> anyhow::Result<usize> {
        let mut pulled = 0;
        for (key, path) in self.store.handoff_artifacts() {
            if let Some(bytes) = self.shared.get(key).await? {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                let tmp = path.with_extension(format!("tmp.{}", std::process::id()));
                std::fs::write(&tmp, &bytes)?;
                std::fs::rename(&tmp, &path)?;
                pulled += 1;
            }
        }
        info!("FailoverOrchestrator: pulled {pulled} state artifacts from shared store");
        Ok(pulled)
    }

    /// The environment the shared ledger says should be running agents.
    /// Used by the failover-role supervisor, which has no local ledger
    /// authority.
    pub async fn shared_active_environment(&self) -> anyhow::Result<Environment> {
        match self.shared.get(LEDGER_KEY).await? {
            Some(bytes) => {
                let ledger: UsageLedger = serde_json::from_slice(&bytes)?;
                Ok(ledger.active_environment)
            }
            None => Ok(Environment::Primary),
        }
    }

    async fn persist_and_mirror(&self) -> anyhow::Result<()> {
        self.store
            .write_json(&self.store.paths().usage_ledger(), &self.ledger)?;
        let bytes = serde_json::to_vec_pretty(&self.ledger)?;
        self.shared.put(LEDGER_KEY, bytes).await?;
        Ok(())
    }
}

/// Pings the primary's health endpoint so the platform does not
/// idle-evict it. Entirely separate from the hours counter.
pub struct KeepAlivePinger {
    url: String,
    interval: Duration,
    client: reqwest::Client,
}

impl KeepAlivePinger {
    pub fn new(url: String, interval: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            url,
            interval,
            client,
        }
    }

    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match self.client.get(&self.url).send().await {
                Ok(response) => {
                    debug!("KeepAlivePinger: {} -> {}", self.url, response.status())
                }
                Err(e) => warn!("KeepAlivePinger: ping of {} failed: {e}", self.url),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::persistence::{ObjectSharedStore, StatePaths};
    use rust_decimal_macros::dec;

    fn fixtures() -> (StateStore, Arc<dyn SharedStore>) {
        let id = uuid::Uuid::new_v4();
        let store = StateStore::new(StatePaths::new(
            std::env::temp_dir().join(format!("neolight-fo-{id}")),
        ));
        store.ensure_dirs().unwrap();
        let shared: Arc<dyn SharedStore> = Arc::new(
            ObjectSharedStore::local(&std::env::temp_dir().join(format!("neolight-fos-{id}")))
                .unwrap(),
        );
        (store, shared)
    }

    #[tokio::test]
    async fn hours_accrue_only_while_agents_run() {
        let (store, shared) = fixtures();
        let mut orch = FailoverOrchestrator::load(store, shared, 650.0, 720.0).unwrap();

        let now = Utc::now();
        orch.tick(now, Duration::from_secs(3600), false).await.unwrap();
        assert_eq!(orch.ledger().primary_hours_used_this_period, 0.0);

        orch.tick(now, Duration::from_secs(3600), true).await.unwrap();
        assert!((orch.ledger().primary_hours_used_this_period - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn warn_then_switch_thresholds() {
        let (store, shared) = fixtures();
        let mut orch = FailoverOrchestrator::load(store, shared, 2.0, 3.0).unwrap();
        let now = Utc::now();

        let decision = orch.tick(now, Duration::from_secs(3600), true).await.unwrap();
        assert_eq!(decision, FailoverDecision::Steady);

        let decision = orch.tick(now, Duration::from_secs(3600), true).await.unwrap();
        assert_eq!(decision, FailoverDecision::Warn);

        let decision = orch.tick(now, Duration::from_secs(3600), true).await.unwrap();
        assert_eq!(decision, FailoverDecision::SwitchToFailover);
    }

    #[tokio::test]
    async fn cutover_flips_ledger_and_uploads_state() {
        let (store, shared) = fixtures();

        // Seed a broker snapshot that must cross the boundary.
        store
            .save_broker_state(&crate::domain::trading::BrokerState::new(dec!(50000)))
            .unwrap();

        let mut orch =
            FailoverOrchestrator::load(store.clone(), shared.clone(), 2.0, 3.0).unwrap();
        orch.complete_switch(Utc::now()).await.unwrap();

        assert_eq!(orch.ledger().active_environment, Environment::Failover);
        assert!(orch.ledger().last_switch_at.is_some());

        // The failover side sees both the ledger and the state.
        assert_eq!(
            orch.shared_active_environment().await.unwrap(),
            Environment::Failover
        );
        assert!(
            shared
                .get("state/broker_state.json")
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn period_boundary_resets_to_primary() {
        let (store, shared) = fixtures();

        // Persist a ledger from a previous month, deep into failover.
        let old = UsageLedger {
            primary_hours_used_this_period: 720.0,
            period_start: NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
            active_environment: Environment::Failover,
            last_switch_at: None,
        };
        store
            .write_json(&store.paths().usage_ledger(), &old)
            .unwrap();

        let mut orch = FailoverOrchestrator::load(store, shared, 650.0, 720.0).unwrap();
        let decision = orch
            .tick(Utc::now(), Duration::from_secs(60), false)
            .await
            .unwrap();

        assert_eq!(decision, FailoverDecision::Reset);
        assert_eq!(orch.ledger().active_environment, Environment::Primary);
        assert_eq!(orch.ledger().primary_hours_used_this_period, 0.0);
    }

    #[tokio::test]
    async fn corrupt_ledger_is_refused() {
        let (store, shared) = fixtures();
        std::fs::write(store.paths().usage_ledger(), b"]]").unwrap();
        assert!(FailoverOrchestrator::load(store, shared, 1.0, 2.0).is_err());
    }
}
