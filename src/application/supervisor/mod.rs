// Lifecycle manager for long-running agents and the cloud-failover
// orchestrator.
pub mod agent;
pub mod failover;
pub mod lockfile;

pub use agent::{AgentRegistry, AgentSpec, AgentStatus, AgentView, load_roster};
pub use failover::{FailoverDecision, FailoverOrchestrator, KeepAlivePinger, UsageLedger};
pub use lockfile::{LockFile, LockOutcome};

use crate::infrastructure::persistence::StateStore;
use chrono::Utc;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::{Child, Command};
use tokio::sync::{RwLock, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub initial_backoff: Duration,
    pub backoff_cap: Duration,
    /// Uptime after which the restart backoff resets.
    pub stability_window: Duration,
    /// SIGTERM-to-SIGKILL grace on shutdown.
    pub shutdown_grace: Duration,
}

/// Owns the lifecycle of all managed agents. Each supervisor-agent link
/// is isolated in its own monitor task; a crash in one agent never
/// cascades, and no agent code mutates supervisor state.
pub struct Supervisor {
    store: StateStore,
    config: SupervisorConfig,
    roster: Vec<AgentSpec>,
    registry: AgentRegistry,
    shutdown_tx: Option<watch::Sender<bool>>,
    tasks: Vec<JoinHandle<()>>,
}

impl Supervisor {
    pub fn new(store: StateStore, config: SupervisorConfig, roster: Vec<AgentSpec>) -> Self {
        let registry: AgentRegistry = Arc::new(RwLock::new(HashMap::new()));
        Self {
            store,
            config,
            roster,
            registry,
            shutdown_tx: None,
            tasks: Vec::new(),
        }
    }

    pub fn registry(&self) -> AgentRegistry {
        self.registry.clone()
    }

    pub fn roster_len(&self) -> usize {
        self.roster.len()
    }

    pub async fn running_count(&self) -> usize {
        self.registry
            .read()
            .await
            .values()
            .filter(|v| v.status == AgentStatus::Running)
            .count()
    }

    /// Launch every agent in priority order. Idempotent against a second
    /// supervisor: agents whose lock is held by a live PID are skipped.
    /// A required agent that fails to start aborts the whole launch.
    pub async fn start(&mut self) -> anyhow::Result<()> {
        let (tx, _) = watch::channel(false);
        self.shutdown_tx = Some(tx);

        for spec in self.roster.clone() {
            self.registry
                .write()
                .await
                .entry(spec.name.clone())
                .or_insert_with(|| AgentView::idle(&spec.name));

            match self.launch_agent(&spec).await {
                Ok(true) => info!("Supervisor: launched agent '{}'", spec.name),
                Ok(false) => {
                    info!(
                        "Supervisor: agent '{}' already running elsewhere, skipping",
                        spec.name
                    );
                }
                Err(e) => {
                    if spec.required {
                        anyhow::bail!("required agent '{}' failed to start: {e}", spec.name);
                    }
                    warn!(
                        "Supervisor: optional agent '{}' failed to start, degrading: {e}",
                        spec.name
                    );
                    if let Some(view) = self.registry.write().await.get_mut(&spec.name) {
                        view.status = AgentStatus::Failed;
                    }
                }
            }
        }
        Ok(())
    }

    async fn launch_agent(&mut self, spec: &AgentSpec) -> anyhow::Result<bool> {
        let lock_path = self.store.paths().agent_lock(&spec.name);
        let lock = match LockFile::acquire(&lock_path, std::process::id())? {
            LockOutcome::Acquired(lock) => lock,
            LockOutcome::HeldByLive(_) => return Ok(false),
        };

        let child = match spawn_child(spec, &self.store) {
            Ok(child) => child,
            Err(e) => {
                lock.release();
                return Err(e.into());
            }
        };

        let shutdown_rx = self
            .shutdown_tx
            .as_ref()
            .expect("start() creates the channel")
            .subscribe();
        let task = tokio::spawn(monitor_agent(
            spec.clone(),
            child,
            self.store.clone(),
            self.registry.clone(),
            shutdown_rx,
            self.config.clone(),
            lock,
        ));
        self.tasks.push(task);
        Ok(true)
    }

    /// Stop-the-world barrier: SIGTERM all children, wait out the grace
    /// period, SIGKILL stragglers, release locks. When this returns there
    /// are zero in-flight orders in any child.
    pub async fn stop_agents(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(true);
        }
        for task in self.tasks.drain(..) {
            // Monitor tasks enforce the grace window themselves; the
            // extra margin covers scheduling.
            if tokio::time::timeout(self.config.shutdown_grace + Duration::from_secs(10), task)
                .await
                .is_err()
            {
                warn!("Supervisor: monitor task did not settle within grace");
            }
        }
        info!("Supervisor: all agents stopped");
    }
}

fn spawn_child(spec: &AgentSpec, store: &StateStore) -> std::io::Result<Child> {
    let log_path = store.paths().agent_log(&spec.name);
    let log = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;
    let log_err = log.try_clone()?;

    let child = Command::new(&spec.command)
        .args(&spec.args)
        .stdin(Stdio::null())
        .stdout(Stdio::from(log))
        .stderr(Stdio::from(log_err))
        .spawn()?;

    if let Some(pid) = child.id() {
        let _ = std::fs::write(store.paths().agent_pid(&spec.name), pid.to_string());
    }
    Ok(child)
}

async fn monitor_agent(
    spec: AgentSpec,
    mut child: Child,
    store: StateStore,
    registry: AgentRegistry,
    mut shutdown: watch::Receiver<bool>,
    config: SupervisorConfig,
    lock: LockFile,
) {
    let mut backoff = config.initial_backoff;
    let mut restarts = 0u32;

    'run: loop {
        let started = Instant::now();
        {
            let mut reg = registry.write().await;
            let view = reg
                .entry(spec.name.clone())
                .or_insert_with(|| AgentView::idle(&spec.name));
            view.status = AgentStatus::Running;
            view.pid = child.id();
            view.started_at = Some(Utc::now());
            view.restarts = restarts;
        }

        tokio::select! {
            status = child.wait() => {
                let code = status.ok().and_then(|s| s.code());
                {
                    let mut reg = registry.write().await;
                    if let Some(view) = reg.get_mut(&spec.name) {
                        view.last_exit_code = code;
                        view.pid = None;
                    }
                }

                if *shutdown.borrow() {
                    set_status(&registry, &spec.name, AgentStatus::Stopped).await;
                    break 'run;
                }

                if code == Some(0) {
                    info!("Supervisor: agent '{}' exited cleanly", spec.name);
                    set_status(&registry, &spec.name, AgentStatus::Stopped).await;
                    break 'run;
                }

                // Stable uptime earns a fresh backoff.
                if started.elapsed() >= config.stability_window {
                    backoff = config.initial_backoff;
                }
                restarts += 1;
                warn!(
                    "Supervisor: agent '{}' exited with code {:?} (restart #{restarts}, backoff {:?})",
                    spec.name, code, backoff
                );
                set_status(&registry, &spec.name, AgentStatus::Backoff).await;

                tokio::select! {
                    _ = tokio::time::sleep(backoff) => {}
                    _ = wait_for_shutdown(&mut shutdown) => {
                        set_status(&registry, &spec.name, AgentStatus::Stopped).await;
                        break 'run;
                    }
                }
                backoff = (backoff * 2).min(config.backoff_cap);

                match spawn_child(&spec, &store) {
                    Ok(new_child) => {
                        child = new_child;
                        continue 'run;
                    }
                    Err(e) => {
                        error!(
                            "Supervisor: relaunch of '{}' failed: {e}; giving up",
                            spec.name
                        );
                        set_status(&registry, &spec.name, AgentStatus::Failed).await;
                        break 'run;
                    }
                }
            }
            _ = wait_for_shutdown(&mut shutdown) => {
                graceful_stop(&spec.name, &mut child, config.shutdown_grace).await;
                set_status(&registry, &spec.name, AgentStatus::Stopped).await;
                break 'run;
            }
        }
    }

    let _ = std::fs::remove_file(store.paths().agent_pid(&spec.name));
    lock.release();
}

async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            return;
        }
        if shutdown.changed().await.is_err() {
            // Sender dropped: treat as shutdown.
            return;
        }
    }
}

async fn set_status(registry: &AgentRegistry, name: &str, status: AgentStatus) {
    let mut reg = registry.write().await;
    if let Some(view) = reg.get_mut(name) {
        view.status = status;
        if status != AgentStatus::Running {
            view.pid = None;
        }
    }
}

async fn graceful_stop(name: &str, child: &mut Child, grace: Duration) {
    if let Some(pid) = child.id() {
        info!("Supervisor: sending SIGTERM to '{name}' (pid {pid})");
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
    }
    match tokio::time::timeout(grace, child.wait()).await {
        Ok(_) => info!("Supervisor: '{name}' terminated within grace"),
        Err(_) => {
            warn!("Supervisor: '{name}' ignored SIGTERM, killing");
            let _ = child.kill().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::persistence::StatePaths;

    fn store() -> StateStore {
        let dir = std::env::temp_dir().join(format!("neolight-sup-{}", uuid::Uuid::new_v4()));
        let store = StateStore::new(StatePaths::new(dir));
        store.ensure_dirs().unwrap();
        store
    }

    fn config() -> SupervisorConfig {
        SupervisorConfig {
            initial_backoff: Duration::from_millis(50),
            backoff_cap: Duration::from_millis(200),
            stability_window: Duration::from_secs(60),
            shutdown_grace: Duration::from_secs(2),
        }
    }

    fn spec(name: &str, command: &str, args: &[&str]) -> AgentSpec {
        AgentSpec {
            name: name.to_string(),
            command: command.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
            required: false,
            priority: 0,
        }
    }

    #[tokio::test]
    async fn short_lived_agent_is_restarted_with_backoff() {
        let store = store();
        let mut supervisor = Supervisor::new(
            store.clone(),
            config(),
            vec![spec("flaky", "false", &[])],
        );
        supervisor.start().await.unwrap();

        // `false` exits 1 immediately; after a few backoff rounds the
        // restart counter must have advanced.
        tokio::time::sleep(Duration::from_millis(400)).await;
        let restarts = supervisor.registry().read().await["flaky"].restarts;
        assert!(restarts >= 1, "expected restarts, saw {restarts}");

        supervisor.stop_agents().await;
    }

    #[tokio::test]
    async fn clean_exit_is_not_restarted() {
        let store = store();
        let mut supervisor = Supervisor::new(
            store.clone(),
            config(),
            vec![spec("oneshot", "true", &[])],
        );
        supervisor.start().await.unwrap();

        tokio::time::sleep(Duration::from_millis(300)).await;
        let view = supervisor.registry().read().await["oneshot"].clone();
        assert_eq!(view.status, AgentStatus::Stopped);
        assert_eq!(view.restarts, 0);
        assert_eq!(view.last_exit_code, Some(0));

        supervisor.stop_agents().await;
    }

    #[tokio::test]
    async fn required_agent_that_cannot_spawn_aborts_start() {
        let store = store();
        let mut supervisor = Supervisor::new(
            store.clone(),
            config(),
            vec![AgentSpec {
                name: "ghost".into(),
                command: "/nonexistent/binary".into(),
                args: vec![],
                required: true,
                priority: 0,
            }],
        );
        assert!(supervisor.start().await.is_err());
    }

    #[tokio::test]
    async fn second_start_against_held_lock_is_noop() {
        let store = store();
        let spec = spec("sleeper", "sleep", &["30"]);

        let mut first = Supervisor::new(store.clone(), config(), vec![spec.clone()]);
        first.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(first.running_count().await, 1);

        let mut second = Supervisor::new(store.clone(), config(), vec![spec]);
        second.start().await.unwrap();
        // The second supervisor must not have spawned anything.
        assert_eq!(second.running_count().await, 0);

        second.stop_agents().await;
        first.stop_agents().await;
    }

    #[tokio::test]
    async fn stop_agents_terminates_children_and_releases_locks() {
        let store = store();
        let mut supervisor = Supervisor::new(
            store.clone(),
            config(),
            vec![spec("sleeper", "sleep", &["30"])],
        );
        supervisor.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let pid = supervisor.registry().read().await["sleeper"].pid.unwrap();
        assert!(lockfile::pid_alive(pid));

        supervisor.stop_agents().await;
        assert!(!lockfile::pid_alive(pid));
        assert!(!store.paths().agent_lock("sleeper").exists());
        assert!(!store.paths().agent_pid("sleeper").exists());
    }
}
