use crate::domain::control::{BrainState, GuardianPause, ModeFile};
use crate::domain::errors::StateError;
use crate::domain::risk::RiskState;
use crate::domain::trading::BrokerState;
use crate::domain::trading::types::TradeEvent;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Resolves every path in the filesystem contract from one data root.
#[derive(Debug, Clone)]
pub struct StatePaths {
    data_dir: PathBuf,
}

impl StatePaths {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn state_dir(&self) -> PathBuf {
        self.data_dir.join("state")
    }

    pub fn runtime_dir(&self) -> PathBuf {
        self.data_dir.join("runtime")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }

    pub fn run_dir(&self) -> PathBuf {
        self.data_dir.join("run")
    }

    pub fn broker_state(&self) -> PathBuf {
        self.state_dir().join("broker_state.json")
    }

    pub fn risk_state(&self) -> PathBuf {
        self.state_dir().join("risk_state.json")
    }

    pub fn trading_mode(&self) -> PathBuf {
        self.state_dir().join("trading_mode.json")
    }

    pub fn guardian_pause(&self) -> PathBuf {
        self.state_dir().join("guardian_pause.json")
    }

    pub fn halt_trading(&self) -> PathBuf {
        self.state_dir().join("halt_trading.json")
    }

    pub fn usage_ledger(&self) -> PathBuf {
        self.state_dir().join("usage_ledger.json")
    }

    pub fn brain_state(&self) -> PathBuf {
        self.runtime_dir().join("brain_state.json")
    }

    pub fn allocations_override(&self) -> PathBuf {
        self.runtime_dir().join("allocations_override.json")
    }

    pub fn allocations_symbols(&self) -> PathBuf {
        self.runtime_dir().join("allocations_symbols.json")
    }

    pub fn trade_loop_metrics(&self) -> PathBuf {
        self.runtime_dir().join("metrics").join("trade_loop.json")
    }

    pub fn trade_events(&self) -> PathBuf {
        self.logs_dir().join("trade_events.jsonl")
    }

    pub fn agent_log(&self, agent: &str) -> PathBuf {
        self.logs_dir().join(format!("{agent}.log"))
    }

    pub fn agent_pid(&self, agent: &str) -> PathBuf {
        self.run_dir().join(format!("{agent}.pid"))
    }

    pub fn agent_lock(&self, agent: &str) -> PathBuf {
        self.run_dir().join(format!("{agent}.lock"))
    }
}

/// Disk-backed key-value store for all durable state. Every write is
/// write-temp-then-rename so readers in other processes only ever see a
/// complete snapshot.
#[derive(Debug, Clone)]
pub struct StateStore {
    paths: StatePaths,
}

impl StateStore {
    pub fn new(paths: StatePaths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &StatePaths {
        &self.paths
    }

    pub fn ensure_dirs(&self) -> Result<(), StateError> {
        for dir in [
            self.paths.state_dir(),
            self.paths.runtime_dir(),
            self.paths.runtime_dir().join("metrics"),
            self.paths.logs_dir(),
            self.paths.run_dir(),
        ] {
            fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
        }
        Ok(())
    }

    /// Atomic JSON write: temp file in the same directory, then rename.
    pub fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> Result<(), StateError> {
        let body = serde_json::to_vec_pretty(value).map_err(|e| StateError::Corrupt {
            path: path.display().to_string(),
            detail: format!("serialize: {e}"),
        })?;
        let tmp = path.with_extension(format!("tmp.{}", std::process::id()));
        fs::write(&tmp, &body).map_err(|e| io_err(&tmp, e))?;
        fs::rename(&tmp, path).map_err(|e| io_err(path, e))?;
        Ok(())
    }

    /// Read JSON; a missing file is `None`, an unparseable one is
    /// `StateError::Corrupt` for the caller to classify.
    pub fn read_json<T: DeserializeOwned>(&self, path: &Path) -> Result<Option<T>, StateError> {
        let body = match fs::read(path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_err(path, e)),
        };
        serde_json::from_slice(&body)
            .map(Some)
            .map_err(|e| StateError::Corrupt {
                path: path.display().to_string(),
                detail: e.to_string(),
            })
    }

    // ----- typed accessors -----

    pub fn load_broker_state(&self) -> Result<Option<BrokerState>, StateError> {
        let state: Option<BrokerState> = self.read_json(&self.paths.broker_state())?;
        if let Some(ref s) = state {
            s.validate().map_err(|detail| StateError::Corrupt {
                path: self.paths.broker_state().display().to_string(),
                detail,
            })?;
        }
        Ok(state)
    }

    pub fn save_broker_state(&self, state: &BrokerState) -> Result<(), StateError> {
        self.write_json(&self.paths.broker_state(), state)
    }

    pub fn load_risk_state(&self) -> Result<Option<RiskState>, StateError> {
        self.read_json(&self.paths.risk_state())
    }

    pub fn save_risk_state(&self, state: &RiskState) -> Result<(), StateError> {
        self.write_json(&self.paths.risk_state(), state)
    }

    pub fn load_trading_mode(&self) -> Result<Option<ModeFile>, StateError> {
        self.read_json(&self.paths.trading_mode())
    }

    pub fn save_trading_mode(&self, mode: &ModeFile) -> Result<(), StateError> {
        self.write_json(&self.paths.trading_mode(), mode)
    }

    /// Brain state is advisory: absent or unparseable files degrade to the
    /// defaults with a warning rather than stopping the loop.
    pub fn load_brain_state(&self) -> BrainState {
        match self.read_json::<BrainState>(&self.paths.brain_state()) {
            Ok(Some(b)) => b.clamped(),
            Ok(None) => BrainState::default(),
            Err(e) => {
                warn!("Brain state unreadable, using defaults: {e}");
                BrainState::default()
            }
        }
    }

    pub fn guardian_paused(&self) -> bool {
        match self.read_json::<GuardianPause>(&self.paths.guardian_pause()) {
            Ok(Some(p)) => p.paused,
            Ok(None) => false,
            Err(e) => {
                // An unreadable pause file halts trading; failing open
                // would defeat its purpose.
                warn!("Guardian pause file unreadable, treating as paused: {e}");
                true
            }
        }
    }

    pub fn read_allocations_override(
        &self,
    ) -> Result<Option<HashMap<String, f64>>, StateError> {
        self.read_json(&self.paths.allocations_override())
    }

    pub fn read_allocations_symbols(
        &self,
    ) -> Result<Option<HashMap<String, f64>>, StateError> {
        self.read_json(&self.paths.allocations_symbols())
    }

    pub fn append_trade_event(&self, event: &TradeEvent) -> Result<(), StateError> {
        let path = self.paths.trade_events();
        let line = serde_json::to_string(event).map_err(|e| StateError::Corrupt {
            path: path.display().to_string(),
            detail: format!("serialize: {e}"),
        })?;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| io_err(&path, e))?;
        writeln!(file, "{line}").map_err(|e| io_err(&path, e))?;
        Ok(())
    }

    /// Files that cross the environment boundary during a failover
    /// cutover, as (shared-store key, local path) pairs.
    pub fn handoff_artifacts(&self) -> Vec<(&'static str, PathBuf)> {
        vec![
            ("state/broker_state.json", self.paths.broker_state()),
            ("state/risk_state.json", self.paths.risk_state()),
            ("state/usage_ledger.json", self.paths.usage_ledger()),
            (
                "runtime/allocations_symbols.json",
                self.paths.allocations_symbols(),
            ),
            (
                "runtime/allocations_override.json",
                self.paths.allocations_override(),
            ),
            ("runtime/brain_state.json", self.paths.brain_state()),
        ]
    }
}

fn io_err(path: &Path, source: std::io::Error) -> StateError {
    StateError::Io {
        path: path.display().to_string(),
        source,
    }
}
