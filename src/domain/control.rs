use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Trading mode, read from `state/trading_mode.json` at startup.
/// Changing the mode requires a restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradingMode {
    Paper,
    Live,
    Test,
}

impl FromStr for TradingMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "paper" => Ok(TradingMode::Paper),
            "live" => Ok(TradingMode::Live),
            "test" => Ok(TradingMode::Test),
            _ => anyhow::bail!("Invalid TRADING_MODE: {}. Must be 'paper', 'live' or 'test'", s),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModeFile {
    pub mode: TradingMode,
    pub timestamp: DateTime<Utc>,
}

/// External brain output consumed each tick. Absent file falls back to
/// `Default`, values are clamped into [0,1] on load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrainState {
    pub risk_scaler: f64,
    pub confidence: f64,
    #[serde(default)]
    pub updated: Option<DateTime<Utc>>,
}

impl BrainState {
    pub fn clamped(mut self) -> Self {
        self.risk_scaler = self.risk_scaler.clamp(0.0, 1.0);
        self.confidence = self.confidence.clamp(0.0, 1.0);
        self
    }
}

impl Default for BrainState {
    fn default() -> Self {
        Self {
            risk_scaler: 1.0,
            confidence: 0.5,
            updated: None,
        }
    }
}

/// Which deployment environment a supervisor instance is running in.
/// At most one environment issues orders at a time; the usage ledger's
/// transition protocol enforces the handoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Environment {
    Primary,
    Failover,
}

impl FromStr for Environment {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "primary" => Ok(Environment::Primary),
            "failover" => Ok(Environment::Failover),
            _ => anyhow::bail!("Invalid ENVIRONMENT: {}. Must be 'primary' or 'failover'", s),
        }
    }
}

/// Guardian pause flag. Presence with `paused: true` halts new trades;
/// allocations are held constant while paused.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GuardianPause {
    #[serde(default)]
    pub paused: bool,
    #[serde(default)]
    pub reason: Option<String>,
}
