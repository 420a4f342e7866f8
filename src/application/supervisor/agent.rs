use crate::domain::errors::StateError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;

/// One roster entry from the declarative agent configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSpec {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Required agents abort the supervisor when they fail to start.
    #[serde(default)]
    pub required: bool,
    /// Lower numbers launch first.
    #[serde(default)]
    pub priority: i32,
}

/// Load and order the roster. A missing file is an empty roster, which
/// the supervisor treats as a clean no-op run.
pub fn load_roster(path: &Path) -> Result<Vec<AgentSpec>, StateError> {
    let body = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(StateError::Io {
                path: path.display().to_string(),
                source: e,
            });
        }
    };
    let mut roster: Vec<AgentSpec> =
        serde_json::from_slice(&body).map_err(|e| StateError::Corrupt {
            path: path.display().to_string(),
            detail: e.to_string(),
        })?;
    roster.sort_by_key(|spec| spec.priority);

    let mut seen = std::collections::HashSet::new();
    for spec in &roster {
        if !seen.insert(spec.name.clone()) {
            return Err(StateError::Corrupt {
                path: path.display().to_string(),
                detail: format!("duplicate agent name '{}'", spec.name),
            });
        }
    }
    Ok(roster)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Running,
    /// Crashed; waiting out the restart backoff.
    Backoff,
    Stopped,
    /// Gave up or never started.
    Failed,
}

/// Live view of one managed agent, shared with the HTTP surface.
#[derive(Debug, Clone, Serialize)]
pub struct AgentView {
    pub name: String,
    pub status: AgentStatus,
    pub pid: Option<u32>,
    pub started_at: Option<DateTime<Utc>>,
    pub restarts: u32,
    pub last_exit_code: Option<i32>,
}

impl AgentView {
    pub fn idle(name: &str) -> Self {
        Self {
            name: name.to_string(),
            status: AgentStatus::Stopped,
            pid: None,
            started_at: None,
            restarts: 0,
            last_exit_code: None,
        }
    }
}

pub type AgentRegistry = Arc<RwLock<HashMap<String, AgentView>>>;
