use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ManagerState {
    Stopped,
    Running,
    /// Waiting out the restart delay after a loop failure.
    Restarting,
    /// Restart budget exhausted; stays here until started explicitly.
    Failed,
}

impl ManagerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ManagerState::Stopped => "stopped",
            ManagerState::Running => "running",
            ManagerState::Restarting => "restarting",
            ManagerState::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub is_healthy: bool,
    pub state: ManagerState,
    pub last_tick: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub subscriber_count: usize,
}
