use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One row of usage history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppEvent {
    pub id: i64,
    pub process_name: String,
    pub pid: u32,
    pub parent_process_name: Option<String>,
    pub exe_path: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    /// Text form of the `UniqueKey` that closes this row.
    pub process_instance_key: Option<String>,
}

impl AppEvent {
    pub fn is_open(&self) -> bool {
        self.end_time.is_none()
    }
}

/// An AppEvent still waiting for its end time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveSession {
    pub process_name: String,
    pub process_instance_key: String,
}
