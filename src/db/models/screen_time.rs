use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScreenTimeRecord {
    pub id: i64,
    pub executable_path: String,
    /// Anchor of the row; moved forward on every flush so the row stays inside
    /// the recency window while its executable keeps focus.
    pub timestamp: DateTime<Utc>,
    pub duration_seconds: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScreenTimeTotal {
    pub executable_path: String,
    pub duration_seconds: i64,
}
