//! Process identity and snapshot types shared by every consumer of the sensor.

use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stable identity of one process instance.
///
/// The OS recycles pids, so a pid alone can name two different programs over
/// the lifetime of the machine. Pairing it with the creation time gives a key
/// that never changes for an instance and never collides across instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UniqueKey {
    pub pid: u32,
    pub start_time_ns: u64,
}

impl UniqueKey {
    pub fn new(pid: u32, start_time_ns: u64) -> Self {
        Self { pid, start_time_ns }
    }
}

impl fmt::Display for UniqueKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.pid, self.start_time_ns)
    }
}

impl FromStr for UniqueKey {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        let (pid, start) = value
            .split_once('-')
            .ok_or_else(|| anyhow!("process instance key '{value}' has no separator"))?;
        let pid = pid
            .parse::<u32>()
            .map_err(|err| anyhow!("invalid pid in key '{value}': {err}"))?;
        let start_time_ns = start
            .parse::<u64>()
            .map_err(|err| anyhow!("invalid start time in key '{value}': {err}"))?;
        Ok(Self { pid, start_time_ns })
    }
}

/// One process instance as observed at sample time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub pid: u32,
    pub parent_pid: u32,
    /// Creation time in nanoseconds since the Unix epoch, at the best precision
    /// the platform offers.
    pub start_time_ns: u64,
    /// Executable base name.
    pub name: String,
    /// Full executable path; empty when the OS refused to reveal it.
    pub exe_path: String,
}

impl ProcessInfo {
    pub fn unique_key(&self) -> UniqueKey {
        UniqueKey::new(self.pid, self.start_time_ns)
    }

    pub fn name_lower(&self) -> String {
        self.name.to_lowercase()
    }
}

/// Immutable capture of every visible process, shared read-only by all
/// subscribers of one tick.
#[derive(Debug, Clone)]
pub struct ProcessSnapshot {
    pub processes: Vec<ProcessInfo>,
    pub captured_at: DateTime<Utc>,
}

impl ProcessSnapshot {
    pub fn new(processes: Vec<ProcessInfo>) -> Self {
        Self::at(processes, Utc::now())
    }

    pub fn at(processes: Vec<ProcessInfo>, captured_at: DateTime<Utc>) -> Self {
        Self {
            processes,
            captured_at,
        }
    }

    pub fn keys(&self) -> std::collections::HashSet<UniqueKey> {
        self.processes.iter().map(ProcessInfo::unique_key).collect()
    }
}
