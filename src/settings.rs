use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{anyhow, Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};

use crate::monitoring::MonitorConfig;
use crate::screentime::ScreenTimeConfig;

const DATA_DIR_ENV: &str = "PROCGUARD_DATA_DIR";
const APP_DIR_NAME: &str = "ProcGuard";
const DB_FILE: &str = "procguard.sqlite3";
const SETTINGS_FILE: &str = "settings.json";
const BLOCKLIST_FILE: &str = "blocklist.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    pub poll_interval_ms: u64,
    pub restart_delay_ms: u64,
    pub max_restart_retries: u32,
    pub snapshot_ttl_ms: u64,
    pub screen_time_sample_ms: u64,
    pub screen_time_flush_secs: u64,
    pub recency_window_secs: u64,
    pub write_queue_capacity: usize,
    pub persist_logs: bool,
    pub enforce_blocklist: bool,
    pub track_screen_time: bool,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2_000,
            restart_delay_ms: 5_000,
            max_restart_retries: 3,
            snapshot_ttl_ms: 500,
            screen_time_sample_ms: 1_000,
            screen_time_flush_secs: 10,
            recency_window_secs: 300,
            write_queue_capacity: 100,
            persist_logs: true,
            enforce_blocklist: true,
            track_screen_time: true,
        }
    }
}

impl AgentSettings {
    /// Missing file means defaults. An unreadable or malformed file is logged
    /// and also yields defaults, so a bad edit never keeps the agent down.
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        match Self::read(path) {
            Ok(settings) => settings.sanitized(),
            Err(err) => {
                warn!("Ignoring settings at {}: {err:#}", path.display());
                Self::default()
            }
        }
    }

    fn read(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings from {}", path.display()))?;
        serde_json::from_str(&contents).context("settings file is not valid JSON")
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let serialized = serde_json::to_string_pretty(self)?;
        fs::write(path, serialized)
            .with_context(|| format!("Failed to write settings to {}", path.display()))
    }

    /// Zero values are treated as "unset".
    pub fn sanitized(self) -> Self {
        let defaults = Self::default();
        let or_default = |value: u64, fallback: u64| if value == 0 { fallback } else { value };
        Self {
            poll_interval_ms: or_default(self.poll_interval_ms, defaults.poll_interval_ms),
            restart_delay_ms: or_default(self.restart_delay_ms, defaults.restart_delay_ms),
            max_restart_retries: if self.max_restart_retries == 0 {
                defaults.max_restart_retries
            } else {
                self.max_restart_retries
            },
            snapshot_ttl_ms: or_default(self.snapshot_ttl_ms, defaults.snapshot_ttl_ms),
            screen_time_sample_ms: or_default(
                self.screen_time_sample_ms,
                defaults.screen_time_sample_ms,
            ),
            screen_time_flush_secs: or_default(
                self.screen_time_flush_secs,
                defaults.screen_time_flush_secs,
            ),
            recency_window_secs: or_default(self.recency_window_secs, defaults.recency_window_secs),
            write_queue_capacity: if self.write_queue_capacity == 0 {
                defaults.write_queue_capacity
            } else {
                self.write_queue_capacity
            },
            ..self
        }
    }

    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            restart_delay: Duration::from_millis(self.restart_delay_ms),
            max_restart_retries: self.max_restart_retries,
        }
    }

    pub fn screen_time_config(&self) -> ScreenTimeConfig {
        ScreenTimeConfig {
            sample_interval: Duration::from_millis(self.screen_time_sample_ms),
            flush_interval: Duration::from_secs(self.screen_time_flush_secs),
            recency_window: Duration::from_secs(self.recency_window_secs),
        }
    }

    pub fn snapshot_ttl(&self) -> Duration {
        Duration::from_millis(self.snapshot_ttl_ms)
    }
}

/// Where the agent keeps its files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentPaths {
    pub data_dir: PathBuf,
}

impl AgentPaths {
    pub fn new(data_dir: PathBuf) -> Self {
        Self { data_dir }
    }

    /// `$PROCGUARD_DATA_DIR`, else `<user cache dir>/ProcGuard`.
    pub fn resolve() -> Result<Self> {
        if let Some(dir) = std::env::var_os(DATA_DIR_ENV).filter(|dir| !dir.is_empty()) {
            return Ok(Self::new(PathBuf::from(dir)));
        }
        let cache_dir =
            dirs::cache_dir().ok_or_else(|| anyhow!("could not determine the user cache directory"))?;
        Ok(Self::new(cache_dir.join(APP_DIR_NAME)))
    }

    pub fn ensure_exists(&self) -> Result<()> {
        fs::create_dir_all(&self.data_dir)
            .with_context(|| format!("Failed to create data directory {}", self.data_dir.display()))
    }

    pub fn database(&self) -> PathBuf {
        self.data_dir.join(DB_FILE)
    }

    pub fn settings(&self) -> PathBuf {
        self.data_dir.join(SETTINGS_FILE)
    }

    pub fn blocklist(&self) -> PathBuf {
        self.data_dir.join(BLOCKLIST_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        assert_eq!(
            AgentSettings::load(&dir.path().join("settings.json")),
            AgentSettings::default()
        );
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{ "poll_interval_ms": 750, "enforce_blocklist": false }"#).unwrap();

        let settings = AgentSettings::load(&path);
        assert_eq!(settings.poll_interval_ms, 750);
        assert!(!settings.enforce_blocklist);
        assert_eq!(settings.restart_delay_ms, 5_000);
        assert_eq!(settings.monitor_config().poll_interval, Duration::from_millis(750));
    }

    #[test]
    fn zero_and_malformed_values_fall_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.json");

        fs::write(&path, r#"{ "poll_interval_ms": 0, "write_queue_capacity": 0 }"#).unwrap();
        let settings = AgentSettings::load(&path);
        assert_eq!(settings.poll_interval_ms, 2_000);
        assert_eq!(settings.write_queue_capacity, 100);

        fs::write(&path, "not json").unwrap();
        assert_eq!(AgentSettings::load(&path), AgentSettings::default());
    }

    #[test]
    fn saved_settings_load_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.json");
        let settings = AgentSettings {
            track_screen_time: false,
            recency_window_secs: 60,
            ..AgentSettings::default()
        };
        settings.save(&path).unwrap();
        assert_eq!(AgentSettings::load(&path), settings);
    }

    #[test]
    fn paths_live_under_the_data_dir() {
        let paths = AgentPaths::new(PathBuf::from("/data/pg"));
        assert_eq!(paths.database(), PathBuf::from("/data/pg/procguard.sqlite3"));
        assert_eq!(paths.blocklist(), PathBuf::from("/data/pg/blocklist.json"));
    }
}
