//! Deny-list enforcement: any process whose name is on the list is killed.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use log::{info, warn};
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

use crate::sensing::{ProcessInfo, ProcessSnapshot};

use super::subscriber::ProcessSubscriber;

pub const SUBSCRIBER_NAME: &str = "BlocklistSubscriber";

pub trait BlocklistProvider: Send + Sync {
    /// Lowercase executable names that must not run.
    fn load_blocklist(&self) -> Result<HashSet<String>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Added,
    Exists,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    Removed,
    NotFound,
}

/// Deny-list kept as a JSON array of names. A missing file is an empty list.
pub struct JsonBlocklist {
    path: PathBuf,
    edit_lock: Mutex<()>,
}

impl JsonBlocklist {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            edit_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_entries(&self) -> Result<Vec<String>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read blocklist from {}", self.path.display()))?;
        if contents.trim().is_empty() {
            return Ok(Vec::new());
        }
        let entries: Vec<String> = serde_json::from_str(&contents)
            .with_context(|| format!("Blocklist {} is not a JSON array", self.path.display()))?;

        let mut seen = HashSet::new();
        Ok(entries
            .into_iter()
            .map(|entry| entry.trim().to_lowercase())
            .filter(|entry| !entry.is_empty() && seen.insert(entry.clone()))
            .collect())
    }

    fn write_entries(&self, entries: &[String]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let serialized = serde_json::to_string_pretty(entries)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write blocklist to {}", self.path.display()))
    }

    fn edit<T>(&self, apply: impl FnOnce(&mut Vec<String>) -> (T, bool)) -> Result<T> {
        let _guard = match self.edit_lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut entries = self.read_entries()?;
        let (outcome, changed) = apply(&mut entries);
        if changed {
            self.write_entries(&entries)?;
        }
        Ok(outcome)
    }

    pub fn add(&self, name: &str) -> Result<AddOutcome> {
        let name = name.trim().to_lowercase();
        if name.is_empty() {
            bail!("blocklist entry must not be empty");
        }
        self.edit(|entries| {
            if entries.contains(&name) {
                (AddOutcome::Exists, false)
            } else {
                entries.push(name);
                (AddOutcome::Added, true)
            }
        })
    }

    pub fn remove(&self, name: &str) -> Result<RemoveOutcome> {
        let name = name.trim().to_lowercase();
        self.edit(|entries| match entries.iter().position(|entry| *entry == name) {
            Some(index) => {
                entries.remove(index);
                (RemoveOutcome::Removed, true)
            }
            None => (RemoveOutcome::NotFound, false),
        })
    }

    pub fn clear(&self) -> Result<()> {
        self.edit(|entries| {
            entries.clear();
            ((), true)
        })
    }
}

impl BlocklistProvider for JsonBlocklist {
    fn load_blocklist(&self) -> Result<HashSet<String>> {
        Ok(self.read_entries()?.into_iter().collect())
    }
}

pub trait ProcessTerminator: Send + Sync {
    fn terminate(&self, process: &ProcessInfo) -> Result<()>;
}

/// Kills through sysinfo after confirming the pid still belongs to the
/// process seen in the snapshot.
#[derive(Debug, Default)]
pub struct SysinfoTerminator;

impl ProcessTerminator for SysinfoTerminator {
    fn terminate(&self, process: &ProcessInfo) -> Result<()> {
        let pid = Pid::from_u32(process.pid);
        let mut system = System::new();
        system.refresh_processes_specifics(ProcessesToUpdate::Some(&[pid]), ProcessRefreshKind::new());

        let Some(live) = system.process(pid) else {
            bail!("process {} already exited", process.pid);
        };
        if live.thread_kind().is_some() {
            bail!("pid {} is a thread, not a process", process.pid);
        }
        let live_name = live.name().to_string_lossy().to_lowercase();
        if live_name != process.name_lower() {
            bail!(
                "pid {} now belongs to {live_name}, not {}",
                process.pid,
                process.name
            );
        }
        if !live.kill() {
            bail!("kill signal for pid {} was not delivered", process.pid);
        }
        Ok(())
    }
}

pub struct BlocklistSubscriber {
    provider: Arc<dyn BlocklistProvider>,
    terminator: Arc<dyn ProcessTerminator>,
    own_pid: u32,
}

impl BlocklistSubscriber {
    pub fn new(provider: Arc<dyn BlocklistProvider>, terminator: Arc<dyn ProcessTerminator>) -> Self {
        Self {
            provider,
            terminator,
            own_pid: std::process::id(),
        }
    }
}

#[async_trait]
impl ProcessSubscriber for BlocklistSubscriber {
    fn name(&self) -> &str {
        SUBSCRIBER_NAME
    }

    async fn on_processes_changed(&self, snapshot: Arc<ProcessSnapshot>) -> Result<()> {
        let blocked = match self.provider.load_blocklist() {
            Ok(blocked) => blocked,
            Err(err) => {
                warn!("Failed to load blocklist: {err:#}");
                return Ok(());
            }
        };
        if blocked.is_empty() {
            return Ok(());
        }

        for process in &snapshot.processes {
            if process.name.is_empty() || process.pid == self.own_pid {
                continue;
            }
            if !blocked.contains(&process.name_lower()) {
                continue;
            }
            match self.terminator.terminate(process) {
                Ok(()) => info!("Killed blocked process {} (pid {})", process.name, process.pid),
                Err(err) => warn!(
                    "Failed to kill blocked process {} (pid {}): {err:#}",
                    process.name, process.pid
                ),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingTerminator {
        killed: Mutex<Vec<u32>>,
        fail_for: Option<u32>,
    }

    impl ProcessTerminator for RecordingTerminator {
        fn terminate(&self, process: &ProcessInfo) -> Result<()> {
            if self.fail_for == Some(process.pid) {
                bail!("access denied");
            }
            self.killed.lock().unwrap().push(process.pid);
            Ok(())
        }
    }

    struct StaticList(HashSet<String>);

    impl BlocklistProvider for StaticList {
        fn load_blocklist(&self) -> Result<HashSet<String>> {
            Ok(self.0.clone())
        }
    }

    fn proc(pid: u32, name: &str) -> ProcessInfo {
        ProcessInfo {
            pid,
            parent_pid: 1,
            start_time_ns: 1,
            name: name.to_string(),
            exe_path: format!("C:\\Apps\\{name}"),
        }
    }

    fn list(names: &[&str]) -> Arc<StaticList> {
        Arc::new(StaticList(names.iter().map(|n| n.to_string()).collect()))
    }

    #[tokio::test]
    async fn matching_names_are_terminated_case_insensitively() {
        let terminator = Arc::new(RecordingTerminator::default());
        let subscriber = BlocklistSubscriber::new(list(&["notepad.exe"]), terminator.clone());

        let snapshot = ProcessSnapshot::new(vec![proc(100, "Notepad.EXE"), proc(101, "calc.exe")]);
        subscriber.on_processes_changed(Arc::new(snapshot)).await.unwrap();

        assert_eq!(*terminator.killed.lock().unwrap(), vec![100]);
    }

    #[tokio::test]
    async fn one_failed_kill_does_not_stop_the_rest() {
        let terminator = Arc::new(RecordingTerminator {
            fail_for: Some(1),
            ..Default::default()
        });
        let subscriber = BlocklistSubscriber::new(list(&["game.exe"]), terminator.clone());

        let snapshot = ProcessSnapshot::new(vec![proc(1, "game.exe"), proc(2, "game.exe")]);
        subscriber.on_processes_changed(Arc::new(snapshot)).await.unwrap();

        assert_eq!(*terminator.killed.lock().unwrap(), vec![2]);
    }

    #[tokio::test]
    async fn empty_list_does_nothing() {
        let terminator = Arc::new(RecordingTerminator::default());
        let subscriber = BlocklistSubscriber::new(list(&[]), terminator.clone());

        let snapshot = ProcessSnapshot::new(vec![proc(1, "anything.exe")]);
        subscriber.on_processes_changed(Arc::new(snapshot)).await.unwrap();

        assert!(terminator.killed.lock().unwrap().is_empty());
    }

    #[test]
    fn json_list_edits_are_persisted_lowercase() {
        let dir = TempDir::new().unwrap();
        let blocklist = JsonBlocklist::new(dir.path().join("nested").join("blocklist.json"));
        assert!(blocklist.load_blocklist().unwrap().is_empty());

        assert_eq!(blocklist.add("Steam.exe").unwrap(), AddOutcome::Added);
        assert_eq!(blocklist.add("steam.exe").unwrap(), AddOutcome::Exists);
        assert_eq!(blocklist.add("discord.exe").unwrap(), AddOutcome::Added);
        assert!(blocklist.load_blocklist().unwrap().contains("steam.exe"));

        assert_eq!(blocklist.remove("STEAM.exe").unwrap(), RemoveOutcome::Removed);
        assert_eq!(blocklist.remove("steam.exe").unwrap(), RemoveOutcome::NotFound);

        let reopened = JsonBlocklist::new(blocklist.path().to_path_buf());
        let loaded = reopened.load_blocklist().unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(loaded.contains("discord.exe"));

        reopened.clear().unwrap();
        assert!(reopened.load_blocklist().unwrap().is_empty());
    }

    #[test]
    fn hand_written_entries_are_normalized() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("blocklist.json");
        fs::write(&path, r#"[" Chrome.exe ", "", "chrome.exe"]"#).unwrap();

        let loaded = JsonBlocklist::new(path).load_blocklist().unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(loaded.contains("chrome.exe"));
    }
}
