#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use procguard_lib::monitoring::ProcessTerminator;
use procguard_lib::sensing::{
    ActiveWindow, DefaultAppFilter, ForegroundWindowProvider, ProcessInfo, ProcessSensor,
    SensorError,
};
use procguard_lib::{AgentPaths, AgentSettings, Collaborators};

pub fn app(pid: u32, start: u64, name: &str) -> ProcessInfo {
    ProcessInfo {
        pid,
        parent_pid: 1,
        start_time_ns: start,
        name: name.to_string(),
        exe_path: format!("C:\\Apps\\{name}"),
    }
}

/// A process table the test edits between ticks.
#[derive(Default)]
pub struct FakeSensor {
    processes: Mutex<Vec<ProcessInfo>>,
}

impl FakeSensor {
    pub fn with(processes: Vec<ProcessInfo>) -> Arc<Self> {
        Arc::new(Self {
            processes: Mutex::new(processes),
        })
    }

    pub fn set(&self, processes: Vec<ProcessInfo>) {
        *self.processes.lock().unwrap() = processes;
    }

    pub fn remove(&self, pid: u32) {
        self.processes.lock().unwrap().retain(|p| p.pid != pid);
    }

    pub fn contains(&self, pid: u32) -> bool {
        self.processes.lock().unwrap().iter().any(|p| p.pid == pid)
    }
}

impl ProcessSensor for FakeSensor {
    fn all_processes(&self) -> Result<Vec<ProcessInfo>, SensorError> {
        Ok(self.processes.lock().unwrap().clone())
    }

    fn process_by_pid(&self, pid: u32) -> Result<ProcessInfo, SensorError> {
        self.processes
            .lock()
            .unwrap()
            .iter()
            .find(|p| p.pid == pid)
            .cloned()
            .ok_or(SensorError::NotFound(pid))
    }
}

/// Serves a scripted sequence of focused pids, one per sample, then keeps
/// returning the last one.
pub struct ScriptedWindow {
    script: Mutex<VecDeque<Option<u32>>>,
    last: Mutex<Option<u32>>,
    samples: AtomicUsize,
}

impl ScriptedWindow {
    pub fn new(script: Vec<Option<u32>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            last: Mutex::new(None),
            samples: AtomicUsize::new(0),
        })
    }

    pub fn samples(&self) -> usize {
        self.samples.load(Ordering::SeqCst)
    }
}

impl ForegroundWindowProvider for ScriptedWindow {
    fn active_window(&self) -> Option<ActiveWindow> {
        self.samples.fetch_add(1, Ordering::SeqCst);
        let mut last = self.last.lock().unwrap();
        if let Some(next) = self.script.lock().unwrap().pop_front() {
            *last = next;
        }
        last.map(|pid| ActiveWindow {
            pid,
            title: String::new(),
        })
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

/// "Kills" by removing the process from the fake table.
pub struct FakeTerminator {
    sensor: Arc<FakeSensor>,
    pub killed: Mutex<Vec<u32>>,
}

impl FakeTerminator {
    pub fn new(sensor: Arc<FakeSensor>) -> Arc<Self> {
        Arc::new(Self {
            sensor,
            killed: Mutex::new(Vec::new()),
        })
    }
}

impl ProcessTerminator for FakeTerminator {
    fn terminate(&self, process: &ProcessInfo) -> Result<()> {
        if !self.sensor.contains(process.pid) {
            bail!("no such process");
        }
        self.sensor.remove(process.pid);
        self.killed.lock().unwrap().push(process.pid);
        Ok(())
    }
}

pub fn collaborators(
    sensor: Arc<FakeSensor>,
    window: Arc<ScriptedWindow>,
    terminator: Arc<FakeTerminator>,
) -> Collaborators {
    Collaborators {
        sensor,
        window,
        filter: Arc::new(DefaultAppFilter::new()),
        terminator,
    }
}

pub fn fast_settings() -> AgentSettings {
    AgentSettings {
        poll_interval_ms: 40,
        restart_delay_ms: 100,
        snapshot_ttl_ms: 5,
        screen_time_sample_ms: 100,
        screen_time_flush_secs: 1,
        persist_logs: false,
        ..AgentSettings::default()
    }
}

pub fn paths(dir: &tempfile::TempDir) -> AgentPaths {
    AgentPaths::new(dir.path().to_path_buf())
}

/// Polls an async condition until it holds or five seconds pass.
pub async fn eventually<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition().await {
        assert!(Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Synchronous counterpart of [`eventually`].
pub async fn wait_for(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
