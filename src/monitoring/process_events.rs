//! Usage history: opens an AppEvent row when an application first appears and
//! closes it when the last instance of that application goes away.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use log::{debug, info, warn};
use tokio::sync::Mutex;

use crate::db::{
    repositories::app_events::{clear_app_events, close_app_event, log_app_event},
    Database, WriteQueue,
};
use crate::sensing::{AppFilter, ProcessInfo, ProcessSnapshot, UniqueKey};

use super::running_state::{Departure, RunningState};
use super::subscriber::{ProcessSubscriber, Resettable};

pub const SUBSCRIBER_NAME: &str = "ProcessEventSubscriber";

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryReport {
    pub adopted: usize,
    pub closed: usize,
    pub skipped: usize,
}

pub struct ProcessEventSubscriber {
    writer: WriteQueue,
    filter: Arc<dyn AppFilter>,
    state: Mutex<RunningState>,
}

impl ProcessEventSubscriber {
    pub fn new(writer: WriteQueue, filter: Arc<dyn AppFilter>) -> Self {
        Self {
            writer,
            filter,
            state: Mutex::new(RunningState::new()),
        }
    }

    /// Reconciles rows left open by a previous run against the processes
    /// running now: rows whose instance is still alive are adopted, the rest
    /// are closed.
    pub async fn initialize_from_store(
        &self,
        db: &Database,
        snapshot: &ProcessSnapshot,
    ) -> Result<RecoveryReport> {
        let open = db
            .active_sessions()
            .await
            .context("failed to load open app events")?;
        let present = snapshot.keys();
        let now = Utc::now();
        let mut report = RecoveryReport::default();

        let mut state = self.state.lock().await;
        for row in open {
            let key = match row.process_instance_key.parse::<UniqueKey>() {
                Ok(key) => key,
                Err(err) => {
                    warn!("Skipping open app event for {}: {err}", row.process_name);
                    report.skipped += 1;
                    continue;
                }
            };

            if present.contains(&key) {
                state.open_session(key, &row.process_name.to_lowercase());
                report.adopted += 1;
            } else {
                self.writer
                    .enqueue(close_app_event(&key, now))
                    .await
                    .context("failed to queue close for stale app event")?;
                report.closed += 1;
            }
        }
        drop(state);

        info!(
            "Recovered app events: {} adopted, {} closed, {} skipped",
            report.adopted, report.closed, report.skipped
        );
        Ok(report)
    }

    /// Deletes every AppEvent row and forgets the running state in one
    /// critical section, so no tick can open a row between the two.
    pub async fn clear_history(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        self.writer
            .enqueue(clear_app_events())
            .await
            .context("failed to queue app event deletion")?;
        state.clear();
        info!("{SUBSCRIBER_NAME} history cleared");
        Ok(())
    }

    async fn detect_ended(&self, snapshot: &ProcessSnapshot, present: &HashSet<UniqueKey>) -> Result<()> {
        let mut state = self.state.lock().await;
        for key in state.departed(present) {
            match state.remove(&key) {
                Departure::Ignored | Departure::StillRunning => {}
                Departure::LastInstance { name, sessions } => {
                    debug!("{name} has no running instances left, closing {} row(s)", sessions.len());
                    for session in sessions {
                        self.writer
                            .enqueue(close_app_event(&session, snapshot.captured_at))
                            .await?;
                    }
                }
            }
        }
        Ok(())
    }

    async fn detect_started(&self, snapshot: &ProcessSnapshot) -> Result<()> {
        let mut state = self.state.lock().await;
        for process in &snapshot.processes {
            let key = process.unique_key();
            if state.knows(&key) {
                continue;
            }

            if process.name.is_empty() || process.exe_path.is_empty() {
                state.ignore(key);
                continue;
            }
            if self.filter.should_exclude(&process.exe_path, process) {
                state.ignore(key);
                continue;
            }

            let name = process.name_lower();
            if state.count(&name) > 0 {
                state.add_instance(key, &name);
                continue;
            }
            if !self.filter.should_track(&process.exe_path, process) {
                continue;
            }

            self.open(process, snapshot).await?;
            state.open_session(key, &name);
        }
        Ok(())
    }

    async fn open(&self, process: &ProcessInfo, snapshot: &ProcessSnapshot) -> Result<()> {
        debug!("Opening app event for {} (pid {})", process.name, process.pid);
        self.writer
            .enqueue(log_app_event(process, snapshot.captured_at))
            .await
    }

    #[cfg(test)]
    pub(crate) async fn with_state<R>(&self, inspect: impl FnOnce(&RunningState) -> R) -> R {
        let state = self.state.lock().await;
        inspect(&state)
    }
}

#[async_trait]
impl ProcessSubscriber for ProcessEventSubscriber {
    fn name(&self) -> &str {
        SUBSCRIBER_NAME
    }

    async fn on_processes_changed(&self, snapshot: Arc<ProcessSnapshot>) -> Result<()> {
        let present = snapshot.keys();
        self.detect_ended(&snapshot, &present)
            .await
            .context("end detection failed")?;
        self.detect_started(&snapshot)
            .await
            .context("start detection failed")
    }
}

#[async_trait]
impl Resettable for ProcessEventSubscriber {
    async fn reset(&self) {
        self.state.lock().await.clear();
        info!("{SUBSCRIBER_NAME} state cleared");
    }
}
