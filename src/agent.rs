//! Composition root: owns the store, the monitoring manager and the
//! screen-time tracker, and hands out a reset handle to callers that clear
//! history.

use std::sync::Arc;

use anyhow::{Context, Result};
use log::{error, info, warn};
use tokio::sync::Mutex;

use crate::db::{repositories::screen_time::clear_screen_time, Database};
use crate::monitoring::{
    BlocklistSubscriber, HealthStatus, JsonBlocklist, MonitoringManager, ProcessEventSubscriber,
    ProcessTerminator, SysinfoTerminator,
};
use crate::screentime::{ScreenTimeController, ScreenTimeSources};
use crate::sensing::{
    select_window_provider, AppFilter, DefaultAppFilter, ForegroundWindowProvider, ProcessSensor,
    ProcessSnapshot, SnapshotCache, SysinfoSensor,
};
use crate::settings::{AgentPaths, AgentSettings};
use crate::utils::logging;

/// The platform-facing pieces the agent depends on.
pub struct Collaborators {
    pub sensor: Arc<dyn ProcessSensor>,
    pub window: Arc<dyn ForegroundWindowProvider>,
    pub filter: Arc<dyn AppFilter>,
    pub terminator: Arc<dyn ProcessTerminator>,
}

impl Collaborators {
    pub fn platform() -> Self {
        Self {
            sensor: Arc::new(SysinfoSensor::new()),
            window: select_window_provider(),
            filter: Arc::new(DefaultAppFilter::new()),
            terminator: Arc::new(SysinfoTerminator),
        }
    }
}

/// Clears in-memory session state everywhere it is kept. Cheap to clone.
#[derive(Clone)]
pub struct ResetHandle {
    manager: Arc<MonitoringManager>,
    screen_time: Arc<Mutex<ScreenTimeController>>,
    cache: Arc<SnapshotCache>,
}

impl ResetHandle {
    pub async fn reset(&self) {
        self.cache.invalidate();
        self.manager.reset().await;
        self.screen_time.lock().await.reset();
        info!("Session state reset requested");
    }
}

pub struct Agent {
    db: Database,
    manager: Arc<MonitoringManager>,
    process_events: Arc<ProcessEventSubscriber>,
    screen_time: Arc<Mutex<ScreenTimeController>>,
    blocklist: Arc<JsonBlocklist>,
    reset: ResetHandle,
}

impl Agent {
    pub async fn start(settings: AgentSettings, paths: AgentPaths) -> Result<Self> {
        Self::start_with(settings, paths, Collaborators::platform()).await
    }

    pub async fn start_with(
        settings: AgentSettings,
        paths: AgentPaths,
        collaborators: Collaborators,
    ) -> Result<Self> {
        let settings = settings.sanitized();
        paths.ensure_exists()?;

        let db = Database::new(paths.database(), settings.write_queue_capacity)
            .context("failed to open the store")?;
        if settings.persist_logs && !logging::attach_store(db.writer()) {
            warn!("Log persistence already attached to another store");
        }

        let Collaborators {
            sensor,
            window,
            filter,
            terminator,
        } = collaborators;
        let cache = Arc::new(SnapshotCache::new(
            Arc::clone(&sensor),
            settings.snapshot_ttl(),
        ));

        let process_events = Arc::new(ProcessEventSubscriber::new(
            db.writer(),
            Arc::clone(&filter),
        ));
        let initial = initial_snapshot(&cache).await;
        process_events
            .initialize_from_store(&db, &initial)
            .await
            .context("failed to recover open app events")?;

        let blocklist = Arc::new(JsonBlocklist::new(paths.blocklist()));
        let mut manager = MonitoringManager::new(settings.monitor_config(), Arc::clone(&cache));
        manager.register_resettable(Arc::clone(&process_events));
        if settings.enforce_blocklist {
            manager.register_subscriber(Arc::new(BlocklistSubscriber::new(
                blocklist.clone(),
                terminator,
            )));
        }
        let manager = Arc::new(manager);
        manager.start()?;

        let mut screen_time = ScreenTimeController::new();
        if settings.track_screen_time {
            screen_time.start(ScreenTimeSources {
                sensor,
                window,
                filter,
                writer: db.writer(),
                config: settings.screen_time_config(),
            })?;
        }
        let screen_time = Arc::new(Mutex::new(screen_time));

        info!("Agent started, data in {}", paths.data_dir.display());
        Ok(Self {
            reset: ResetHandle {
                manager: Arc::clone(&manager),
                screen_time: Arc::clone(&screen_time),
                cache,
            },
            db,
            manager,
            process_events,
            screen_time,
            blocklist,
        })
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn blocklist(&self) -> Arc<JsonBlocklist> {
        Arc::clone(&self.blocklist)
    }

    pub fn reset_handle(&self) -> ResetHandle {
        self.reset.clone()
    }

    pub fn health(&self) -> HealthStatus {
        self.manager.health()
    }

    /// Deletes usage and screen-time history along with the session state
    /// that referred to it. Running applications get fresh rows on the next
    /// tick.
    pub async fn clear_history(&self) -> Result<()> {
        self.process_events.clear_history().await?;
        self.reset.cache.invalidate();
        self.screen_time.lock().await.reset();
        self.db.writer().enqueue(clear_screen_time()).await?;
        info!("History cleared");
        Ok(())
    }

    /// Stops both loops, then drains every queued write and closes the store.
    pub async fn shutdown(self) -> Result<()> {
        if let Err(err) = self.manager.stop().await {
            error!("Failed to stop monitoring: {err:#}");
        }
        if let Err(err) = self.screen_time.lock().await.stop().await {
            error!("Failed to stop screen time tracking: {err:#}");
        }
        self.db.shutdown().await?;
        info!("Agent shut down");
        Ok(())
    }
}

/// Falls back to an empty list when enumeration fails, which closes every
/// row left open by the previous run.
async fn initial_snapshot(cache: &Arc<SnapshotCache>) -> ProcessSnapshot {
    let cache = Arc::clone(cache);
    match tokio::task::spawn_blocking(move || cache.get_all()).await {
        Ok(Ok(processes)) => ProcessSnapshot::new(processes.as_ref().clone()),
        Ok(Err(err)) => {
            warn!("Initial process enumeration failed: {err}");
            ProcessSnapshot::new(Vec::new())
        }
        Err(err) => {
            warn!("Initial process enumeration task failed: {err}");
            ProcessSnapshot::new(Vec::new())
        }
    }
}
