use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::Utc;
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::db::{
    repositories::screen_time::{add_duration, ensure_record, DEFAULT_RECENCY_WINDOW},
    WriteQueue,
};
use crate::sensing::{AppFilter, ForegroundWindowProvider, ProcessSensor, SensorError};

use super::state::{Focus, ScreenTimeAction, ScreenTimeState};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy)]
pub struct ScreenTimeConfig {
    pub sample_interval: Duration,
    pub flush_interval: Duration,
    pub recency_window: Duration,
}

impl Default for ScreenTimeConfig {
    fn default() -> Self {
        Self {
            sample_interval: DEFAULT_SAMPLE_INTERVAL,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            recency_window: DEFAULT_RECENCY_WINDOW,
        }
    }
}

/// Everything the sampling loop reads from or writes to.
#[derive(Clone)]
pub struct ScreenTimeSources {
    pub sensor: Arc<dyn ProcessSensor>,
    pub window: Arc<dyn ForegroundWindowProvider>,
    pub filter: Arc<dyn AppFilter>,
    pub writer: WriteQueue,
    pub config: ScreenTimeConfig,
}

pub async fn screen_time_loop(
    sources: ScreenTimeSources,
    cancel_token: CancellationToken,
    reset: Arc<Notify>,
) {
    let config = sources.config;
    let mut ticker = tokio::time::interval(config.sample_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut state = ScreenTimeState::new(Instant::now());

    log_info!(
        "screen time loop started (window provider: {})",
        sources.window.name()
    );

    loop {
        tokio::select! {
            biased;
            _ = cancel_token.cancelled() => {
                if let Some(action) = state.finish() {
                    apply(&sources, action).await;
                }
                log_info!("screen time loop shutting down");
                break;
            }
            _ = reset.notified() => {
                state.reset(Instant::now());
                log_info!("screen time state reset");
            }
            _ = ticker.tick() => {
                let focus = sample_focus(&sources).await;
                let actions = state.observe(
                    focus,
                    config.sample_interval,
                    config.flush_interval,
                    Instant::now(),
                );
                for action in actions {
                    apply(&sources, action).await;
                }
            }
        }
    }
}

async fn sample_focus(sources: &ScreenTimeSources) -> Option<Focus> {
    let sensor = Arc::clone(&sources.sensor);
    let window = Arc::clone(&sources.window);
    let filter = Arc::clone(&sources.filter);

    match tokio::task::spawn_blocking(move || {
        resolve_focus(sensor.as_ref(), window.as_ref(), filter.as_ref())
    })
    .await
    {
        Ok(focus) => focus,
        Err(err) => {
            log_warn!("foreground lookup worker failed: {err}");
            None
        }
    }
}

/// Maps the foreground window to the process instance that owns it.
/// Returns `None` whenever focus cannot be attributed.
pub fn resolve_focus(
    sensor: &dyn ProcessSensor,
    window: &dyn ForegroundWindowProvider,
    filter: &dyn AppFilter,
) -> Option<Focus> {
    let active = window.active_window()?;
    let process = match sensor.process_by_pid(active.pid) {
        Ok(process) => process,
        // Exited between the focus read and the lookup.
        Err(SensorError::NotFound(_)) => return None,
        Err(err) => {
            log_debug!("foreground process lookup failed: {err}");
            return None;
        }
    };

    if process.exe_path.is_empty() || filter.should_exclude(&process.exe_path, &process) {
        return None;
    }

    Some(Focus {
        key: process.unique_key(),
        exe_path: process.exe_path,
    })
}

async fn apply(sources: &ScreenTimeSources, action: ScreenTimeAction) {
    if let Err(err) = enqueue_action(sources, action).await {
        log_error!("failed to queue screen time write: {err:#}");
    }
}

async fn enqueue_action(sources: &ScreenTimeSources, action: ScreenTimeAction) -> Result<()> {
    let window = sources.config.recency_window;
    let now = Utc::now();
    match action {
        ScreenTimeAction::Begin { exe_path } => {
            log_debug!("focus moved to {exe_path}");
            sources
                .writer
                .enqueue(ensure_record(&exe_path, now, window))
                .await
        }
        ScreenTimeAction::Flush { exe_path, seconds } => {
            sources
                .writer
                .enqueue(ensure_record(&exe_path, now, window))
                .await?;
            sources
                .writer
                .enqueue(add_duration(&exe_path, seconds, now, window)?)
                .await
        }
    }
}
