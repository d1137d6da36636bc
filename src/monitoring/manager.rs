use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::sensing::{ProcessSnapshot, SnapshotCache};

use super::health::{HealthStatus, ManagerState};
use super::subscriber::{Capability, ProcessSubscriber, Registration, Resettable};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_RESTART_DELAY: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_RESTART_RETRIES: u32 = 3;

#[derive(Debug, Clone, Copy)]
pub struct MonitorConfig {
    pub poll_interval: Duration,
    pub restart_delay: Duration,
    /// Consecutive loop failures after which the manager gives up.
    pub max_restart_retries: u32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            restart_delay: DEFAULT_RESTART_DELAY,
            max_restart_retries: DEFAULT_MAX_RESTART_RETRIES,
        }
    }
}

struct Shared {
    state: Mutex<ManagerState>,
    last_tick: Mutex<Option<DateTime<Utc>>>,
    consecutive_failures: AtomicU32,
    reset: Notify,
}

impl Shared {
    fn state(&self) -> ManagerState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: ManagerState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    fn record_tick(&self, at: DateTime<Utc>) {
        *self.last_tick.lock().unwrap_or_else(PoisonError::into_inner) = Some(at);
        self.consecutive_failures.store(0, Ordering::SeqCst);
    }
}

struct Supervisor {
    cancel_token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Polls the process list on a fixed interval and hands each snapshot to
/// every registered subscriber.
///
/// Subscribers are registered before `start`; registration needs `&mut self`
/// and a running manager is shared behind an `Arc`, so the set is fixed once
/// the loop runs. A subscriber error or panic is logged and isolated. A
/// failure of the loop itself is handled by a supervisor that restarts the
/// loop after `restart_delay` until `max_restart_retries` consecutive
/// failures, after which the manager stays `Failed`.
pub struct MonitoringManager {
    config: MonitorConfig,
    cache: Arc<SnapshotCache>,
    registrations: Vec<Registration>,
    shared: Arc<Shared>,
    supervisor: Mutex<Option<Supervisor>>,
}

impl MonitoringManager {
    pub fn new(config: MonitorConfig, cache: Arc<SnapshotCache>) -> Self {
        Self {
            config,
            cache,
            registrations: Vec::new(),
            shared: Arc::new(Shared {
                state: Mutex::new(ManagerState::Stopped),
                last_tick: Mutex::new(None),
                consecutive_failures: AtomicU32::new(0),
                reset: Notify::new(),
            }),
            supervisor: Mutex::new(None),
        }
    }

    pub fn register_subscriber<S: ProcessSubscriber>(&mut self, subscriber: Arc<S>) {
        self.push_registration(subscriber, Capability::None);
    }

    pub fn register_resettable<S: ProcessSubscriber + Resettable>(&mut self, subscriber: Arc<S>) {
        let reset_target: Arc<dyn Resettable> = subscriber.clone();
        self.push_registration(subscriber, Capability::Reset(reset_target));
    }

    fn push_registration(&mut self, subscriber: Arc<dyn ProcessSubscriber>, capability: Capability) {
        log_info!("Registered subscriber {}", subscriber.name());
        self.registrations.push(Registration {
            subscriber,
            capability,
        });
    }

    pub fn subscriber_count(&self) -> usize {
        self.registrations.len()
    }

    pub fn state(&self) -> ManagerState {
        self.shared.state()
    }

    /// Starts the poll loop. A no-op while already running or waiting to
    /// restart. Must be called from within a tokio runtime.
    pub fn start(&self) -> Result<()> {
        let runtime = tokio::runtime::Handle::try_current()
            .context("monitoring manager must be started inside a tokio runtime")?;

        let mut supervisor = self.supervisor.lock().unwrap_or_else(PoisonError::into_inner);
        if matches!(
            self.shared.state(),
            ManagerState::Running | ManagerState::Restarting
        ) {
            return Ok(());
        }

        self.shared.consecutive_failures.store(0, Ordering::SeqCst);
        self.shared.set_state(ManagerState::Running);

        let cancel_token = CancellationToken::new();
        let context = Arc::new(LoopContext {
            config: self.config,
            cache: Arc::clone(&self.cache),
            registrations: self.registrations.clone(),
            shared: Arc::clone(&self.shared),
        });
        let handle = runtime.spawn(supervise(context, cancel_token.clone()));

        // A supervisor left over from a failed run has already exited.
        *supervisor = Some(Supervisor {
            cancel_token,
            handle,
        });
        log_info!(
            "Monitoring started with {} subscriber(s), polling every {:?}",
            self.registrations.len(),
            self.config.poll_interval
        );
        Ok(())
    }

    /// Stops the loop and waits for an in-flight tick to finish.
    pub async fn stop(&self) -> Result<()> {
        let supervisor = self
            .supervisor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let result = match supervisor {
            Some(Supervisor {
                cancel_token,
                handle,
            }) => {
                cancel_token.cancel();
                handle
                    .await
                    .context("monitoring supervisor failed to join")
            }
            None => Ok(()),
        };

        self.shared.set_state(ManagerState::Stopped);
        log_info!("Monitoring stopped");
        result
    }

    /// Asks every reset-capable subscriber to drop its in-memory state. While
    /// the loop is live the request is handed to it between ticks; at most
    /// one request is ever pending.
    pub async fn reset(&self) {
        match self.shared.state() {
            ManagerState::Running | ManagerState::Restarting => self.shared.reset.notify_one(),
            ManagerState::Stopped | ManagerState::Failed => {
                reset_subscribers(&self.registrations).await;
            }
        }
    }

    pub fn health(&self) -> HealthStatus {
        let state = self.shared.state();
        HealthStatus {
            is_healthy: state == ManagerState::Running,
            state,
            last_tick: *self
                .shared
                .last_tick
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
            consecutive_failures: self.shared.consecutive_failures.load(Ordering::SeqCst),
            subscriber_count: self.registrations.len(),
        }
    }
}

struct LoopContext {
    config: MonitorConfig,
    cache: Arc<SnapshotCache>,
    registrations: Vec<Registration>,
    shared: Arc<Shared>,
}

async fn supervise(context: Arc<LoopContext>, cancel_token: CancellationToken) {
    loop {
        let run = tokio::spawn(run_event_loop(Arc::clone(&context), cancel_token.clone()));
        let failure = match run.await {
            Ok(Ok(())) => return,
            Ok(Err(err)) => format!("{err:#}"),
            Err(join_err) => format!("event loop aborted: {join_err}"),
        };
        if cancel_token.is_cancelled() {
            return;
        }

        let failures = context
            .shared
            .consecutive_failures
            .fetch_add(1, Ordering::SeqCst)
            + 1;
        log_error!("Monitoring loop failed ({failures} consecutive): {failure}");

        if failures >= context.config.max_restart_retries {
            context.shared.set_state(ManagerState::Failed);
            log_error!(
                "Monitoring disabled after {failures} consecutive failures; restart the agent to recover"
            );
            return;
        }

        context.shared.set_state(ManagerState::Restarting);
        tokio::select! {
            _ = cancel_token.cancelled() => return,
            _ = tokio::time::sleep(context.config.restart_delay) => {}
        }
        context.shared.set_state(ManagerState::Running);
        log_warn!("Restarting monitoring loop");
    }
}

async fn run_event_loop(context: Arc<LoopContext>, cancel_token: CancellationToken) -> Result<()> {
    let mut ticker = tokio::time::interval(context.config.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel_token.cancelled() => {
                log_info!("Monitoring loop shutting down");
                return Ok(());
            }
            _ = context.shared.reset.notified() => {
                reset_subscribers(&context.registrations).await;
            }
            _ = ticker.tick() => {
                run_tick(&context).await?;
            }
        }
    }
}

async fn run_tick(context: &LoopContext) -> Result<()> {
    let cache = Arc::clone(&context.cache);
    let processes = match tokio::task::spawn_blocking(move || cache.get_all()).await {
        Ok(Ok(processes)) => processes,
        Ok(Err(err)) => {
            log_warn!("Process enumeration failed, skipping tick: {err}");
            return Ok(());
        }
        Err(join_err) => return Err(anyhow!("process enumeration task failed: {join_err}")),
    };

    let snapshot = Arc::new(ProcessSnapshot::new(processes.as_ref().clone()));
    for registration in &context.registrations {
        dispatch(registration, Arc::clone(&snapshot)).await;
    }

    context.shared.record_tick(snapshot.captured_at);
    Ok(())
}

/// Runs one subscriber in its own task so an error or a panic stays contained.
async fn dispatch(registration: &Registration, snapshot: Arc<ProcessSnapshot>) {
    let subscriber = Arc::clone(&registration.subscriber);
    let outcome = tokio::spawn(async move { subscriber.on_processes_changed(snapshot).await }).await;

    let name = registration.subscriber.name();
    match outcome {
        Ok(Ok(())) => {}
        Ok(Err(err)) => log_error!("Subscriber {name} failed: {err:#}"),
        Err(join_err) => log_error!("Subscriber {name} panicked: {join_err}"),
    }
}

async fn reset_subscribers(registrations: &[Registration]) {
    for registration in registrations {
        if let Some(target) = registration.resettable() {
            target.reset().await;
            log_info!("Reset subscriber {}", registration.subscriber.name());
        }
    }
}
