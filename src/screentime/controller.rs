use std::sync::Arc;

use anyhow::{bail, Context, Result};
use log::info;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::loop_worker::{screen_time_loop, ScreenTimeSources};

pub struct ScreenTimeController {
    handle: Option<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
    reset: Arc<Notify>,
}

impl ScreenTimeController {
    pub fn new() -> Self {
        Self {
            handle: None,
            cancel_token: None,
            reset: Arc::new(Notify::new()),
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    pub fn start(&mut self, sources: ScreenTimeSources) -> Result<()> {
        if self.handle.is_some() {
            bail!("screen time tracking already active");
        }

        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(screen_time_loop(
            sources,
            cancel_token.clone(),
            Arc::clone(&self.reset),
        ));

        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token);
        info!("Screen time tracking started");
        Ok(())
    }

    /// Clears the tracker's focus state; the next sample starts fresh.
    pub fn reset(&self) {
        if self.is_running() {
            self.reset.notify_one();
        }
    }

    /// Cancels the loop, which flushes pending seconds before it exits.
    pub async fn stop(&mut self) -> Result<()> {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }

        if let Some(handle) = self.handle.take() {
            handle
                .await
                .context("screen time loop task failed to join")
        } else {
            Ok(())
        }
    }
}

impl Default for ScreenTimeController {
    fn default() -> Self {
        Self::new()
    }
}
