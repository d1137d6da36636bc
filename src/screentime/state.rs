//! Attribution of focused time to executables, independent of any clock or
//! store so it can be driven by a synthetic timeline.

use std::time::{Duration, Instant};

use crate::sensing::UniqueKey;

/// The process instance owning the foreground window on one sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Focus {
    pub key: UniqueKey,
    pub exe_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScreenTimeAction {
    /// Focus moved to `exe_path`; make sure it has a current row.
    Begin { exe_path: String },
    /// Add `seconds` to the current row of `exe_path`.
    Flush { exe_path: String, seconds: u64 },
}

#[derive(Debug)]
pub struct ScreenTimeState {
    current: Option<Focus>,
    pending: Duration,
    last_flush: Instant,
}

impl ScreenTimeState {
    pub fn new(now: Instant) -> Self {
        Self {
            current: None,
            pending: Duration::ZERO,
            last_flush: now,
        }
    }

    pub fn current(&self) -> Option<&Focus> {
        self.current.as_ref()
    }

    pub fn pending(&self) -> Duration {
        self.pending
    }

    /// Feeds one sample. `focus` is `None` when nothing attributable had
    /// focus; the tracked instance is kept but earns no time.
    pub fn observe(
        &mut self,
        focus: Option<Focus>,
        sample: Duration,
        flush_interval: Duration,
        now: Instant,
    ) -> Vec<ScreenTimeAction> {
        let mut actions = Vec::new();

        if let Some(focus) = focus {
            match &self.current {
                Some(current) if current.key == focus.key => self.pending += sample,
                _ => {
                    actions.extend(self.flush_rounded());
                    actions.push(ScreenTimeAction::Begin {
                        exe_path: focus.exe_path.clone(),
                    });
                    self.current = Some(focus);
                    // The switching sample already belongs to the new focus.
                    self.pending = sample;
                }
            }
        }

        if now.saturating_duration_since(self.last_flush) >= flush_interval {
            actions.extend(self.flush_whole_seconds());
            self.last_flush = now;
        }

        actions
    }

    /// Everything still pending, for shutdown.
    pub fn finish(&mut self) -> Option<ScreenTimeAction> {
        self.flush_rounded()
    }

    pub fn reset(&mut self, now: Instant) {
        *self = Self::new(now);
    }

    /// Periodic flush: whole seconds only, the remainder stays pending.
    fn flush_whole_seconds(&mut self) -> Option<ScreenTimeAction> {
        let current = self.current.as_ref()?;
        let seconds = self.pending.as_secs();
        if seconds == 0 {
            return None;
        }
        self.pending -= Duration::from_secs(seconds);
        Some(ScreenTimeAction::Flush {
            exe_path: current.exe_path.clone(),
            seconds,
        })
    }

    /// Final flush for the outgoing focus, rounded to the nearest second.
    fn flush_rounded(&mut self) -> Option<ScreenTimeAction> {
        let pending = std::mem::take(&mut self.pending);
        let current = self.current.as_ref()?;
        let seconds = (pending + Duration::from_millis(500)).as_secs();
        (seconds > 0).then(|| ScreenTimeAction::Flush {
            exe_path: current.exe_path.clone(),
            seconds,
        })
    }
}
