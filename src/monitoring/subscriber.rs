use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::sensing::ProcessSnapshot;

/// A consumer of process snapshots. Every registered subscriber sees every
/// snapshot, in registration order, and must not rely on the side effects of
/// another subscriber within the same tick.
#[async_trait]
pub trait ProcessSubscriber: Send + Sync + 'static {
    fn name(&self) -> &str;

    async fn on_processes_changed(&self, snapshot: Arc<ProcessSnapshot>) -> Result<()>;
}

/// Subscribers holding in-memory session state implement this so a history
/// clear can discard it without restarting the loop.
#[async_trait]
pub trait Resettable: Send + Sync + 'static {
    async fn reset(&self);
}

/// What a subscriber declared it supports when it was registered.
#[derive(Clone)]
pub enum Capability {
    None,
    Reset(Arc<dyn Resettable>),
}

#[derive(Clone)]
pub(crate) struct Registration {
    pub subscriber: Arc<dyn ProcessSubscriber>,
    pub capability: Capability,
}

impl Registration {
    pub fn resettable(&self) -> Option<&Arc<dyn Resettable>> {
        match &self.capability {
            Capability::Reset(target) => Some(target),
            Capability::None => None,
        }
    }
}
