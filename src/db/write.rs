//! The persistence queue: every mutation of the store goes through here and is
//! executed, in submission order, by the single writer thread.

use anyhow::{anyhow, Result};
use rusqlite::types::Value;
use tokio::sync::mpsc::{self, error::TrySendError};

use super::DbCommand;

pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// A parameterized mutation. Executed at most once; a failed execution is
/// logged by the writer and dropped.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteRequest {
    pub query: &'static str,
    pub params: Vec<Value>,
}

impl WriteRequest {
    pub fn new(query: &'static str, params: Vec<Value>) -> Self {
        Self { query, params }
    }
}

/// Producer handle for the queue. Cloning is cheap; all clones feed the same
/// FIFO.
#[derive(Clone)]
pub struct WriteQueue {
    sender: mpsc::Sender<DbCommand>,
}

impl WriteQueue {
    pub(crate) fn new(sender: mpsc::Sender<DbCommand>) -> Self {
        Self { sender }
    }

    /// Waits for room when the queue is full rather than dropping the write.
    pub async fn enqueue(&self, request: WriteRequest) -> Result<()> {
        self.sender
            .send(DbCommand::Write(request))
            .await
            .map_err(|_| anyhow!("write queue is closed"))
    }

    /// Non-blocking variant. Returns `Ok(false)` when the queue is full and the
    /// request was not accepted.
    pub fn try_enqueue(&self, request: WriteRequest) -> Result<bool> {
        match self.sender.try_send(DbCommand::Write(request)) {
            Ok(()) => Ok(true),
            Err(TrySendError::Full(_)) => Ok(false),
            Err(TrySendError::Closed(_)) => Err(anyhow!("write queue is closed")),
        }
    }

    pub(crate) fn sender(&self) -> &mpsc::Sender<DbCommand> {
        &self.sender
    }
}
