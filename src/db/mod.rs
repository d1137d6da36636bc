use std::{
    path::{Path, PathBuf},
    sync::{mpsc as std_mpsc, Arc, Mutex},
    thread::{self, JoinHandle},
    time::Duration,
};

use anyhow::{anyhow, Context, Result};
use log::{error, info};
use rusqlite::{params_from_iter, Connection};
use tokio::sync::{mpsc, oneshot};

pub mod helpers;
mod migrations;
pub mod models;
pub mod repositories;
pub mod write;

use migrations::run_migrations;
pub use models::{ActiveSession, AppEvent, ScreenTimeRecord, ScreenTimeTotal};
pub use write::{WriteQueue, WriteRequest, DEFAULT_QUEUE_CAPACITY};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

type DbTask = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

pub(crate) enum DbCommand {
    Write(WriteRequest),
    Execute(DbTask),
    Shutdown,
}

struct DatabaseInner {
    queue: WriteQueue,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl DatabaseInner {
    fn take_worker(&self) -> Option<JoinHandle<()>> {
        let mut guard = match self.worker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.take()
    }
}

impl Drop for DatabaseInner {
    fn drop(&mut self) {
        if let Some(handle) = self.take_worker() {
            if let Err(err) = self.queue.sender().try_send(DbCommand::Shutdown) {
                error!("Failed to send shutdown to DB thread: {err}");
                return;
            }
            if let Err(join_err) = handle.join() {
                error!("Failed to join DB thread: {join_err:?}");
            }
        }
    }
}

/// Handle to the store. All access, reads and writes alike, is funnelled
/// through one bounded FIFO into a dedicated thread that owns the connection,
/// so a read observes every write submitted before it.
#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
    db_path: Arc<PathBuf>,
}

impl Database {
    pub fn new(db_path: PathBuf, queue_capacity: usize) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create database directory {}", parent.display())
            })?;
        }

        let (command_tx, mut command_rx) = mpsc::channel::<DbCommand>(queue_capacity.max(1));
        let (ready_tx, ready_rx) = std_mpsc::channel();
        let path_for_thread = db_path.clone();

        let worker = thread::Builder::new()
            .name("procguard-db".into())
            .spawn(move || {
                let mut conn = match Connection::open(&path_for_thread) {
                    Ok(connection) => connection,
                    Err(err) => {
                        let _ = ready_tx.send(Err(anyhow::Error::new(err)
                            .context("failed to open SQLite database")));
                        return;
                    }
                };

                if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
                    error!("Failed to enable WAL mode: {err}");
                }
                if let Err(err) = conn.busy_timeout(BUSY_TIMEOUT) {
                    error!("Failed to set busy timeout: {err}");
                }

                let init_result =
                    run_migrations(&mut conn).context("failed to run database migrations");
                if ready_tx.send(init_result).is_err() {
                    error!("DB initialization receiver dropped before ready signal");
                    return;
                }

                while let Some(command) = command_rx.blocking_recv() {
                    match command {
                        DbCommand::Write(request) => execute_write(&conn, &request),
                        DbCommand::Execute(task) => task(&mut conn),
                        DbCommand::Shutdown => break,
                    }
                }

                info!("Database thread shutting down");
            })
            .with_context(|| "failed to spawn database worker thread")?;

        ready_rx
            .recv()
            .context("database worker exited before signaling readiness")??;

        info!("Database initialized at {}", db_path.as_path().display());

        Ok(Self {
            inner: Arc::new(DatabaseInner {
                queue: WriteQueue::new(command_tx),
                worker: Mutex::new(Some(worker)),
            }),
            db_path: Arc::new(db_path),
        })
    }

    pub fn path(&self) -> &Path {
        self.db_path.as_path()
    }

    /// Producer handle for fire-and-forget writes.
    pub fn writer(&self) -> WriteQueue {
        self.inner.queue.clone()
    }

    pub async fn execute<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();

        let command = DbCommand::Execute(Box::new(move |conn| {
            let result = task(conn);
            if reply_tx.send(result).is_err() {
                error!("DB caller dropped before receiving result");
            }
        }));

        self.inner
            .queue
            .sender()
            .send(command)
            .await
            .map_err(|_| anyhow!("failed to send command to DB thread"))?;

        reply_rx
            .await
            .map_err(|_| anyhow!("database thread terminated unexpectedly"))?
    }

    /// Waits until every request submitted so far has been executed.
    pub async fn flush(&self) -> Result<()> {
        self.execute(|_| Ok(())).await
    }

    /// Drains the queue behind a shutdown marker and joins the writer thread.
    pub async fn shutdown(&self) -> Result<()> {
        let Some(handle) = self.inner.take_worker() else {
            return Ok(());
        };

        self.inner
            .queue
            .sender()
            .send(DbCommand::Shutdown)
            .await
            .map_err(|_| anyhow!("database thread already stopped"))?;

        tokio::task::spawn_blocking(move || handle.join())
            .await
            .context("database join task failed")?
            .map_err(|_| anyhow!("database thread panicked"))
    }
}

fn execute_write(conn: &Connection, request: &WriteRequest) {
    if let Err(err) = conn.execute(request.query, params_from_iter(request.params.iter())) {
        error!(
            "Failed to execute write request ({}): {err}",
            summarize_query(request.query)
        );
    }
}

fn summarize_query(query: &str) -> String {
    query.split_whitespace().take(6).collect::<Vec<_>>().join(" ")
}
