//! Logging setup plus the conditional macros used by the background loops.
//!
//! The macros read a module-level `ENABLE_LOGS` constant, so a chatty module
//! can be silenced without touching `RUST_LOG`:
//!
//! ```text
//! const ENABLE_LOGS: bool = true;
//! use crate::{log_info, log_warn};
//!
//! log_info!("tick took {}ms", elapsed);
//! ```
//!
//! Once a store is attached, records from this crate at `Info` or above are
//! also queued into the `logs` table.

use std::sync::OnceLock;

use anyhow::{anyhow, Result};
use chrono::Utc;
use log::{Level, LevelFilter, Log, Metadata, Record};

use crate::db::{repositories::logs::insert_log, WriteQueue};

const CRATE_TARGET: &str = "procguard_lib";
const STORE_TARGET: &str = "procguard_lib::db";

static STORE_SINK: OnceLock<WriteQueue> = OnceLock::new();

#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::debug!($($arg)*);
        }
    };
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::info!($($arg)*);
        }
    };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::warn!($($arg)*);
        }
    };
}

/// Errors are rarely worth silencing, but the flag is honoured for symmetry.
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::error!($($arg)*);
        }
    };
}

struct PersistingLogger {
    inner: env_logger::Logger,
    sink: &'static OnceLock<WriteQueue>,
}

impl Log for PersistingLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        self.inner.enabled(metadata)
    }

    fn log(&self, record: &Record) {
        if !self.inner.matches(record) {
            return;
        }
        self.inner.log(record);

        if !should_persist(record.level(), record.target()) {
            return;
        }
        if let Some(sink) = self.sink.get() {
            // Never wait here: this may run on the writer thread itself.
            let _ = sink.try_enqueue(insert_log(
                Utc::now(),
                record.level(),
                record.args().to_string(),
            ));
        }
    }

    fn flush(&self) {
        self.inner.flush();
    }
}

/// Store writes are never persisted so a failing insert cannot feed itself.
fn should_persist(level: Level, target: &str) -> bool {
    level <= Level::Info && target.starts_with(CRATE_TARGET) && !target.starts_with(STORE_TARGET)
}

/// Installs the global logger. Default level is `Info`; `RUST_LOG` overrides.
pub fn init_logging() -> Result<()> {
    let inner = env_logger::Builder::new()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .build();
    let max_level = inner.filter();

    let logger = PersistingLogger {
        inner,
        sink: &STORE_SINK,
    };
    log::set_boxed_logger(Box::new(logger))
        .map_err(|err| anyhow!("logger already installed: {err}"))?;
    log::set_max_level(max_level);
    Ok(())
}

/// Starts mirroring log records into the store. Only the first call wins.
pub fn attach_store(writer: WriteQueue) -> bool {
    STORE_SINK.set(writer).is_ok()
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::time::{Duration, Instant};

    use tempfile::TempDir;

    use super::*;
    use crate::db::{Database, DbCommand, WriteRequest};

    fn logger_for(db: &Database) -> PersistingLogger {
        let sink: &'static OnceLock<WriteQueue> = Box::leak(Box::new(OnceLock::new()));
        assert!(sink.set(db.writer()).is_ok());
        PersistingLogger {
            inner: env_logger::Builder::new()
                .filter_level(LevelFilter::Info)
                .build(),
            sink,
        }
    }

    fn emit(logger: &PersistingLogger, level: Level, target: &str, message: &str) {
        logger.log(
            &Record::builder()
                .args(format_args!("{message}"))
                .level(level)
                .target(target)
                .build(),
        );
    }

    async fn stored(db: &Database) -> Vec<(String, String)> {
        db.execute(|conn| {
            let mut stmt = conn.prepare("SELECT level, message FROM logs ORDER BY id")?;
            let rows = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn crate_records_land_in_the_logs_table() {
        let dir = TempDir::new().unwrap();
        let db = Database::new(dir.path().join("logs.sqlite3"), 8).unwrap();
        let logger = logger_for(&db);

        emit(&logger, Level::Info, "procguard_lib::agent", "agent started");
        emit(&logger, Level::Debug, "procguard_lib::agent", "too chatty");
        emit(&logger, Level::Error, "procguard_lib::db::write", "write failed");
        emit(&logger, Level::Warn, "procguard_lib::monitoring::manager", "tick slow");

        assert_eq!(
            stored(&db).await,
            vec![
                ("INFO".to_string(), "agent started".to_string()),
                ("WARN".to_string(), "tick slow".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn full_queue_drops_the_record_without_blocking() {
        let dir = TempDir::new().unwrap();
        let db = Database::new(dir.path().join("logs.sqlite3"), 1).unwrap();
        let logger = logger_for(&db);
        let writer = db.writer();

        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let hold = DbCommand::Execute(Box::new(move |_| {
            let _ = started_tx.send(());
            let _ = release_rx.recv();
        }));
        assert!(writer.sender().try_send(hold).is_ok());
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        let filler = WriteRequest::new(
            "INSERT INTO logs (timestamp, level, message) VALUES (1, 'INFO', 'filler')",
            vec![],
        );
        assert!(writer.try_enqueue(filler).unwrap());

        let begun = Instant::now();
        emit(&logger, Level::Info, "procguard_lib::agent", "dropped on the floor");
        assert!(begun.elapsed() < Duration::from_secs(1));

        release_tx.send(()).unwrap();
        let rows = stored(&db).await;
        assert_eq!(rows, vec![("INFO".to_string(), "filler".to_string())]);
    }

    #[test]
    fn only_crate_records_at_info_or_above_are_persisted() {
        assert!(should_persist(Level::Info, "procguard_lib::monitoring::manager"));
        assert!(should_persist(Level::Error, "procguard_lib::agent"));
        assert!(!should_persist(Level::Debug, "procguard_lib::agent"));
        assert!(!should_persist(Level::Warn, "rusqlite"));
    }

    #[test]
    fn store_records_are_never_persisted() {
        assert!(!should_persist(Level::Error, "procguard_lib::db"));
        assert!(!should_persist(Level::Error, "procguard_lib::db::write"));
    }
}
