use anyhow::Result;
use chrono::{DateTime, Utc};
use log::warn;
use rusqlite::{types::Value, Row};

use crate::db::{
    helpers::{from_unix_seconds, unix_seconds},
    models::{ActiveSession, AppEvent},
    Database, WriteRequest,
};
use crate::sensing::{ProcessInfo, UniqueKey};

const INSERT_APP_EVENT: &str = "INSERT INTO app_events
     (process_name, pid, parent_process_name, exe_path, start_time, process_instance_key)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6)";

const CLOSE_APP_EVENT: &str = "UPDATE app_events
     SET end_time = ?1
     WHERE process_instance_key = ?2 AND end_time IS NULL";

const DELETE_APP_EVENTS: &str = "DELETE FROM app_events";

pub fn parent_descriptor(parent_pid: u32) -> String {
    format!("PID: {parent_pid}")
}

/// Opens a history row for `process`, keyed by its instance.
pub fn log_app_event(process: &ProcessInfo, started_at: DateTime<Utc>) -> WriteRequest {
    WriteRequest::new(
        INSERT_APP_EVENT,
        vec![
            Value::Text(process.name.clone()),
            Value::Integer(i64::from(process.pid)),
            Value::Text(parent_descriptor(process.parent_pid)),
            Value::Text(process.exe_path.clone()),
            Value::Integer(unix_seconds(started_at)),
            Value::Text(process.unique_key().to_string()),
        ],
    )
}

/// Closes the open row for `key`. A no-op if the row is already closed.
pub fn close_app_event(key: &UniqueKey, ended_at: DateTime<Utc>) -> WriteRequest {
    WriteRequest::new(
        CLOSE_APP_EVENT,
        vec![
            Value::Integer(unix_seconds(ended_at)),
            Value::Text(key.to_string()),
        ],
    )
}

pub fn clear_app_events() -> WriteRequest {
    WriteRequest::new(DELETE_APP_EVENTS, Vec::new())
}

fn row_to_app_event(row: &Row) -> Result<AppEvent> {
    let pid: i64 = row.get("pid")?;
    let start_time: i64 = row.get("start_time")?;
    let end_time: Option<i64> = row.get("end_time")?;

    Ok(AppEvent {
        id: row.get("id")?,
        process_name: row.get("process_name")?,
        pid: u32::try_from(pid)?,
        parent_process_name: row.get("parent_process_name")?,
        exe_path: row.get("exe_path")?,
        start_time: from_unix_seconds(start_time, "start_time")?,
        end_time: end_time
            .map(|value| from_unix_seconds(value, "end_time"))
            .transpose()?,
        process_instance_key: row.get("process_instance_key")?,
    })
}

impl Database {
    /// Rows still waiting for an end time and carrying an instance key.
    pub async fn active_sessions(&self) -> Result<Vec<ActiveSession>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(
                "SELECT process_name, process_instance_key
                 FROM app_events
                 WHERE end_time IS NULL AND process_instance_key IS NOT NULL
                 ORDER BY id",
            )?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(ActiveSession {
                        process_name: row.get(0)?,
                        process_instance_key: row.get(1)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    pub async fn app_events(&self) -> Result<Vec<AppEvent>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, process_name, pid, parent_process_name, exe_path,
                        start_time, end_time, process_instance_key
                 FROM app_events
                 ORDER BY id",
            )?;
            let mut rows = stmt.query([])?;
            let mut events = Vec::new();
            while let Some(row) = rows.next()? {
                match row_to_app_event(row) {
                    Ok(event) => events.push(event),
                    Err(err) => warn!("Skipping malformed app_events row: {err}"),
                }
            }
            Ok(events)
        })
        .await
    }

    pub async fn app_event_count(&self) -> Result<u64> {
        self.execute(|conn| {
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM app_events", [], |row| row.get(0))?;
            Ok(u64::try_from(count)?)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn firefox(pid: u32, start: u64) -> ProcessInfo {
        ProcessInfo {
            pid,
            parent_pid: 1,
            start_time_ns: start,
            name: "firefox".into(),
            exe_path: "/usr/bin/firefox".into(),
        }
    }

    #[tokio::test]
    async fn logged_event_stays_open_until_closed() {
        let dir = TempDir::new().unwrap();
        let db = Database::new(dir.path().join("events.sqlite3"), 8).unwrap();
        let writer = db.writer();
        let process = firefox(100, 5);
        let start = Utc.timestamp_opt(1_000, 0).unwrap();
        let end = Utc.timestamp_opt(1_060, 0).unwrap();

        writer.enqueue(log_app_event(&process, start)).await.unwrap();
        let open = db.active_sessions().await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].process_instance_key, "100-5");

        writer
            .enqueue(close_app_event(&process.unique_key(), end))
            .await
            .unwrap();
        assert!(db.active_sessions().await.unwrap().is_empty());

        let events = db.app_events().await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].parent_process_name.as_deref(), Some("PID: 1"));
        assert_eq!(events[0].start_time, start);
        assert_eq!(events[0].end_time, Some(end));
    }

    #[tokio::test]
    async fn closing_twice_keeps_first_end_time() {
        let dir = TempDir::new().unwrap();
        let db = Database::new(dir.path().join("events.sqlite3"), 8).unwrap();
        let writer = db.writer();
        let process = firefox(100, 5);
        let first_end = Utc.timestamp_opt(2_000, 0).unwrap();

        writer
            .enqueue(log_app_event(&process, Utc.timestamp_opt(1_000, 0).unwrap()))
            .await
            .unwrap();
        writer
            .enqueue(close_app_event(&process.unique_key(), first_end))
            .await
            .unwrap();
        writer
            .enqueue(close_app_event(
                &process.unique_key(),
                Utc.timestamp_opt(3_000, 0).unwrap(),
            ))
            .await
            .unwrap();

        let events = db.app_events().await.unwrap();
        assert_eq!(events[0].end_time, Some(first_end));
    }

    #[tokio::test]
    async fn clear_removes_all_history() {
        let dir = TempDir::new().unwrap();
        let db = Database::new(dir.path().join("events.sqlite3"), 8).unwrap();
        let writer = db.writer();
        for pid in 1..=3 {
            writer
                .enqueue(log_app_event(&firefox(pid, 7), Utc::now()))
                .await
                .unwrap();
        }
        assert_eq!(db.app_event_count().await.unwrap(), 3);

        writer.enqueue(clear_app_events()).await.unwrap();
        assert_eq!(db.app_event_count().await.unwrap(), 0);
    }
}
