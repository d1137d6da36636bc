//! Foreground-time rows, aggregated per executable inside a recency window.
//!
//! A row is "current" for an executable while its timestamp is newer than
//! `now - window`. Flushing adds seconds to the current row and moves its
//! timestamp forward, so an application that keeps focus keeps one row.

use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, types::Value};

use crate::db::{
    helpers::{from_unix_seconds, to_i64, unix_seconds},
    models::{ScreenTimeRecord, ScreenTimeTotal},
    Database, WriteRequest,
};

pub const DEFAULT_RECENCY_WINDOW: Duration = Duration::from_secs(300);

const ENSURE_RECORD: &str = "INSERT INTO screen_time (executable_path, timestamp, duration_seconds)
     SELECT ?1, ?2, 0
     WHERE NOT EXISTS (
         SELECT 1 FROM screen_time WHERE executable_path = ?1 AND timestamp > ?3
     )";

const ADD_DURATION: &str = "UPDATE screen_time
     SET duration_seconds = duration_seconds + ?1,
         timestamp = ?2
     WHERE id = (
         SELECT id FROM screen_time
         WHERE executable_path = ?3 AND timestamp > ?4
         ORDER BY timestamp DESC, id DESC
         LIMIT 1
     )";

const DELETE_SCREEN_TIME: &str = "DELETE FROM screen_time";

fn window_start(now: DateTime<Utc>, window: Duration) -> i64 {
    let window = i64::try_from(window.as_secs()).unwrap_or(i64::MAX);
    unix_seconds(now).saturating_sub(window)
}

/// Inserts an empty row for `exe_path` unless one already exists inside the
/// recency window.
pub fn ensure_record(exe_path: &str, now: DateTime<Utc>, window: Duration) -> WriteRequest {
    WriteRequest::new(
        ENSURE_RECORD,
        vec![
            Value::Text(exe_path.to_string()),
            Value::Integer(unix_seconds(now)),
            Value::Integer(window_start(now, window)),
        ],
    )
}

/// Adds `seconds` to the most recent row of `exe_path` inside the window.
/// Queue this behind [`ensure_record`] so the row is guaranteed to exist.
pub fn add_duration(
    exe_path: &str,
    seconds: u64,
    now: DateTime<Utc>,
    window: Duration,
) -> Result<WriteRequest> {
    Ok(WriteRequest::new(
        ADD_DURATION,
        vec![
            Value::Integer(to_i64(seconds)?),
            Value::Integer(unix_seconds(now)),
            Value::Text(exe_path.to_string()),
            Value::Integer(window_start(now, window)),
        ],
    ))
}

pub fn clear_screen_time() -> WriteRequest {
    WriteRequest::new(DELETE_SCREEN_TIME, Vec::new())
}

impl Database {
    /// Total foreground seconds per executable for rows touched since `since`.
    pub async fn screen_time_totals(&self, since: DateTime<Utc>) -> Result<Vec<ScreenTimeTotal>> {
        let since = unix_seconds(since);
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT executable_path, SUM(duration_seconds) AS total
                 FROM screen_time
                 WHERE executable_path IS NOT NULL AND timestamp >= ?1
                 GROUP BY executable_path
                 ORDER BY total DESC, executable_path",
            )?;
            let rows = stmt
                .query_map(params![since], |row| {
                    Ok(ScreenTimeTotal {
                        executable_path: row.get(0)?,
                        duration_seconds: row.get(1)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    pub async fn screen_time_records(&self, exe_path: &str) -> Result<Vec<ScreenTimeRecord>> {
        let exe_path = exe_path.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, executable_path, timestamp, duration_seconds
                 FROM screen_time
                 WHERE executable_path = ?1
                 ORDER BY id",
            )?;
            let mut rows = stmt.query(params![exe_path])?;
            let mut records = Vec::new();
            while let Some(row) = rows.next()? {
                let timestamp: i64 = row.get(2)?;
                records.push(ScreenTimeRecord {
                    id: row.get(0)?,
                    executable_path: row.get(1)?,
                    timestamp: from_unix_seconds(timestamp, "timestamp")?,
                    duration_seconds: row.get(3)?,
                });
            }
            Ok(records)
        })
        .await
    }
}
