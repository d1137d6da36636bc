use chrono::{DateTime, Utc};
use rusqlite::types::Value;

use crate::db::{helpers::unix_seconds, WriteRequest};

const INSERT_LOG: &str = "INSERT INTO logs (timestamp, level, message) VALUES (?1, ?2, ?3)";

pub fn insert_log(at: DateTime<Utc>, level: log::Level, message: String) -> WriteRequest {
    WriteRequest::new(
        INSERT_LOG,
        vec![
            Value::Integer(unix_seconds(at)),
            Value::Text(level.as_str().to_string()),
            Value::Text(message),
        ],
    )
}
