use std::convert::TryFrom;

use anyhow::{anyhow, Result};
use chrono::{DateTime, TimeZone, Utc};

pub fn to_i64(value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| anyhow!("value {value} exceeds SQLite INTEGER range"))
}

/// Store timestamps are whole Unix seconds.
pub fn unix_seconds(at: DateTime<Utc>) -> i64 {
    at.timestamp()
}

pub fn from_unix_seconds(value: i64, field: &str) -> Result<DateTime<Utc>> {
    Utc.timestamp_opt(value, 0)
        .single()
        .ok_or_else(|| anyhow!("{field} contains out-of-range timestamp {value}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seconds_round_trip_drops_subsecond_precision() {
        let at = Utc.timestamp_opt(1_700_000_000, 999_000_000).unwrap();
        let stored = unix_seconds(at);
        assert_eq!(stored, 1_700_000_000);
        assert_eq!(from_unix_seconds(stored, "ts").unwrap().timestamp(), stored);
    }

    #[test]
    fn oversized_unsigned_values_are_rejected() {
        assert!(to_i64(u64::MAX).is_err());
        assert_eq!(to_i64(42).unwrap(), 42);
    }
}
