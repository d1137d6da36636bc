use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use super::sensor::{ProcessSensor, SensorError};
use super::types::ProcessInfo;

pub const DEFAULT_SNAPSHOT_TTL: Duration = Duration::from_millis(500);

struct CachedList {
    processes: Arc<Vec<ProcessInfo>>,
    captured: Instant,
}

/// Short-lived memo of the full process list so several consumers can ask for
/// "all processes" in the same tick without re-enumerating.
///
/// At most one enumeration runs per TTL period: the fast path only takes the
/// read lock, and the slow path re-checks freshness under the write lock
/// before calling the sensor.
pub struct SnapshotCache {
    sensor: Arc<dyn ProcessSensor>,
    ttl: Duration,
    cached: RwLock<Option<CachedList>>,
}

impl SnapshotCache {
    pub fn new(sensor: Arc<dyn ProcessSensor>, ttl: Duration) -> Self {
        Self {
            sensor,
            ttl,
            cached: RwLock::new(None),
        }
    }

    pub fn sensor(&self) -> Arc<dyn ProcessSensor> {
        Arc::clone(&self.sensor)
    }

    pub fn get_all(&self) -> Result<Arc<Vec<ProcessInfo>>, SensorError> {
        {
            let guard = self.cached.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(fresh) = self.fresh(guard.as_ref()) {
                return Ok(fresh);
            }
        }

        let mut guard = self.cached.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(fresh) = self.fresh(guard.as_ref()) {
            return Ok(fresh);
        }

        // An error leaves whatever was cached in place.
        let processes = Arc::new(self.sensor.all_processes()?);
        *guard = Some(CachedList {
            processes: Arc::clone(&processes),
            captured: Instant::now(),
        });
        Ok(processes)
    }

    /// Drops the cached list so the next caller enumerates again.
    pub fn invalidate(&self) {
        let mut guard = self.cached.write().unwrap_or_else(PoisonError::into_inner);
        *guard = None;
    }

    fn fresh(&self, cached: Option<&CachedList>) -> Option<Arc<Vec<ProcessInfo>>> {
        cached
            .filter(|entry| entry.captured.elapsed() < self.ttl)
            .map(|entry| Arc::clone(&entry.processes))
    }
}
