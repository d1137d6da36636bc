pub mod cache;
pub mod filter;
pub mod sensor;
pub mod types;
pub mod window;

pub use cache::{SnapshotCache, DEFAULT_SNAPSHOT_TTL};
pub use filter::{AppFilter, DefaultAppFilter};
pub use sensor::{ProcessSensor, SensorError, SysinfoSensor};
pub use types::{ProcessInfo, ProcessSnapshot, UniqueKey};
pub use window::{select_window_provider, ActiveWindow, ForegroundWindowProvider, NoForegroundWindow};
