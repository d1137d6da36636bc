pub mod blocklist;
pub mod health;
pub mod manager;
pub mod process_events;
pub mod running_state;
pub mod subscriber;

pub use blocklist::{
    AddOutcome, BlocklistProvider, BlocklistSubscriber, JsonBlocklist, ProcessTerminator,
    RemoveOutcome, SysinfoTerminator,
};
pub use health::{HealthStatus, ManagerState};
pub use manager::{MonitorConfig, MonitoringManager};
pub use process_events::{ProcessEventSubscriber, RecoveryReport};
pub use subscriber::{Capability, ProcessSubscriber, Resettable};
