pub mod controller;
pub mod loop_worker;
pub mod state;

pub use controller::ScreenTimeController;
pub use loop_worker::{resolve_focus, ScreenTimeConfig, ScreenTimeSources};
pub use state::{Focus, ScreenTimeAction, ScreenTimeState};
