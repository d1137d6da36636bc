pub mod app_event;
pub mod screen_time;

pub use app_event::{ActiveSession, AppEvent};
pub use screen_time::{ScreenTimeRecord, ScreenTimeTotal};
