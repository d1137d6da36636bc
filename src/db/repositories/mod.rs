pub mod app_events;
pub mod logs;
pub mod screen_time;
