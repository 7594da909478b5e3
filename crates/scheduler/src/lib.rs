pub mod cron;
pub mod trigger_manager;

pub use cron::{CronJob, ScheduleSpec};
pub use trigger_manager::TriggerManager;
