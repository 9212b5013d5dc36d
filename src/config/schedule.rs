//! Polling schedule.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleMode {
    /// Poll every `interval` seconds until shutdown.
    #[default]
    Interval,
    /// Poll every sensor once, then exit.
    Once,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ScheduleConfig {
    pub mode: ScheduleMode,

    /// Seconds between the start of two consecutive cycles.
    #[validate(range(min = 1, message = "Poll interval must be at least 1 second"))]
    pub interval: u64,
}

impl ScheduleConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval)
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            mode: ScheduleMode::Interval,
            interval: 10,
        }
    }
}
