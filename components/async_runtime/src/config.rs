//! Scheduler configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Limits applied by an [`crate::EventLoop`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Resumptions allowed per task before it is stopped; 0 disables the limit
    pub max_turns: usize,
    /// How long every remaining task may stay blocked before the loop gives up
    pub idle_timeout_ms: u64,
}

impl SchedulerConfig {
    /// Idle timeout as a duration.
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_turns: 100_000,
            idle_timeout_ms: 30_000,
        }
    }
}
