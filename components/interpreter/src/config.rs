//! Runtime configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Limits applied to stacks created by a [`crate::Context`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Maximum number of frames on one stack
    pub max_stack_depth: usize,
    /// How long a blocking invoke waits on an await before giving up
    pub await_timeout_ms: u64,
}

impl RuntimeConfig {
    /// Await timeout as a duration.
    pub fn await_timeout(&self) -> Duration {
        Duration::from_millis(self.await_timeout_ms)
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_stack_depth: 256,
            await_timeout_ms: 30_000,
        }
    }
}
