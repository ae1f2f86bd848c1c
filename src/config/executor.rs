//! Single-flight executor settings

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Admission queue and drain settings for the generation worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Jobs allowed to wait behind the one currently executing.
    /// Submissions beyond this fail fast with `EngineBusy`.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Upper bound on how long shutdown waits for the in-flight job, in seconds.
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout_secs: u64,
}

fn default_queue_capacity() -> usize {
    16
}

fn default_drain_timeout() -> u64 {
    30
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            drain_timeout_secs: default_drain_timeout(),
        }
    }
}

impl ExecutorConfig {
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }
}
