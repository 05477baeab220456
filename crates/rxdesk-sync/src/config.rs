//! Synchronizer configuration.

use std::time::Duration;

use serde::Deserialize;

/// Configuration for a mounted dashboard view.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// Capacity of the engine's input queue (commands and write outcomes).
    #[serde(default = "SyncConfig::default_queue_capacity")]
    pub queue_capacity: usize,

    /// How long a write may stay in flight before it settles as failed.
    #[serde(default = "SyncConfig::default_write_timeout")]
    pub write_timeout_seconds: u64,
}

impl SyncConfig {
    const fn default_queue_capacity() -> usize {
        256
    }

    const fn default_write_timeout() -> u64 {
        15
    }

    /// Get the write timeout as a `Duration`.
    #[must_use]
    pub const fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_seconds)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            queue_capacity: Self::default_queue_capacity(),
            write_timeout_seconds: Self::default_write_timeout(),
        }
    }
}
