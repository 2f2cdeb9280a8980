//! Viewer configuration.

use std::time::Duration;

use paperglass_cache::DEFAULT_TILE_BUDGET_BYTES;
use serde::{Deserialize, Serialize};

/// Tunables for the render pipeline. Serializable so embedders can persist
/// settings; unknown or missing fields fall back to defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    /// Render debounce interval in milliseconds.
    pub debounce_ms: u64,
    /// Shared frame buffers per pool.
    pub buffer_count: usize,
    /// Open documents kept per document cache.
    pub document_cache_capacity: usize,
    /// Tile cache byte budget.
    pub tile_budget_bytes: usize,
    /// Result queue receive timeout in milliseconds.
    pub result_poll_ms: u64,
    /// Tile worker idle poll in milliseconds.
    pub tile_worker_poll_ms: u64,
    /// How long shutdown waits for the executor before detaching.
    pub executor_join_timeout_ms: u64,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 33,
            buffer_count: 2,
            document_cache_capacity: 5,
            tile_budget_bytes: DEFAULT_TILE_BUDGET_BYTES,
            result_poll_ms: 100,
            tile_worker_poll_ms: 100,
            executor_join_timeout_ms: 1000,
        }
    }
}

impl ViewerConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn result_poll(&self) -> Duration {
        Duration::from_millis(self.result_poll_ms)
    }

    pub fn tile_worker_poll(&self) -> Duration {
        Duration::from_millis(self.tile_worker_poll_ms)
    }

    pub fn executor_join_timeout(&self) -> Duration {
        Duration::from_millis(self.executor_join_timeout_ms)
    }
}
