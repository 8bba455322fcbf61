//! Page-side collector settings.

use serde::{Deserialize, Serialize};

/// Default quiet interval before a mutation burst triggers a rescan.
pub const DEFAULT_DEBOUNCE_MS: u64 = 3_000;

/// Default minimum interval between two detection attempts.
pub const DEFAULT_COOLDOWN_MS: u64 = 5_000;

/// Default cap on nested frames visited per collection.
pub const DEFAULT_MAX_NESTED_FRAMES: usize = 10;

/// Timing and traversal limits for the corpus collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CollectorConfig {
    pub debounce_ms: u64,
    pub cooldown_ms: u64,
    pub max_nested_frames: usize,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            cooldown_ms: DEFAULT_COOLDOWN_MS,
            max_nested_frames: DEFAULT_MAX_NESTED_FRAMES,
        }
    }
}
