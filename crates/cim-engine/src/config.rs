use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::error::{MergeError, MergeResult};

/// Longest undo window accepted, in hours (ten years).
pub const MAX_UNDO_WINDOW_HOURS: i64 = 10 * 365 * 24;

/// Configuration for the merge engine.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// How long after a merge it may still be undone, in hours.
    pub undo_window_hours: i64,
    /// Reject any involved record whose organization differs from the
    /// request's.
    pub enforce_tenant_isolation: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            undo_window_hours: 7 * 24,
            enforce_tenant_isolation: true,
        }
    }
}

impl EngineConfig {
    /// Check every setting is usable.
    pub fn validate(&self) -> MergeResult<()> {
        self.undo_window().map(|_| ())
    }

    /// The undo window as a duration. Fails for negative windows and windows
    /// longer than [`MAX_UNDO_WINDOW_HOURS`].
    pub fn undo_window(&self) -> MergeResult<Duration> {
        let hours = self.undo_window_hours;
        if !(0..=MAX_UNDO_WINDOW_HOURS).contains(&hours) {
            return Err(MergeError::Config(format!(
                "undo_window_hours must be between 0 and {MAX_UNDO_WINDOW_HOURS}, got {hours}"
            )));
        }
        Duration::try_hours(hours)
            .ok_or_else(|| MergeError::Config(format!("undo_window_hours {hours} is out of range")))
    }
}
