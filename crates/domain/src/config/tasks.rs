use serde::{Deserialize, Serialize};
use std::time::Duration;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Durable task engine
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Retry policy for pipeline steps plus research pipeline limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    /// Attempts per step (first try included). Clamped to at least 1.
    #[serde(default = "d_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "d_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "d_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Pages fetched by the research pipeline.
    #[serde(default = "d_max_sources")]
    pub max_sources: usize,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            max_attempts: d_max_attempts(),
            initial_backoff_ms: d_initial_backoff_ms(),
            max_backoff_ms: d_max_backoff_ms(),
            max_sources: d_max_sources(),
        }
    }
}

impl TaskConfig {
    /// Delay before retry number `retry` (1-based): doubles from
    /// `initial_backoff_ms`, capped at `max_backoff_ms`.
    pub fn backoff(&self, retry: u32) -> Duration {
        let shift = retry.saturating_sub(1).min(31);
        let ms = self
            .initial_backoff_ms
            .saturating_mul(1u64 << shift)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }

    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

fn d_max_attempts() -> u32 {
    3
}
fn d_initial_backoff_ms() -> u64 {
    500
}
fn d_max_backoff_ms() -> u64 {
    30_000
}
fn d_max_sources() -> usize {
    5
}
