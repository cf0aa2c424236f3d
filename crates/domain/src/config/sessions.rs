use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session actors
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    /// An actor with no attached connection exits after this long.
    #[serde(default = "d_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Bounded inbox depth per actor.
    #[serde(default = "d_inbox_capacity")]
    pub inbox_capacity: usize,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: d_idle_timeout_secs(),
            inbox_capacity: d_inbox_capacity(),
        }
    }
}

fn d_idle_timeout_secs() -> u64 {
    3600
}
fn d_inbox_capacity() -> usize {
    64
}
