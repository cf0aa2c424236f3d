use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Turn loop
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnConfig {
    /// Tool-dispatch round trips allowed per turn before it is forced to end.
    #[serde(default = "d_max_round_trips")]
    pub max_round_trips: usize,
    /// Static instruction placed at the head of every system prompt.
    #[serde(default = "d_system_prompt")]
    pub system_prompt: String,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            max_round_trips: d_max_round_trips(),
            system_prompt: d_system_prompt(),
        }
    }
}

fn d_max_round_trips() -> usize {
    5
}
fn d_system_prompt() -> String {
    "You are a helpful research assistant. Use the provided context when it is \
     relevant, call tools when you need fresh information, and answer concisely."
        .into()
}
