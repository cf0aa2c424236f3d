use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Capabilities
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilitiesConfig {
    /// Search page URL; `{query}` is replaced by the url-encoded query.
    #[serde(default = "d_search_url")]
    pub search_url: String,
    /// Visible page text longer than this is truncated.
    #[serde(default = "d_max_page_chars")]
    pub max_page_chars: usize,
    #[serde(default = "d_max_file_chars")]
    pub max_file_chars: usize,
    /// Run image prompts through one chat call before generating.
    #[serde(default = "d_true")]
    pub rewrite_image_prompts: bool,
    #[serde(default = "d_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
}

impl Default for CapabilitiesConfig {
    fn default() -> Self {
        Self {
            search_url: d_search_url(),
            max_page_chars: d_max_page_chars(),
            max_file_chars: d_max_file_chars(),
            rewrite_image_prompts: true,
            fetch_timeout_secs: d_fetch_timeout_secs(),
        }
    }
}

impl CapabilitiesConfig {
    /// Substitute an already-encoded query into `search_url`.
    pub fn search_url_for(&self, encoded_query: &str) -> String {
        self.search_url.replace("{query}", encoded_query)
    }
}

fn d_search_url() -> String {
    "https://html.duckduckgo.com/html/?q={query}".into()
}
fn d_max_page_chars() -> usize {
    8_000
}
fn d_max_file_chars() -> usize {
    20_000
}
fn d_true() -> bool {
    true
}
fn d_fetch_timeout_secs() -> u64 {
    20
}
