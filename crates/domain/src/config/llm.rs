use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Inference provider
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The single OpenAI-compatible endpoint that serves chat, embeddings,
/// image generation, and document extraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Provider id reported in logs and errors.
    #[serde(default = "d_provider_id")]
    pub provider_id: String,
    #[serde(default = "d_base_url")]
    pub base_url: String,
    /// Environment variable holding the API key.
    #[serde(default = "d_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "d_chat_model")]
    pub chat_model: String,
    #[serde(default = "d_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "d_image_model")]
    pub image_model: String,
    /// Model used for image/PDF → text extraction. Falls back to `chat_model`.
    #[serde(default)]
    pub vision_model: Option<String>,
    #[serde(default = "d_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "d_temperature")]
    pub temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider_id: d_provider_id(),
            base_url: d_base_url(),
            api_key_env: d_api_key_env(),
            chat_model: d_chat_model(),
            embedding_model: d_embedding_model(),
            image_model: d_image_model(),
            vision_model: None,
            timeout_secs: d_timeout_secs(),
            temperature: d_temperature(),
        }
    }
}

impl LlmConfig {
    pub fn effective_vision_model(&self) -> &str {
        self.vision_model.as_deref().unwrap_or(&self.chat_model)
    }
}

fn d_provider_id() -> String {
    "openai".into()
}
fn d_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn d_api_key_env() -> String {
    "OPENAI_API_KEY".into()
}
fn d_chat_model() -> String {
    "gpt-4o-mini".into()
}
fn d_embedding_model() -> String {
    "text-embedding-3-small".into()
}
fn d_image_model() -> String {
    "gpt-image-1".into()
}
fn d_timeout_secs() -> u64 {
    120
}
fn d_temperature() -> f32 {
    0.2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vision_model_falls_back_to_chat_model() {
        let cfg = LlmConfig::default();
        assert_eq!(cfg.effective_vision_model(), "gpt-4o-mini");

        let cfg = LlmConfig { vision_model: Some("gpt-4o".into()), ..LlmConfig::default() };
        assert_eq!(cfg.effective_vision_model(), "gpt-4o");
    }
}
