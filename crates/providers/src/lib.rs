//! `docent-providers`: the inference collaborator.
//!
//! [`Inference`] is the narrow contract the rest of docent consumes;
//! [`OpenAiCompatProvider`] implements it against any endpoint that speaks
//! the OpenAI chat/embeddings/images wire format.

pub mod openai_compat;
pub mod traits;
pub(crate) mod sse;
pub(crate) mod util;

pub use openai_compat::OpenAiCompatProvider;
pub use traits::{ChatRequest, ChatResponse, GeneratedImage, Inference};

use docent_domain::config::LlmConfig;
use docent_domain::error::Result;
use std::sync::Arc;

/// Build the configured provider.
///
/// With `require_key` set, a missing API key is a `Config` error. Without
/// it the provider is still built and requests go out unauthenticated,
/// which suits local endpoints (Ollama, vLLM) that take no key.
pub fn create_provider(cfg: &LlmConfig, require_key: bool) -> Result<Arc<dyn Inference>> {
    let api_key = match util::resolve_api_key(&cfg.api_key_env) {
        Ok(key) => Some(key),
        Err(e) if require_key => return Err(e),
        Err(e) => {
            tracing::warn!(error = %e, "starting without an inference API key");
            None
        }
    };
    Ok(Arc::new(OpenAiCompatProvider::new(cfg, api_key)?))
}
