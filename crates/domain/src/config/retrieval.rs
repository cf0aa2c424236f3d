use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Retrieval (chunking + vector index)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Window length in characters.
    #[serde(default = "d_chunk_size")]
    pub chunk_size: usize,
    /// Characters shared by consecutive windows. Must be `< chunk_size`.
    #[serde(default = "d_chunk_overlap")]
    pub chunk_overlap: usize,
    /// Chunks beyond this count are dropped by a single `index` call.
    #[serde(default = "d_max_chunks_per_call")]
    pub max_chunks_per_call: usize,
    #[serde(default = "d_top_k")]
    pub top_k: usize,
    /// JSON snapshot of the in-process index. Relative paths resolve
    /// against `storage.root`. `None` keeps the index memory-only.
    #[serde(default)]
    pub index_path: Option<PathBuf>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            chunk_size: d_chunk_size(),
            chunk_overlap: d_chunk_overlap(),
            max_chunks_per_call: d_max_chunks_per_call(),
            top_k: d_top_k(),
            index_path: None,
        }
    }
}

fn d_chunk_size() -> usize {
    800
}
fn d_chunk_overlap() -> usize {
    100
}
fn d_max_chunks_per_call() -> usize {
    50
}
fn d_top_k() -> usize {
    3
}
