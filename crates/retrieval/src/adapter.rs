//! Embeds chunks into the vector index and answers similarity queries.

use crate::index::{ChunkMetadata, IndexEntry, VectorIndex};
use docent_domain::error::{Error, Result};
use docent_domain::trace::TraceEvent;
use docent_providers::Inference;
use serde::Serialize;
use std::sync::Arc;

/// A chunk returned by [`RetrievalIndex::query`].
#[derive(Debug, Clone, Serialize)]
pub struct RetrievedChunk {
    pub text: String,
    pub score: f32,
    pub metadata: ChunkMetadata,
}

/// What an [`RetrievalIndex::index`] call covered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IndexOutcome {
    pub chunks_total: usize,
    pub chunks_indexed: usize,
}

/// Stable id for chunk `index` of `source_id`.
pub fn chunk_id(source_id: &str, index: usize) -> String {
    format!("{source_id}::{index}")
}

pub struct RetrievalIndex {
    inference: Arc<dyn Inference>,
    index: Arc<dyn VectorIndex>,
    max_chunks_per_call: usize,
}

impl RetrievalIndex {
    pub fn new(
        inference: Arc<dyn Inference>,
        index: Arc<dyn VectorIndex>,
        max_chunks_per_call: usize,
    ) -> Self {
        Self { inference, index, max_chunks_per_call }
    }

    /// Embed and upsert up to `max_chunks_per_call` chunks of one source.
    ///
    /// Chunks past the cap are dropped. The embedded chunks go to the
    /// index in a single upsert, so a persistent index writes once per
    /// call. An embedding failure stops the call with [`Error::Index`]
    /// after upserting the chunks embedded before it; nothing is rolled
    /// back.
    pub async fn index(&self, source_id: &str, chunks: &[String]) -> Result<IndexOutcome> {
        let take = chunks.len().min(self.max_chunks_per_call);
        if take < chunks.len() {
            tracing::debug!(
                source_id = %source_id,
                dropped = chunks.len() - take,
                "chunk cap reached, remaining chunks not indexed"
            );
        }

        let mut entries = Vec::with_capacity(take);
        for (chunk_index, text) in chunks.iter().take(take).enumerate() {
            let vector = match self.inference.embed(text).await {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!(source_id = %source_id, chunk_index, error = %e, "embedding failed");
                    self.upsert(entries).await?;
                    return Err(Error::Index(format!(
                        "embedding chunk {chunk_index} of '{source_id}': {e}"
                    )));
                }
            };

            entries.push(IndexEntry {
                id: chunk_id(source_id, chunk_index),
                vector,
                metadata: ChunkMetadata {
                    source_id: source_id.to_string(),
                    text: text.clone(),
                    chunk_index,
                },
            });
        }
        self.upsert(entries).await?;

        TraceEvent::DocumentIndexed {
            source_id: source_id.to_string(),
            chunks_total: chunks.len(),
            chunks_indexed: take,
        }
        .emit();

        Ok(IndexOutcome { chunks_total: chunks.len(), chunks_indexed: take })
    }

    async fn upsert(&self, entries: Vec<IndexEntry>) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        self.index.upsert(entries).await.map_err(|e| match e {
            Error::Index(_) => e,
            other => Error::Index(other.to_string()),
        })
    }

    /// Up to `top_k` chunks most similar to `text`, best first.
    ///
    /// Best effort: an empty index, a failed embedding, or a failed lookup
    /// all yield an empty list.
    pub async fn query(&self, text: &str, top_k: usize) -> Vec<RetrievedChunk> {
        if top_k == 0 || text.trim().is_empty() {
            return Vec::new();
        }

        let vector = match self.inference.embed(text).await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "query embedding failed, continuing without context");
                return Vec::new();
            }
        };

        match self.index.query(&vector, top_k).await {
            Ok(hits) => hits
                .into_iter()
                .map(|h| RetrievedChunk {
                    text: h.metadata.text.clone(),
                    score: h.score,
                    metadata: h.metadata,
                })
                .collect(),
            Err(e) => {
                tracing::warn!(error = %e, "vector query failed, continuing without context");
                Vec::new()
            }
        }
    }
}
