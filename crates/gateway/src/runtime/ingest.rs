//! Document ingestion: store, convert to text, chunk, index.

use std::sync::Arc;

use serde::Serialize;

use docent_domain::config::RetrievalConfig;
use docent_domain::error::{Error, Result};
use docent_providers::traits::is_textual;
use docent_providers::Inference;
use docent_retrieval::{chunk_text, RetrievalIndex};
use docent_tools::ObjectStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub source_id: String,
    pub chunks_total: usize,
    pub chunks_indexed: usize,
    /// Characters of extracted text.
    pub chars: usize,
}

pub struct Ingestor {
    inference: Arc<dyn Inference>,
    objects: Arc<dyn ObjectStore>,
    retrieval: Arc<RetrievalIndex>,
    chunk_size: usize,
    chunk_overlap: usize,
}

impl Ingestor {
    pub fn new(
        inference: Arc<dyn Inference>,
        objects: Arc<dyn ObjectStore>,
        retrieval: Arc<RetrievalIndex>,
        cfg: &RetrievalConfig,
    ) -> Self {
        Self {
            inference,
            objects,
            retrieval,
            chunk_size: cfg.chunk_size,
            chunk_overlap: cfg.chunk_overlap,
        }
    }

    /// Ingest `bytes` under `name`, which becomes the chunks' source id.
    ///
    /// The raw object is stored before conversion, so `read_file` can
    /// serve it even if indexing later fails.
    pub async fn ingest(&self, name: &str, bytes: &[u8], content_type: &str) -> Result<IngestReport> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::Config("document name must not be empty".into()));
        }
        let content_type = if content_type.trim().is_empty() {
            guess_content_type(name)
        } else {
            content_type.trim()
        };

        self.objects.put(name, bytes, content_type).await?;

        let text = if is_textual(content_type) {
            String::from_utf8(bytes.to_vec())
                .map_err(|_| Error::Config(format!("{name} is declared {content_type} but is not UTF-8")))?
        } else {
            self.inference.document_to_text(bytes, content_type).await?
        };

        let chunks = chunk_text(&text, self.chunk_size, self.chunk_overlap)?;
        let outcome = self.retrieval.index(name, &chunks).await?;

        tracing::info!(
            source_id = %name,
            content_type = %content_type,
            chars = text.chars().count(),
            chunks_total = outcome.chunks_total,
            chunks_indexed = outcome.chunks_indexed,
            "document ingested"
        );

        Ok(IngestReport {
            source_id: name.to_string(),
            chunks_total: outcome.chunks_total,
            chunks_indexed: outcome.chunks_indexed,
            chars: text.chars().count(),
        })
    }
}

/// Content type from a file extension, for callers that give no hint.
pub fn guess_content_type(name: &str) -> &'static str {
    let ext = name
        .rsplit_once('.')
        .map(|(_, e)| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "md" | "markdown" => "text/markdown",
        "txt" | "text" | "log" => "text/plain",
        "html" | "htm" => "text/html",
        "csv" => "text/csv",
        "json" => "application/json",
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "gif" => "image/gif",
        _ => "application/octet-stream",
    }
}
