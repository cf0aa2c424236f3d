//! `docent ingest <path>`: ingest a local file without a running server.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;

use docent_domain::config::Config;

use crate::bootstrap;
use crate::runtime::ingest::guess_content_type;

pub async fn ingest(
    config: Arc<Config>,
    path: &Path,
    name: Option<String>,
    content_type: Option<String>,
) -> anyhow::Result<()> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let name = match name {
        Some(n) => n,
        None => path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .with_context(|| format!("{} has no file name; pass --name", path.display()))?,
    };
    let content_type = content_type.unwrap_or_else(|| guess_content_type(&name).to_string());

    let state = bootstrap::build_app_state(config, true).await?;
    let report = state
        .ingestor
        .ingest(&name, &bytes, &content_type)
        .await
        .with_context(|| format!("ingesting {name}"))?;

    println!(
        "{}: {} chars, {}/{} chunks indexed",
        report.source_id, report.chars, report.chunks_indexed, report.chunks_total
    );
    if report.chunks_indexed < report.chunks_total {
        eprintln!(
            "note: only the first {} chunks were indexed (retrieval.max_chunks_per_call)",
            report.chunks_indexed
        );
    }
    Ok(())
}
