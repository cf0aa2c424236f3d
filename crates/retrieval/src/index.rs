//! Vector index collaborator and an in-process implementation.

use docent_domain::error::{Error, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// What is stored alongside each chunk's vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub source_id: String,
    pub text: String,
    pub chunk_index: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    pub id: String,
    pub vector: Vec<f32>,
    pub metadata: ChunkMetadata,
}

#[derive(Debug, Clone)]
pub struct ScoredEntry {
    pub id: String,
    pub score: f32,
    pub metadata: ChunkMetadata,
}

#[async_trait::async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or replace entries by id.
    async fn upsert(&self, entries: Vec<IndexEntry>) -> Result<()>;

    /// The `top_k` entries most similar to `vector`, best first.
    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<ScoredEntry>>;
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }
    dot / (mag_a * mag_b)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// In-process index
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Brute-force cosine index held in memory.
///
/// With a snapshot path, every upsert rewrites the whole index to disk
/// atomically and [`open`](Self::open) reloads it.
pub struct InMemoryVectorIndex {
    entries: RwLock<BTreeMap<String, IndexEntry>>,
    snapshot: Option<PathBuf>,
    /// Serializes snapshot writes so an older state never lands last.
    write_lock: tokio::sync::Mutex<()>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            snapshot: None,
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Load `path` if it exists and keep writing snapshots to it.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries = match std::fs::read(&path) {
            Ok(raw) => {
                let list: Vec<IndexEntry> = serde_json::from_slice(&raw).map_err(|e| {
                    Error::Index(format!("corrupt index snapshot {}: {e}", path.display()))
                })?;
                list.into_iter().map(|e| (e.id.clone(), e)).collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        tracing::info!(path = %path.display(), entries = entries.len(), "vector index loaded");

        Ok(Self {
            entries: RwLock::new(entries),
            snapshot: Some(path),
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    async fn write_snapshot(&self) -> Result<()> {
        let Some(path) = &self.snapshot else {
            return Ok(());
        };
        let _guard = self.write_lock.lock().await;
        let bytes = {
            let entries = self.entries.read();
            serde_json::to_vec(&entries.values().collect::<Vec<_>>())?
        };
        docent_tools::atomic::write_atomic(path, &bytes)
            .await
            .map_err(|e| Error::Index(format!("snapshot write failed: {e}")))
    }
}

impl Default for InMemoryVectorIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn upsert(&self, entries: Vec<IndexEntry>) -> Result<()> {
        {
            let mut map = self.entries.write();
            for entry in entries {
                map.insert(entry.id.clone(), entry);
            }
        }
        self.write_snapshot().await
    }

    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<ScoredEntry>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        let map = self.entries.read();
        let mut scored: Vec<ScoredEntry> = map
            .values()
            .map(|e| ScoredEntry {
                id: e.id.clone(),
                score: cosine_similarity(vector, &e.vector),
                metadata: e.metadata.clone(),
            })
            .collect();
        scored.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        scored.truncate(top_k);
        Ok(scored)
    }
}
