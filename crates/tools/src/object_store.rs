use crate::atomic::write_atomic;
use chrono::{DateTime, Utc};
use docent_domain::error::{Error, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// An object read back from the store.
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// Named binary objects. Writes replace whole objects, so repeating a
/// `put` with the same name and bytes is harmless.
#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, name: &str, bytes: &[u8], content_type: &str) -> Result<()>;

    /// `Ok(None)` when no object has that exact name.
    async fn get(&self, name: &str) -> Result<Option<StoredObject>>;

    /// Every stored name, sorted.
    async fn list(&self) -> Result<Vec<String>>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Filesystem implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Sidecar written next to each object's bytes.
#[derive(Debug, Serialize, Deserialize)]
struct ObjectMeta {
    name: String,
    content_type: String,
    size: u64,
    stored_at: DateTime<Utc>,
}

/// Stores each object as `<sha256(name)>.bin` plus a `<sha256(name)>.json`
/// sidecar under one directory. Hashing the name keeps arbitrary names
/// (slashes, `..`) from escaping the root.
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn key(name: &str) -> String {
        hex::encode(Sha256::digest(name.as_bytes()))
    }

    fn data_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.bin"))
    }

    fn meta_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.json"))
    }
}

#[async_trait::async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(&self, name: &str, bytes: &[u8], content_type: &str) -> Result<()> {
        if name.trim().is_empty() {
            return Err(Error::Store("object name must not be empty".into()));
        }
        let key = Self::key(name);
        let meta = ObjectMeta {
            name: name.to_string(),
            content_type: content_type.to_string(),
            size: bytes.len() as u64,
            stored_at: Utc::now(),
        };

        // Bytes first: an object is only visible once its sidecar exists.
        write_atomic(&self.data_path(&key), bytes).await?;
        write_atomic(&self.meta_path(&key), &serde_json::to_vec_pretty(&meta)?).await?;

        tracing::debug!(name = %name, content_type = %content_type, size = bytes.len(), "object stored");
        Ok(())
    }

    async fn get(&self, name: &str) -> Result<Option<StoredObject>> {
        let key = Self::key(name);
        let meta_raw = match tokio::fs::read(self.meta_path(&key)).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let meta: ObjectMeta = serde_json::from_slice(&meta_raw)?;
        if meta.name != name {
            return Err(Error::Store(format!("hash collision for object '{name}'")));
        }

        let bytes = tokio::fs::read(self.data_path(&key)).await.map_err(|e| {
            Error::Store(format!("object '{name}' has metadata but no data: {e}"))
        })?;
        Ok(Some(StoredObject { bytes, content_type: meta.content_type }))
    }

    async fn list(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match tokio::fs::read(&path).await {
                Ok(raw) => match serde_json::from_slice::<ObjectMeta>(&raw) {
                    Ok(meta) => names.push(meta.name),
                    Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping unreadable object sidecar"),
                },
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping unreadable object sidecar"),
            }
        }
        names.sort();
        Ok(names)
    }
}
