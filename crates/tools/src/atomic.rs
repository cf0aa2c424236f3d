use std::path::Path;
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Replace `path` with `bytes` in one step: write a uniquely named `.tmp`
/// sibling, sync it, then rename over the target. Readers see either the
/// old file or the new one, never a partial write.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }

    let tmp_name = format!(
        ".{}.{}.tmp",
        path.file_name().unwrap_or_default().to_string_lossy(),
        uuid::Uuid::new_v4().as_simple()
    );
    let tmp_path = path.with_file_name(tmp_name);

    let mut file = fs::File::create(&tmp_path).await?;
    file.write_all(bytes).await?;
    file.flush().await?;
    file.sync_data().await?;
    drop(file);

    if let Err(e) = fs::rename(&tmp_path, path).await {
        let _ = fs::remove_file(&tmp_path).await;
        return Err(e);
    }
    Ok(())
}
