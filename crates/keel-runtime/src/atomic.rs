use anyhow::{Context, Result};
use std::io::Write;
use std::path::Path;

/// Replace `path` with `content` via temp file + rename, creating parent
/// directories as needed. Readers never observe a half-written file.
///
/// Shared by the file tools and checkpoint rewind. The temp file work runs
/// on the blocking pool.
pub async fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .context(format!("Path has no parent directory: {:?}", path))?
        .to_path_buf();
    tokio::fs::create_dir_all(&parent)
        .await
        .context(format!("Failed to create directories: {:?}", parent))?;

    let path = path.to_path_buf();
    let content = content.to_vec();
    tokio::task::spawn_blocking(move || persist(&parent, &path, &content))
        .await
        .context("Atomic write task panicked")?
}

fn persist(parent: &Path, path: &Path, content: &[u8]) -> Result<()> {
    let mut tmp = tempfile::NamedTempFile::new_in(parent)
        .context("Failed to create temp file for atomic write")?;
    tmp.write_all(content)
        .context("Failed to write to temp file")?;
    tmp.flush()?;
    tmp.persist(path)
        .context(format!("Failed to persist file: {:?}", path))?;
    Ok(())
}
