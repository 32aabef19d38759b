//! Filesystem helpers shared by config persistence and directory snapshots.

use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::Path;

/// Replace `path` with `bytes` so that readers observe either the old file or
/// the complete new one, never a partial write.
///
/// The payload goes to a sibling temp file (same directory, so the rename
/// stays on one filesystem), is fsynced, then renamed over the target.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent_dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent_dir)
        .with_context(|| format!("Failed to create directory: {}", parent_dir.display()))?;

    let file_name = path
        .file_name()
        .and_then(|v| v.to_str())
        .context("Target path has no file name")?;
    let temp_path = parent_dir.join(format!(".{file_name}.tmp-{}", uuid::Uuid::new_v4()));

    let mut temp_file = OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(&temp_path)
        .with_context(|| format!("Failed to create temporary file: {}", temp_path.display()))?;
    let written = temp_file
        .write_all(bytes)
        .and_then(|()| temp_file.sync_all());
    drop(temp_file);
    if let Err(e) = written {
        let _ = fs::remove_file(&temp_path);
        return Err(e).with_context(|| format!("Failed to write {}", temp_path.display()));
    }

    if let Err(e) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        anyhow::bail!("Failed to atomically replace {}: {e}", path.display());
    }

    sync_directory(parent_dir)
}

#[cfg(unix)]
fn sync_directory(path: &Path) -> Result<()> {
    let dir = File::open(path)
        .with_context(|| format!("Failed to open directory for fsync: {}", path.display()))?;
    dir.sync_all()
        .with_context(|| format!("Failed to fsync directory metadata: {}", path.display()))?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_directory(_path: &Path) -> Result<()> {
    Ok(())
}
