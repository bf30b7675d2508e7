//! Timestamped backups of written and generated files.
//!
//! Backups are named `<prefix>_<YYYYMMDD_HHMMSS>.<ext>` and placed next
//! to their source. Two backups of the same source within one second
//! share a name; the later one wins.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Local};
use glob::Pattern;
use tokio::fs;

/// Timestamp layout used in backup names
pub const BACKUP_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Build a deterministic backup filename
pub fn backup_name(prefix: &str, extension: &str, at: DateTime<Local>) -> String {
    let stamp = at.format(BACKUP_TIMESTAMP_FORMAT);
    if extension.is_empty() {
        format!("{}_{}", prefix, stamp)
    } else {
        format!("{}_{}.{}", prefix, stamp, extension)
    }
}

/// Sibling backup path for `path`, prefixed with its own stem
pub fn sibling_backup_path(path: &Path, at: DateTime<Local>) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "backup".to_string());
    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().to_string())
        .unwrap_or_default();

    let name = backup_name(&stem, &extension, at);
    match path.parent() {
        Some(parent) => parent.join(name),
        None => PathBuf::from(name),
    }
}

/// Paths produced by [`write_with_backup`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteReceipt {
    pub path: PathBuf,
    pub backup: PathBuf,
    pub size_bytes: u64,
}

/// Write `content` to `path` and a timestamped sibling copy.
///
/// Concurrent writers to the same path are not serialized; the last
/// write wins.
pub async fn write_with_backup(path: &Path, content: &[u8]) -> std::io::Result<WriteReceipt> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }

    fs::write(path, content).await?;

    let backup = sibling_backup_path(path, Local::now());
    fs::write(&backup, content).await?;

    Ok(WriteReceipt {
        path: path.to_path_buf(),
        backup,
        size_bytes: content.len() as u64,
    })
}

/// Result of backing up the newest matching output file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputSnapshot {
    pub source: PathBuf,
    pub backup: PathBuf,
}

/// Back up the most recently modified `*.<extension>` file in `dir`.
///
/// Files whose name already starts with `<prefix>_` are earlier backups
/// and never count as the newest output. Returns `Ok(None)` when the
/// directory does not exist or holds no matching file.
pub async fn backup_latest_output(
    dir: &Path,
    extension: &str,
    prefix: &str,
) -> std::io::Result<Option<OutputSnapshot>> {
    let Some(source) = latest_output(dir, extension, prefix).await? else {
        return Ok(None);
    };

    let backup = dir.join(backup_name(prefix, extension, Local::now()));
    fs::copy(&source, &backup).await?;

    Ok(Some(OutputSnapshot { source, backup }))
}

async fn latest_output(dir: &Path, extension: &str, prefix: &str) -> std::io::Result<Option<PathBuf>> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };

    let pattern = Pattern::new(&format!("*.{}", Pattern::escape(extension)))
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
    let backup_prefix = format!("{}_", prefix);

    let mut newest: Option<(SystemTime, PathBuf)> = None;

    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().to_string();
        if !pattern.matches(&name) || name.starts_with(&backup_prefix) {
            continue;
        }

        let metadata = entry.metadata().await?;
        if !metadata.is_file() {
            continue;
        }

        let modified = metadata.modified()?;
        if newest.as_ref().map_or(true, |(best, _)| modified > *best) {
            newest = Some((modified, entry.path()));
        }
    }

    Ok(newest.map(|(_, path)| path))
}
