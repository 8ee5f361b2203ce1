//! Listing and retention of the backups in an output directory.
//!
//! Only entries named `<prefix>_<YYYYmmdd_HHMMSS>[_N][.tar.gz]` are ever
//! considered. Anything else in the directory, including prefixed names
//! without a parsable timestamp, is left untouched.

use crate::archive::Archiver;
use crate::manifest::BackupManifest;
use crate::paths::BackupName;
use crate::Result;
use chrono::{DateTime, Duration, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// One backup found in an output directory.
#[derive(Debug, Clone)]
pub struct BackupEntry {
    pub name: String,
    pub path: PathBuf,
    /// Timestamp from the backup name
    pub created_at: DateTime<Utc>,
    pub archived: bool,
    /// Bytes on disk
    pub size_bytes: u64,
    /// Parsed manifest, when readable
    pub manifest: Option<BackupManifest>,
}

impl BackupEntry {
    /// Whether the backup finished writing its manifest.
    pub fn is_complete(&self) -> bool {
        self.manifest.as_ref().map_or(false, |m| m.is_complete())
    }
}

/// Named backups in `output`, oldest first.
fn scan(output: &Path, prefix: &str) -> Result<Vec<(String, PathBuf, DateTime<Utc>)>> {
    let names = BackupName::new(prefix)?;
    let mut found = Vec::new();

    if !output.is_dir() {
        return Ok(found);
    }

    for entry in fs::read_dir(output)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if let Some(ts) = names.timestamp(&name) {
            found.push((name, entry.path(), ts));
        }
    }

    found.sort_by(|a, b| a.2.cmp(&b.2).then_with(|| a.0.cmp(&b.0)));
    Ok(found)
}

/// List the backups carrying `prefix` in `output`.
pub fn list_backups(output: &Path, prefix: &str, archiver: &dyn Archiver) -> Result<Vec<BackupEntry>> {
    let mut entries = Vec::new();

    for (name, path, created_at) in scan(output, prefix)? {
        let archived = path.is_file();
        let (size_bytes, manifest) = if archived {
            let manifest = archiver
                .read_manifest(&path)
                .ok()
                .flatten()
                .and_then(|text| toml::from_str(&text).ok());
            (fs::metadata(&path)?.len(), manifest)
        } else {
            (
                crate::fsops::tree_size(&path)?,
                BackupManifest::read(&path).ok(),
            )
        };
        if manifest.is_none() {
            debug!(path = ?path, "Backup has no readable manifest");
        }

        entries.push(BackupEntry {
            name,
            path,
            created_at,
            archived,
            size_bytes,
            manifest,
        });
    }

    Ok(entries)
}

/// Delete backups carrying `prefix` that are strictly older than
/// `retention_days`. Returns the removed paths. `retention_days = 0`
/// disables the sweep.
pub fn sweep_expired(
    output: &Path,
    prefix: &str,
    retention_days: u32,
    now: DateTime<Utc>,
) -> Result<Vec<PathBuf>> {
    if retention_days == 0 {
        return Ok(Vec::new());
    }

    let cutoff = now - Duration::days(i64::from(retention_days));
    let mut removed = Vec::new();

    for (_, path, created_at) in scan(output, prefix)? {
        if created_at >= cutoff {
            continue;
        }
        let meta = path.symlink_metadata()?;
        if meta.is_dir() {
            fs::remove_dir_all(&path)?;
        } else {
            fs::remove_file(&path)?;
        }
        info!(path = ?path, created_at = %created_at, "Removed expired backup");
        removed.push(path);
    }

    Ok(removed)
}
