//! Filesystem copy and measurement.

use crate::Result;
use filetime::FileTime;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Read;
use std::os::unix::fs::{lchown, MetadataExt, PermissionsExt};
use std::path::Path;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Copies files and directory trees.
pub trait FileCopier: Send + Sync {
    /// Copy `src` (file, symlink or directory tree) to `dst`, merging into an
    /// existing directory. Returns the number of regular-file bytes copied.
    fn copy(&self, src: &Path, dst: &Path, preserve_attrs: bool) -> Result<u64>;
}

/// Copier for local filesystems.
///
/// Preserves mode and modification time and, when the process is allowed
/// to, ownership. Symlinks are recreated rather than followed.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalCopier;

impl LocalCopier {
    pub fn new() -> Self {
        Self
    }

    fn copy_entry(src: &Path, dst: &Path, meta: &fs::Metadata) -> Result<u64> {
        let file_type = meta.file_type();
        if file_type.is_symlink() {
            let target = fs::read_link(src)?;
            if dst.symlink_metadata().is_ok() {
                fs::remove_file(dst)?;
            }
            std::os::unix::fs::symlink(&target, dst)?;
            Ok(0)
        } else if file_type.is_dir() {
            fs::create_dir_all(dst)?;
            Ok(0)
        } else if file_type.is_file() {
            if let Some(parent) = dst.parent() {
                fs::create_dir_all(parent)?;
            }
            Ok(fs::copy(src, dst)?)
        } else {
            warn!(path = ?src, "Skipping special file");
            Ok(0)
        }
    }

    fn apply_attrs(dst: &Path, meta: &fs::Metadata) -> Result<()> {
        if !meta.file_type().is_symlink() {
            fs::set_permissions(dst, fs::Permissions::from_mode(meta.mode()))?;
            filetime::set_file_mtime(dst, FileTime::from_last_modification_time(meta))?;
        }
        // Only root may give files away; anyone else keeps ownership.
        if let Err(e) = lchown(dst, Some(meta.uid()), Some(meta.gid())) {
            debug!(path = ?dst, error = %e, "Ownership not preserved");
        }
        Ok(())
    }
}

impl FileCopier for LocalCopier {
    fn copy(&self, src: &Path, dst: &Path, preserve_attrs: bool) -> Result<u64> {
        let mut bytes = 0u64;
        // Directory attributes are applied after their contents are written.
        let mut dirs = Vec::new();

        for entry in WalkDir::new(src).follow_links(false) {
            let entry = entry?;
            let rel = entry.path().strip_prefix(src).unwrap_or(Path::new(""));
            let target = if rel.as_os_str().is_empty() {
                dst.to_path_buf()
            } else {
                dst.join(rel)
            };
            let meta = entry.path().symlink_metadata()?;

            bytes += Self::copy_entry(entry.path(), &target, &meta)?;

            if preserve_attrs {
                if meta.is_dir() {
                    dirs.push((target, meta));
                } else {
                    Self::apply_attrs(&target, &meta)?;
                }
            }
        }

        for (dir, meta) in dirs.iter().rev() {
            Self::apply_attrs(dir, meta)?;
        }

        debug!(src = ?src, dst = ?dst, bytes, "Copied");
        Ok(bytes)
    }
}

/// Total size of the regular files under `path` (or of `path` itself).
pub fn tree_size(path: &Path) -> Result<u64> {
    let mut total = 0;
    for entry in WalkDir::new(path).follow_links(false) {
        let entry = entry?;
        if entry.file_type().is_file() {
            total += entry.metadata()?.len();
        }
    }
    Ok(total)
}

/// Compute the SHA256 of a file as `sha256:<hex>`.
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];

    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(format!("sha256:{:x}", hasher.finalize()))
}

/// Human-readable byte count.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
