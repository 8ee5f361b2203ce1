//! Backup naming and path helpers.

use crate::{Error, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use std::path::{Component as PathComponent, Path, PathBuf};

/// Timestamp layout embedded in backup names and rename-aside suffixes.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Extension of compressed backups.
pub const ARCHIVE_EXTENSION: &str = "tar.gz";

/// Suffix marker of data renamed aside by a restore.
pub const ASIDE_MARKER: &str = ".pre-restore-";

pub fn timestamp(at: DateTime<Utc>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

/// Join a relative path read from a manifest onto a root.
///
/// Absolute paths and `..` components are rejected so a manifest can never
/// point outside its backup.
pub fn safe_join(root: &Path, relative: &str) -> Result<PathBuf> {
    let rel = Path::new(relative);
    if relative.is_empty() {
        return Err(Error::UnsafePath(relative.to_string()));
    }
    for part in rel.components() {
        match part {
            PathComponent::Normal(_) | PathComponent::CurDir => {}
            _ => return Err(Error::UnsafePath(relative.to_string())),
        }
    }
    Ok(root.join(rel))
}

/// Resolve an absolute config path against the configured root.
///
/// With the default root `/` this is the path itself.
pub fn resolve_under(root: &Path, absolute: &Path) -> PathBuf {
    root.join(strip_root(absolute))
}

/// The path without its leading `/`, for storing absolute paths inside a backup.
pub fn strip_root(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| matches!(c, PathComponent::Normal(_)))
        .collect()
}

/// Pick a fresh backup directory `<output>/<prefix>_<timestamp>`.
///
/// A numeric suffix is added while the name, or its archive, already exists.
pub fn unique_backup_dir(output: &Path, prefix: &str, at: DateTime<Utc>) -> PathBuf {
    let base = format!("{}_{}", prefix, timestamp(at));
    let taken = |name: &str| {
        output.join(name).exists()
            || output
                .join(format!("{}.{}", name, ARCHIVE_EXTENSION))
                .exists()
    };

    if !taken(&base) {
        return output.join(base);
    }
    let mut n = 1u32;
    loop {
        let name = format!("{}_{}", base, n);
        if !taken(&name) {
            return output.join(name);
        }
        n += 1;
    }
}

/// Matcher for backup names carrying one prefix.
#[derive(Debug, Clone)]
pub struct BackupName {
    pattern: Regex,
}

impl BackupName {
    pub fn new(prefix: &str) -> Result<Self> {
        let pattern = Regex::new(&format!(
            r"^{}_(\d{{8}}_\d{{6}})(?:_\d+)?(?:\.{})?$",
            regex::escape(prefix),
            regex::escape(ARCHIVE_EXTENSION)
        ))
        .map_err(|e| Error::InvalidOption(format!("backup prefix '{}': {}", prefix, e)))?;
        Ok(Self { pattern })
    }

    /// Timestamp embedded in a backup name, or `None` if the name does not
    /// follow the naming scheme.
    pub fn timestamp(&self, file_name: &str) -> Option<DateTime<Utc>> {
        let caps = self.pattern.captures(file_name)?;
        NaiveDateTime::parse_from_str(&caps[1], TIMESTAMP_FORMAT)
            .ok()
            .map(|naive| naive.and_utc())
    }
}

/// Free path next to `path` for its pre-restore copy.
pub fn aside_path(path: &Path, at: DateTime<Utc>) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(ASIDE_MARKER);
    name.push(timestamp(at));
    let candidate = PathBuf::from(&name);
    if !exists_or_link(&candidate) {
        return candidate;
    }
    let mut n = 1u32;
    loop {
        let mut numbered = name.clone();
        numbered.push(format!("_{}", n));
        let candidate = PathBuf::from(numbered);
        if !exists_or_link(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

/// `exists()` follows symlinks; dangling links still occupy a name.
pub fn exists_or_link(path: &Path) -> bool {
    path.symlink_metadata().is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 2, 0, 0).unwrap()
    }

    #[test]
    fn test_safe_join() {
        let root = Path::new("/backups/b1");
        assert_eq!(
            safe_join(root, "database/database.dump").unwrap(),
            PathBuf::from("/backups/b1/database/database.dump")
        );
        assert!(safe_join(root, "../etc/passwd").is_err());
        assert!(safe_join(root, "content/../../x").is_err());
        assert!(safe_join(root, "/etc/passwd").is_err());
        assert!(safe_join(root, "").is_err());
    }

    #[test]
    fn test_resolve_under() {
        assert_eq!(
            resolve_under(Path::new("/"), Path::new("/etc/nginx/nginx.conf")),
            PathBuf::from("/etc/nginx/nginx.conf")
        );
        assert_eq!(
            resolve_under(Path::new("/srv/root"), Path::new("/etc/app.env")),
            PathBuf::from("/srv/root/etc/app.env")
        );
    }

    #[test]
    fn test_unique_backup_dir() {
        let dir = TempDir::new().unwrap();
        let first = unique_backup_dir(dir.path(), "stack-backup", at());
        assert_eq!(first.file_name().unwrap(), "stack-backup_20260301_020000");

        std::fs::create_dir(&first).unwrap();
        let second = unique_backup_dir(dir.path(), "stack-backup", at());
        assert_eq!(second.file_name().unwrap(), "stack-backup_20260301_020000_1");

        std::fs::write(dir.path().join("stack-backup_20260301_020000_1.tar.gz"), b"").unwrap();
        let third = unique_backup_dir(dir.path(), "stack-backup", at());
        assert_eq!(third.file_name().unwrap(), "stack-backup_20260301_020000_2");
    }

    #[test]
    fn test_backup_name_timestamp() {
        let names = BackupName::new("stack-backup").unwrap();
        assert_eq!(names.timestamp("stack-backup_20260301_020000"), Some(at()));
        assert_eq!(
            names.timestamp("stack-backup_20260301_020000_3.tar.gz"),
            Some(at())
        );
        assert_eq!(names.timestamp("stack-backup_latest"), None);
        assert_eq!(names.timestamp("stack-backup_20261301_020000"), None);
        assert_eq!(names.timestamp("other_20260301_020000"), None);
        // regex metacharacters in the prefix are literal
        let dotted = BackupName::new("a.b").unwrap();
        assert_eq!(dotted.timestamp("axb_20260301_020000"), None);
    }

    #[test]
    fn test_aside_path() {
        let dir = TempDir::new().unwrap();
        let live = dir.path().join("content");
        let aside = aside_path(&live, at());
        assert_eq!(
            aside.file_name().unwrap(),
            "content.pre-restore-20260301_020000"
        );

        std::fs::create_dir(&aside).unwrap();
        let next = aside_path(&live, at());
        assert_eq!(
            next.file_name().unwrap(),
            "content.pre-restore-20260301_020000_1"
        );
    }
}
