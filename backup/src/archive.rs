//! Backup archives.

use crate::manifest::MANIFEST_FILE;
use crate::paths::ARCHIVE_EXTENSION;
use crate::{Error, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

/// Packs backup directories into single files and back.
pub trait Archiver: Send + Sync {
    /// Archive `dir` next to itself and return the archive path. The
    /// directory is left in place.
    fn compress(&self, dir: &Path) -> Result<PathBuf>;

    /// Unpack an archive into `dest`.
    fn extract(&self, archive: &Path, dest: &Path) -> Result<()>;

    /// Read the archive end to end; returns the number of entries.
    fn verify(&self, archive: &Path) -> Result<usize>;

    /// Contents of the backup manifest stored in the archive, if any.
    fn read_manifest(&self, archive: &Path) -> Result<Option<String>>;
}

/// gzip-compressed tar archives (`.tar.gz`).
#[derive(Debug, Default, Clone, Copy)]
pub struct TarGz;

impl TarGz {
    pub fn new() -> Self {
        Self
    }

    fn open(archive: &Path) -> Result<tar::Archive<GzDecoder<File>>> {
        let file = File::open(archive)?;
        Ok(tar::Archive::new(GzDecoder::new(file)))
    }

    /// Whether an archive member is the top-level manifest (`manifest.toml`
    /// or `<backup>/manifest.toml`).
    fn is_manifest(path: &Path) -> bool {
        let parts: Vec<_> = path
            .components()
            .filter(|c| matches!(c, std::path::Component::Normal(_)))
            .collect();
        matches!(parts.last(), Some(last) if last.as_os_str() == MANIFEST_FILE) && parts.len() <= 2
    }
}

impl Archiver for TarGz {
    fn compress(&self, dir: &Path) -> Result<PathBuf> {
        let name = dir
            .file_name()
            .ok_or_else(|| Error::Archive(format!("cannot archive {}", dir.display())))?;
        let mut archive_name = name.to_os_string();
        archive_name.push(format!(".{}", ARCHIVE_EXTENSION));
        let dest = dir.with_file_name(archive_name);

        let file = File::create(&dest)?;
        let encoder = GzEncoder::new(file, Compression::default());
        let mut builder = tar::Builder::new(encoder);
        builder.follow_symlinks(false);
        builder.append_dir_all(name, dir)?;
        let encoder = builder.into_inner()?;
        let file = encoder.finish()?;
        file.sync_all()?;

        Ok(dest)
    }

    fn extract(&self, archive: &Path, dest: &Path) -> Result<()> {
        let mut archive = Self::open(archive)?;
        archive.set_preserve_permissions(true);
        archive.set_preserve_mtime(true);
        archive.unpack(dest)?;
        Ok(())
    }

    fn verify(&self, archive: &Path) -> Result<usize> {
        let mut tar = Self::open(archive)?;
        let mut count = 0;
        let mut has_manifest = false;
        for entry in tar.entries()? {
            let mut entry = entry?;
            has_manifest |= Self::is_manifest(&entry.path()?);
            std::io::copy(&mut entry, &mut std::io::sink())?;
            count += 1;
        }
        if !has_manifest {
            return Err(Error::Archive(format!(
                "{} does not contain {}",
                archive.display(),
                MANIFEST_FILE
            )));
        }
        Ok(count)
    }

    fn read_manifest(&self, archive: &Path) -> Result<Option<String>> {
        let mut tar = Self::open(archive)?;
        for entry in tar.entries()? {
            let mut entry = entry?;
            if Self::is_manifest(&entry.path()?) {
                let mut content = String::new();
                entry.read_to_string(&mut content)?;
                return Ok(Some(content));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn sample_backup(root: &Path) -> PathBuf {
        let dir = root.join("stack-backup_20260301_020000");
        fs::create_dir_all(dir.join("config/etc")).unwrap();
        fs::write(dir.join(MANIFEST_FILE), "id = \"x\"\n").unwrap();
        fs::write(dir.join("config/etc/app.env"), "KEY=1\n").unwrap();
        dir
    }

    #[test]
    fn test_compress_verify_extract() {
        let tmp = TempDir::new().unwrap();
        let dir = sample_backup(tmp.path());

        let archive = TarGz.compress(&dir).unwrap();
        assert_eq!(
            archive.file_name().unwrap(),
            "stack-backup_20260301_020000.tar.gz"
        );
        assert!(TarGz.verify(&archive).unwrap() >= 3);
        assert_eq!(
            TarGz.read_manifest(&archive).unwrap().as_deref(),
            Some("id = \"x\"\n")
        );

        let out = tmp.path().join("out");
        fs::create_dir(&out).unwrap();
        TarGz.extract(&archive, &out).unwrap();
        assert_eq!(
            fs::read_to_string(out.join("stack-backup_20260301_020000/config/etc/app.env")).unwrap(),
            "KEY=1\n"
        );
    }

    #[test]
    fn test_verify_rejects_garbage() {
        let tmp = TempDir::new().unwrap();
        let bogus = tmp.path().join("bogus.tar.gz");
        fs::write(&bogus, b"not an archive").unwrap();
        assert!(TarGz.verify(&bogus).is_err());
    }

    #[test]
    fn test_manifest_detection() {
        assert!(TarGz::is_manifest(Path::new("manifest.toml")));
        assert!(TarGz::is_manifest(Path::new("b1/manifest.toml")));
        assert!(!TarGz::is_manifest(Path::new("b1/config/manifest.toml")));
        assert!(!TarGz::is_manifest(Path::new("b1/other.toml")));
    }
}
