//! Backup manifest.
//!
//! Every backup directory carries a `manifest.toml` describing what it holds.
//! The file is written append-only while the backup runs: a header of
//! top-level keys when the backup starts, one `[[components]]` table per
//! captured component, and a final `[completion]` table. A manifest without
//! `[completion]` belongs to a backup that never finished and is rejected by
//! [`BackupManifest::load`].
//!
//! ```toml
//! id = "stack-backup_20260301_020000"
//! created_at = "2026-03-01T02:00:00Z"
//! backup_type = "full"
//! hot = false
//! compressed = true
//! retention_expires = "2026-03-15T02:00:00Z"
//!
//! [[components]]
//! name = "database"
//! path = "database/database.dump"
//! size_bytes = 48213
//! source = "stack"
//! checksum = "sha256:9f86d081884c7d65..."
//!
//! [completion]
//! completed_at = "2026-03-01T02:03:12Z"
//! ```

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// File name of the manifest inside a backup directory.
pub const MANIFEST_FILE: &str = "manifest.toml";

/// A stateful component of the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Component {
    Database,
    Content,
    SearchIndex,
    Config,
}

impl Component {
    /// Directory of the component inside a backup.
    pub fn dir_name(&self) -> &'static str {
        match self {
            Component::Database => "database",
            Component::Content => "content",
            Component::SearchIndex => "search-index",
            Component::Config => "config",
        }
    }
}

impl std::fmt::Display for Component {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.dir_name())
    }
}

/// What a backup or restore covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackupType {
    Full,
    Db,
    Content,
    Config,
    SearchIndex,
}

impl BackupType {
    /// Components selected by this type, in capture and restore order.
    ///
    /// The search index is part of `full` only when requested.
    pub fn components(&self, include_search_index: bool) -> Vec<Component> {
        match self {
            BackupType::Full => {
                let mut components = vec![Component::Database, Component::Content];
                if include_search_index {
                    components.push(Component::SearchIndex);
                }
                components.push(Component::Config);
                components
            }
            BackupType::Db => vec![Component::Database],
            BackupType::Content => vec![Component::Content],
            BackupType::Config => vec![Component::Config],
            BackupType::SearchIndex => vec![Component::SearchIndex],
        }
    }

    /// Whether a component may be absent without failing a restore.
    pub fn is_optional(&self, component: Component) -> bool {
        *self == BackupType::Full && component == Component::SearchIndex
    }
}

impl std::fmt::Display for BackupType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            BackupType::Full => "full",
            BackupType::Db => "db",
            BackupType::Content => "content",
            BackupType::Config => "config",
            BackupType::SearchIndex => "search-index",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for BackupType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "full" => Ok(BackupType::Full),
            "db" | "database" => Ok(BackupType::Db),
            "content" => Ok(BackupType::Content),
            "config" => Ok(BackupType::Config),
            "search-index" | "search" => Ok(BackupType::SearchIndex),
            other => Err(format!(
                "unknown backup type '{}' (expected full, db, content, config or search-index)",
                other
            )),
        }
    }
}

/// One captured component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentEntry {
    pub name: Component,
    /// Location relative to the backup root
    pub path: String,
    /// Bytes captured
    pub size_bytes: u64,
    /// Bytes measured at the source before copying
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_size_bytes: Option<u64>,
    /// Where the data came from (database name or directory)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// `sha256:<hex>` of a single-file component
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

/// Completion record appended when a backup finishes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Completion {
    pub completed_at: DateTime<Utc>,
}

/// Values written when a backup starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestHeader {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub backup_type: BackupType,
    pub hot: bool,
    pub compressed: bool,
    pub retention_expires: Option<DateTime<Utc>>,
}

/// Parsed backup manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupManifest {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub backup_type: BackupType,
    #[serde(default)]
    pub hot: bool,
    /// Compression was requested for this backup
    #[serde(default)]
    pub compressed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retention_expires: Option<DateTime<Utc>>,
    #[serde(default)]
    pub components: Vec<ComponentEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion: Option<Completion>,
}

impl BackupManifest {
    /// Read the manifest of a backup directory without requiring completion.
    pub fn read(dir: &Path) -> Result<Self> {
        let path = dir.join(MANIFEST_FILE);
        let content = std::fs::read_to_string(&path).map_err(|e| Error::InvalidBackup {
            path: dir.to_path_buf(),
            reason: format!("cannot read {}: {}", MANIFEST_FILE, e),
        })?;
        Ok(toml::from_str(&content)?)
    }

    /// Read the manifest of a completed backup.
    pub fn load(dir: &Path) -> Result<Self> {
        let manifest = Self::read(dir)?;
        if !manifest.is_complete() {
            return Err(Error::IncompleteManifest(dir.to_path_buf()));
        }
        Ok(manifest)
    }

    pub fn is_complete(&self) -> bool {
        self.completion.is_some()
    }

    /// Entry for a component, if it was captured.
    pub fn entry(&self, component: Component) -> Option<&ComponentEntry> {
        self.components.iter().find(|c| c.name == component)
    }

    /// Total captured bytes.
    pub fn total_size(&self) -> u64 {
        self.components.iter().map(|c| c.size_bytes).sum()
    }

    fn from_header(header: ManifestHeader) -> Self {
        Self {
            id: header.id,
            created_at: header.created_at,
            backup_type: header.backup_type,
            hot: header.hot,
            compressed: header.compressed,
            retention_expires: header.retention_expires,
            components: Vec::new(),
            completion: None,
        }
    }
}

#[derive(Serialize)]
struct HeaderView<'a> {
    id: &'a str,
    created_at: &'a DateTime<Utc>,
    backup_type: BackupType,
    hot: bool,
    compressed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    retention_expires: Option<&'a DateTime<Utc>>,
}

#[derive(Serialize)]
struct ComponentsChunk<'a> {
    components: [&'a ComponentEntry; 1],
}

#[derive(Serialize)]
struct CompletionChunk<'a> {
    completion: &'a Completion,
}

/// Append-only writer for a manifest being built.
///
/// Finalising consumes the writer, so a completed manifest cannot be changed
/// through this API.
#[derive(Debug)]
pub struct ManifestWriter {
    path: PathBuf,
    manifest: BackupManifest,
}

impl ManifestWriter {
    /// Create `manifest.toml` in `dir` and write the header.
    pub fn create(dir: &Path, header: ManifestHeader) -> Result<Self> {
        let path = dir.join(MANIFEST_FILE);
        let manifest = BackupManifest::from_header(header);
        let text = toml::to_string(&HeaderView {
            id: &manifest.id,
            created_at: &manifest.created_at,
            backup_type: manifest.backup_type,
            hot: manifest.hot,
            compressed: manifest.compressed,
            retention_expires: manifest.retention_expires.as_ref(),
        })?;

        let mut file = OpenOptions::new().write(true).create_new(true).open(&path)?;
        file.write_all(text.as_bytes())?;
        file.sync_all()?;

        Ok(Self { path, manifest })
    }

    /// Record a captured component.
    pub fn append(&mut self, entry: ComponentEntry) -> Result<()> {
        let text = toml::to_string(&ComponentsChunk {
            components: [&entry],
        })?;
        self.write_chunk(&text)?;
        self.manifest.components.push(entry);
        Ok(())
    }

    /// Write the completion record and return the finished manifest.
    pub fn finalize(mut self, completed_at: DateTime<Utc>) -> Result<BackupManifest> {
        let completion = Completion { completed_at };
        let text = toml::to_string(&CompletionChunk {
            completion: &completion,
        })?;
        self.write_chunk(&text)?;
        self.manifest.completion = Some(completion);
        Ok(self.manifest)
    }

    /// The manifest as written so far.
    pub fn manifest(&self) -> &BackupManifest {
        &self.manifest
    }

    fn write_chunk(&self, text: &str) -> Result<()> {
        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        file.write_all(b"\n")?;
        file.write_all(text.as_bytes())?;
        file.sync_all()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn header() -> ManifestHeader {
        ManifestHeader {
            id: "stack-backup_20260301_020000".to_string(),
            created_at: Utc.with_ymd_and_hms(2026, 3, 1, 2, 0, 0).unwrap(),
            backup_type: BackupType::Full,
            hot: false,
            compressed: true,
            retention_expires: Some(Utc.with_ymd_and_hms(2026, 3, 15, 2, 0, 0).unwrap()),
        }
    }

    fn entry(name: Component, size: u64) -> ComponentEntry {
        ComponentEntry {
            name,
            path: name.dir_name().to_string(),
            size_bytes: size,
            source_size_bytes: None,
            source: None,
            checksum: None,
        }
    }

    #[test]
    fn test_write_and_load() {
        let dir = TempDir::new().unwrap();
        let mut writer = ManifestWriter::create(dir.path(), header()).unwrap();
        writer
            .append(ComponentEntry {
                checksum: Some("sha256:abc".to_string()),
                source: Some("stack".to_string()),
                ..entry(Component::Database, 10)
            })
            .unwrap();
        writer.append(entry(Component::Content, 20)).unwrap();
        let done = writer
            .finalize(Utc.with_ymd_and_hms(2026, 3, 1, 2, 3, 0).unwrap())
            .unwrap();

        let loaded = BackupManifest::load(dir.path()).unwrap();
        assert_eq!(loaded, done);
        assert_eq!(loaded.total_size(), 30);
        assert_eq!(
            loaded.entry(Component::Database).unwrap().checksum.as_deref(),
            Some("sha256:abc")
        );
        assert!(loaded.entry(Component::SearchIndex).is_none());
    }

    #[test]
    fn test_unfinished_manifest_rejected() {
        let dir = TempDir::new().unwrap();
        let mut writer = ManifestWriter::create(dir.path(), header()).unwrap();
        writer.append(entry(Component::Config, 5)).unwrap();
        drop(writer);

        assert!(matches!(
            BackupManifest::load(dir.path()),
            Err(Error::IncompleteManifest(_))
        ));
        let partial = BackupManifest::read(dir.path()).unwrap();
        assert_eq!(partial.components.len(), 1);
    }

    #[test]
    fn test_manifest_is_append_only() {
        let dir = TempDir::new().unwrap();
        let mut writer = ManifestWriter::create(dir.path(), header()).unwrap();
        let before = std::fs::read_to_string(dir.path().join(MANIFEST_FILE)).unwrap();
        writer.append(entry(Component::Content, 1)).unwrap();
        let after = std::fs::read_to_string(dir.path().join(MANIFEST_FILE)).unwrap();

        assert!(after.starts_with(&before));
        assert!(after.contains("[[components]]"));
        assert!(ManifestWriter::create(dir.path(), header()).is_err());
    }

    #[test]
    fn test_backup_type_components() {
        assert_eq!(
            BackupType::Full.components(true),
            vec![
                Component::Database,
                Component::Content,
                Component::SearchIndex,
                Component::Config
            ]
        );
        assert_eq!(
            BackupType::Full.components(false),
            vec![Component::Database, Component::Content, Component::Config]
        );
        assert_eq!(
            BackupType::SearchIndex.components(false),
            vec![Component::SearchIndex]
        );
        assert!(BackupType::Full.is_optional(Component::SearchIndex));
        assert!(!BackupType::SearchIndex.is_optional(Component::SearchIndex));
    }

    #[test]
    fn test_backup_type_parse() {
        assert_eq!("db".parse::<BackupType>(), Ok(BackupType::Db));
        assert_eq!("search-index".parse::<BackupType>(), Ok(BackupType::SearchIndex));
        assert!("everything".parse::<BackupType>().is_err());
        assert_eq!(BackupType::SearchIndex.to_string(), "search-index");
    }
}
