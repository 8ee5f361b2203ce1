//! Backup engine.
//!
//! A backup is a timestamped directory under the output directory holding
//! one subdirectory per captured component and an append-only manifest.
//! Components are captured one at a time; any capture failure discards the
//! whole directory, so a backup either exists complete or not at all. The
//! finished directory is optionally packed into a `.tar.gz`, after which the
//! retention sweep removes expired backups with the same prefix.

use crate::archive::{Archiver, TarGz};
use crate::catalog::sweep_expired;
use crate::confirm::{Confirm, TerminalConfirm};
use crate::database::{DatabaseTool, Postgres};
use crate::fsops::{format_size, sha256_file, tree_size, FileCopier, LocalCopier};
use crate::manifest::{
    BackupManifest, BackupType, Component, ComponentEntry, ManifestHeader, ManifestWriter,
};
use crate::paths::{exists_or_link, resolve_under, strip_root, unique_backup_dir, BackupName};
use crate::services::{ensure_running, quiesce, resume, stop_again};
use crate::{Error, Result};
use chrono::{Duration, Utc};
use stackctl_config::{BackupConfig, StackConfig};
use stackctl_start::Orchestrator;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

/// File name of the database dump inside the database component.
pub const DUMP_FILE: &str = "database.dump";

const HOT_WARNING: &str = "hot backup: content and search index were copied while services \
                           were running and are not point-in-time consistent";

/// What to back up and how.
#[derive(Debug, Clone)]
pub struct BackupOptions {
    pub backup_type: BackupType,
    pub output_dir: PathBuf,
    /// Name prefix; retention only touches backups with this prefix
    pub prefix: String,
    pub include_search_index: bool,
    /// Leave services running while copying
    pub hot: bool,
    pub compress: bool,
    /// 0 disables the retention sweep
    pub retention_days: u32,
    /// Stop running services without asking
    pub force: bool,
}

impl BackupOptions {
    /// Options for `backup_type` with the configured defaults.
    pub fn from_config(config: &BackupConfig, backup_type: BackupType) -> Self {
        Self {
            backup_type,
            output_dir: config.output_dir.clone(),
            prefix: config.prefix.clone(),
            include_search_index: config.include_search_index,
            hot: false,
            compress: config.compress,
            retention_days: config.retention_days,
            force: false,
        }
    }
}

/// Result of a successful backup.
#[derive(Debug, Clone)]
pub struct BackupReport {
    pub manifest: BackupManifest,
    /// Final location: the archive, or the directory if not compressed
    pub location: PathBuf,
    pub archived: bool,
    /// Services stopped for the backup (and started again)
    pub stopped: Vec<String>,
    /// Backups removed by the retention sweep
    pub expired: Vec<PathBuf>,
    pub warnings: Vec<String>,
}

impl std::fmt::Display for BackupReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Backup {} ({})", self.manifest.id, self.manifest.backup_type)?;
        writeln!(f, "  location: {}", self.location.display())?;
        for entry in &self.manifest.components {
            write!(
                f,
                "  {:<14} {:>10}",
                entry.name.to_string(),
                format_size(entry.size_bytes)
            )?;
            match &entry.checksum {
                Some(sum) => writeln!(f, "  {}", sum)?,
                None => writeln!(f)?,
            }
        }
        if !self.stopped.is_empty() {
            writeln!(f, "  services paused: {}", self.stopped.join(", "))?;
        }
        if !self.expired.is_empty() {
            writeln!(f, "  expired backups removed: {}", self.expired.len())?;
        }
        for warning in &self.warnings {
            writeln!(f, "  warning: {}", warning)?;
        }
        Ok(())
    }
}

/// Creates backups of the stack's stateful components.
pub struct BackupEngine {
    config: StackConfig,
    orchestrator: Arc<Orchestrator>,
    database: Arc<dyn DatabaseTool>,
    copier: Arc<dyn FileCopier>,
    archiver: Arc<dyn Archiver>,
    confirm: Arc<dyn Confirm>,
}

impl BackupEngine {
    /// Create an engine with the production collaborators.
    pub fn new(config: &StackConfig, orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            database: Arc::new(Postgres::new(
                config.database.clone(),
                config.paths.log_dir.clone(),
            )),
            copier: Arc::new(LocalCopier::new()),
            archiver: Arc::new(TarGz::new()),
            confirm: Arc::new(TerminalConfirm),
            config: config.clone(),
            orchestrator,
        }
    }

    pub fn with_database_tool(mut self, database: Arc<dyn DatabaseTool>) -> Self {
        self.database = database;
        self
    }

    pub fn with_copier(mut self, copier: Arc<dyn FileCopier>) -> Self {
        self.copier = copier;
        self
    }

    pub fn with_archiver(mut self, archiver: Arc<dyn Archiver>) -> Self {
        self.archiver = archiver;
        self
    }

    pub fn with_confirm(mut self, confirm: Arc<dyn Confirm>) -> Self {
        self.confirm = confirm;
        self
    }

    /// Take a backup.
    pub async fn run(&self, opts: &BackupOptions) -> Result<BackupReport> {
        if opts.prefix.is_empty() || opts.prefix.contains('/') {
            return Err(Error::InvalidOption(format!(
                "backup name '{}' must be a plain file name",
                opts.prefix
            )));
        }
        BackupName::new(&opts.prefix)?;

        let components = opts.backup_type.components(opts.include_search_index);
        let started = Utc::now();

        fs::create_dir_all(&opts.output_dir)?;
        let dir = unique_backup_dir(&opts.output_dir, &opts.prefix, started);
        fs::create_dir(&dir)?;
        let id = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        info!(
            id = %id,
            backup_type = %opts.backup_type,
            hot = opts.hot,
            "Starting backup"
        );

        let header = ManifestHeader {
            id: id.clone(),
            created_at: started,
            backup_type: opts.backup_type,
            hot: opts.hot,
            compressed: opts.compress,
            retention_expires: (opts.retention_days > 0)
                .then(|| started + Duration::days(i64::from(opts.retention_days))),
        };
        let writer = match ManifestWriter::create(&dir, header) {
            Ok(writer) => writer,
            Err(e) => {
                discard(&dir);
                return Err(e);
            }
        };

        let mut warnings = Vec::new();
        let stopped = if opts.hot {
            if components
                .iter()
                .any(|c| matches!(c, Component::Content | Component::SearchIndex))
            {
                warn!("{}", HOT_WARNING);
                warnings.push(HOT_WARNING.to_string());
            }
            Vec::new()
        } else {
            let services = &self.config.backup.quiesce_services;
            match quiesce(
                &self.orchestrator,
                services,
                opts.force,
                self.confirm.as_ref(),
                "take a consistent backup",
            )
            .await
            {
                Ok(stopped) => stopped,
                Err(e) => {
                    discard(&dir);
                    return Err(e);
                }
            }
        };

        let captured = self
            .capture_all(&dir, writer, &components, &mut warnings)
            .await;

        if let Some(warning) = resume(&self.orchestrator, &stopped).await {
            warnings.push(warning);
        }

        let manifest = match captured {
            Ok(manifest) => manifest,
            Err(e) => {
                error!(id = %id, error = %e, "Backup failed, discarding");
                discard(&dir);
                return Err(e);
            }
        };

        let (location, archived) = if opts.compress {
            self.compress(&dir, &mut warnings)
        } else {
            (dir, false)
        };

        let expired = match sweep_expired(
            &opts.output_dir,
            &opts.prefix,
            opts.retention_days,
            Utc::now(),
        ) {
            Ok(expired) => expired,
            Err(e) => {
                warn!(error = %e, "Retention sweep failed");
                warnings.push(format!("retention sweep failed: {}", e));
                Vec::new()
            }
        };

        info!(id = %id, location = ?location, "Backup complete");
        Ok(BackupReport {
            manifest,
            location,
            archived,
            stopped,
            expired,
            warnings,
        })
    }

    async fn capture_all(
        &self,
        dir: &Path,
        mut writer: ManifestWriter,
        components: &[Component],
        warnings: &mut Vec<String>,
    ) -> Result<BackupManifest> {
        for &component in components {
            info!(component = %component, "Capturing");
            let entry = match component {
                Component::Database => self.capture_database(dir, warnings).await?,
                Component::Content => {
                    self.capture_tree(dir, component, &self.config.paths.content_dir, warnings)?
                }
                Component::SearchIndex => self.capture_tree(
                    dir,
                    component,
                    &self.config.paths.search_data_dir,
                    warnings,
                )?,
                Component::Config => self.capture_config(dir, warnings)?,
            };
            writer.append(entry)?;
        }
        writer.finalize(Utc::now())
    }

    async fn capture_database(
        &self,
        dir: &Path,
        warnings: &mut Vec<String>,
    ) -> Result<ComponentEntry> {
        let service = &self.config.database.service;
        let auto_started = ensure_running(&self.orchestrator, service).await?;

        let result = self.dump_database(dir).await;

        if auto_started {
            if let Some(warning) = stop_again(&self.orchestrator, service).await {
                warnings.push(warning);
            }
        }
        result
    }

    /// Dump into a private scratch directory next to the backup, then move
    /// the finished file into place.
    async fn dump_database(&self, dir: &Path) -> Result<ComponentEntry> {
        let db = &self.config.database.name;
        let parent = dir.parent().unwrap_or(dir);
        let scratch = tempfile::Builder::new()
            .prefix(".stackctl-dump-")
            .tempdir_in(parent)?;
        let scratch_file = scratch.path().join(DUMP_FILE);

        self.database.dump(db, &scratch_file).await?;

        let size = fs::metadata(&scratch_file)
            .map_err(|e| Error::CaptureFailed {
                component: Component::Database,
                reason: format!("dump file missing: {}", e),
            })?
            .len();
        if size == 0 {
            return Err(Error::CaptureFailed {
                component: Component::Database,
                reason: "dump is empty".to_string(),
            });
        }
        let checksum = sha256_file(&scratch_file)?;

        let target_dir = dir.join(Component::Database.dir_name());
        fs::create_dir_all(&target_dir)?;
        fs::rename(&scratch_file, target_dir.join(DUMP_FILE))?;

        Ok(ComponentEntry {
            name: Component::Database,
            path: format!("{}/{}", Component::Database.dir_name(), DUMP_FILE),
            size_bytes: size,
            source_size_bytes: None,
            source: Some(db.clone()),
            checksum: Some(checksum),
        })
    }

    fn capture_tree(
        &self,
        dir: &Path,
        component: Component,
        source: &Path,
        warnings: &mut Vec<String>,
    ) -> Result<ComponentEntry> {
        if !source.is_dir() {
            return Err(Error::CaptureFailed {
                component,
                reason: format!("{} is not a directory", source.display()),
            });
        }

        let source_size = tree_size(source)?;
        let copied = self
            .copier
            .copy(source, &dir.join(component.dir_name()), true)
            .map_err(|e| Error::CaptureFailed {
                component,
                reason: e.to_string(),
            })?;

        if copied != source_size {
            let warning = format!(
                "{}: copied {} bytes but the source measured {} bytes",
                component, copied, source_size
            );
            warn!("{}", warning);
            warnings.push(warning);
        }

        Ok(ComponentEntry {
            name: component,
            path: component.dir_name().to_string(),
            size_bytes: copied,
            source_size_bytes: Some(source_size),
            source: Some(source.display().to_string()),
            checksum: None,
        })
    }

    /// Copy the config allow-list, keeping each file's absolute layout under
    /// `config/`. Missing paths are skipped with a warning.
    fn capture_config(&self, dir: &Path, warnings: &mut Vec<String>) -> Result<ComponentEntry> {
        let root = &self.config.paths.config_root;
        let dest = dir.join(Component::Config.dir_name());
        fs::create_dir_all(&dest)?;

        let mut total = 0;
        for path in &self.config.backup.config_paths {
            let live = resolve_under(root, path);
            if !exists_or_link(&live) {
                let warning = format!("config path {} not found, skipped", path.display());
                warn!("{}", warning);
                warnings.push(warning);
                continue;
            }
            total += self
                .copier
                .copy(&live, &dest.join(strip_root(path)), true)
                .map_err(|e| Error::CaptureFailed {
                    component: Component::Config,
                    reason: format!("{}: {}", path.display(), e),
                })?;
        }

        Ok(ComponentEntry {
            name: Component::Config,
            path: Component::Config.dir_name().to_string(),
            size_bytes: total,
            source_size_bytes: None,
            source: Some(root.display().to_string()),
            checksum: None,
        })
    }

    /// Archive and verify; on any failure keep the directory instead.
    fn compress(&self, dir: &Path, warnings: &mut Vec<String>) -> (PathBuf, bool) {
        let archived = self
            .archiver
            .compress(dir)
            .and_then(|archive| self.archiver.verify(&archive).map(|_| archive));

        match archived {
            Ok(archive) => {
                if let Err(e) = fs::remove_dir_all(dir) {
                    warnings.push(format!(
                        "archive created but {} could not be removed: {}",
                        dir.display(),
                        e
                    ));
                }
                (archive, true)
            }
            Err(e) => {
                warn!(error = %e, "Compression failed, keeping uncompressed backup");
                let mut partial = dir.as_os_str().to_os_string();
                partial.push(format!(".{}", crate::paths::ARCHIVE_EXTENSION));
                let partial = PathBuf::from(partial);
                if partial.is_file() {
                    if let Err(e) = fs::remove_file(&partial) {
                        warn!(path = ?partial, error = %e, "Could not remove partial archive");
                    }
                }
                warnings.push(format!(
                    "compression failed ({}); backup kept uncompressed",
                    e
                ));
                (dir.to_path_buf(), false)
            }
        }
    }
}

fn discard(dir: &Path) {
    if let Err(e) = fs::remove_dir_all(dir) {
        warn!(path = ?dir, error = %e, "Could not remove failed backup");
    }
}
