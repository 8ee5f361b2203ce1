//! Restore engine.
//!
//! A restore validates everything before it changes anything: the backup is
//! opened (archives are unpacked into a private scratch directory), its
//! manifest must be complete, and every selected component must be present.
//! The result is a [`RestorePlan`]. A dry run stops there.
//!
//! Live data is never deleted. Data directories are renamed aside with a
//! `.pre-restore-<timestamp>` suffix before the backup copy is put in place,
//! and config files that would be overwritten are first copied to a sibling
//! with the same suffix. The database is dropped and recreated from the dump.

use crate::archive::{Archiver, TarGz};
use crate::confirm::{Confirm, TerminalConfirm};
use crate::database::{DatabaseTool, Postgres};
use crate::fsops::{format_size, sha256_file, FileCopier, LocalCopier};
use crate::manifest::{BackupManifest, BackupType, Component, ComponentEntry, MANIFEST_FILE};
use crate::paths::{aside_path, exists_or_link, safe_join};
use crate::services::{ensure_running, quiesce, stop_again};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use stackctl_config::StackConfig;
use stackctl_start::Orchestrator;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tracing::{error, info, warn};
use walkdir::WalkDir;

/// Registry name of the search service.
const SEARCH_SERVICE: &str = "search";

/// What to restore and how.
#[derive(Debug, Clone)]
pub struct RestoreOptions {
    /// Backup directory or archive
    pub backup: PathBuf,
    pub restore_type: BackupType,
    pub include_search_index: bool,
    /// Skip confirmations and stop services without asking
    pub force: bool,
    /// Validate and print the plan without changing anything
    pub dry_run: bool,
}

/// Validated set of actions a restore will perform.
#[derive(Debug, Clone)]
pub struct RestorePlan {
    /// Backup reference as given by the operator
    pub source: PathBuf,
    pub manifest: BackupManifest,
    /// Components to restore, in restore order
    pub components: Vec<Component>,
    /// Components left out, with the reason
    pub skipped: Vec<(Component, String)>,
    pub confirmed: bool,
    pub dry_run: bool,
}

impl std::fmt::Display for RestorePlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "Restore plan: {} ({}, created {})",
            self.manifest.id,
            self.manifest.backup_type,
            self.manifest.created_at.format("%Y-%m-%d %H:%M:%S UTC")
        )?;
        writeln!(f, "  source: {}", self.source.display())?;
        if self.manifest.hot {
            writeln!(f, "  note: taken as a hot backup")?;
        }
        for component in &self.components {
            let size = self
                .manifest
                .entry(*component)
                .map(|e| format_size(e.size_bytes))
                .unwrap_or_default();
            writeln!(f, "  restore  {:<14} {:>10}", component.to_string(), size)?;
        }
        for (component, reason) in &self.skipped {
            writeln!(f, "  skip     {:<14} {}", component.to_string(), reason)?;
        }
        Ok(())
    }
}

/// A component that could not be restored.
#[derive(Debug, Clone)]
pub struct ComponentFailure {
    pub component: Component,
    pub reason: String,
    /// Log of the underlying tool, when one was captured
    pub log: Option<PathBuf>,
}

/// Outcome of a restore.
#[derive(Debug, Clone)]
pub struct RestoreReport {
    pub plan: RestorePlan,
    pub restored: Vec<Component>,
    pub failures: Vec<ComponentFailure>,
    /// Live data renamed or copied aside
    pub set_aside: Vec<PathBuf>,
    /// Services stopped for the restore; left stopped
    pub stopped: Vec<String>,
    pub warnings: Vec<String>,
    pub next_steps: Vec<String>,
}

impl RestoreReport {
    fn new(plan: RestorePlan) -> Self {
        Self {
            plan,
            restored: Vec::new(),
            failures: Vec::new(),
            set_aside: Vec::new(),
            stopped: Vec::new(),
            warnings: Vec::new(),
            next_steps: Vec::new(),
        }
    }

    /// Whether every planned component was restored.
    pub fn success(&self) -> bool {
        self.failures.is_empty()
    }
}

impl std::fmt::Display for RestoreReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.plan)?;
        if self.plan.dry_run {
            writeln!(f, "  dry run: nothing was changed")?;
        }
        for component in &self.restored {
            writeln!(f, "  restored {}", component)?;
        }
        for failure in &self.failures {
            write!(f, "  FAILED   {}: {}", failure.component, failure.reason)?;
            match &failure.log {
                Some(log) => writeln!(f, " (log: {})", log.display())?,
                None => writeln!(f)?,
            }
        }
        if !self.stopped.is_empty() {
            writeln!(f, "  services stopped: {}", self.stopped.join(", "))?;
        }
        for path in &self.set_aside {
            writeln!(f, "  previous data kept at {}", path.display())?;
        }
        for warning in &self.warnings {
            writeln!(f, "  warning: {}", warning)?;
        }
        if !self.next_steps.is_empty() {
            writeln!(f, "Next steps:")?;
            for step in &self.next_steps {
                writeln!(f, "  - {}", step)?;
            }
        }
        Ok(())
    }
}

/// An opened backup; holds the scratch directory of an unpacked archive.
struct OpenedBackup {
    root: PathBuf,
    _scratch: Option<TempDir>,
}

/// Restores backups taken by the backup engine.
pub struct RestoreEngine {
    config: StackConfig,
    orchestrator: Arc<Orchestrator>,
    database: Arc<dyn DatabaseTool>,
    copier: Arc<dyn FileCopier>,
    archiver: Arc<dyn Archiver>,
    confirm: Arc<dyn Confirm>,
}

impl RestoreEngine {
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

    /// Validate a backup against the requested restore without changing
    /// anything.
    pub fn plan(&self, opts: &RestoreOptions) -> Result<RestorePlan> {
        let opened = self.open(&opts.backup)?;
        self.build_plan(&opened.root, opts)
    }

    /// Restore a backup.
    pub async fn run(&self, opts: &RestoreOptions) -> Result<RestoreReport> {
        let opened = self.open(&opts.backup)?;
        let mut plan = self.build_plan(&opened.root, opts)?;

        if opts.dry_run {
            info!(backup = ?opts.backup, "Dry run, no changes made");
            let mut report = RestoreReport::new(plan);
            report
                .next_steps
                .push("Run again without --dry-run to apply this plan".to_string());
            return Ok(report);
        }

        if !opts.force {
            let names: Vec<String> = plan.components.iter().map(|c| c.to_string()).collect();
            let prompt = format!(
                "Restore {} from {}? Live data will be replaced",
                names.join(", "),
                plan.manifest.id
            );
            if !self.confirm.confirm(&prompt)? {
                return Err(Error::Cancelled("restore not confirmed".to_string()));
            }
        }
        plan.confirmed = true;

        let services = self.services_to_stop(&plan.components)?;
        let stopped = quiesce(
            &self.orchestrator,
            &services,
            opts.force,
            self.confirm.as_ref(),
            "restore their data",
        )
        .await?;

        let mut report = RestoreReport::new(plan);
        report.stopped = stopped;
        let now = Utc::now();
        let root = opened.root.as_path();

        for component in report.plan.components.clone() {
            info!(component = %component, "Restoring");
            let entry = report
                .plan
                .manifest
                .entry(component)
                .cloned()
                .ok_or_else(|| Error::MissingComponent {
                    component,
                    reason: "not recorded in manifest".to_string(),
                })?;

            match component {
                Component::Database => {
                    match self
                        .restore_database(root, &entry, &mut report.warnings)
                        .await
                    {
                        Ok(()) => report.restored.push(component),
                        Err(e) if opts.restore_type == BackupType::Full => {
                            error!(error = %e, "Database restore failed, continuing with the rest");
                            report.failures.push(ComponentFailure {
                                component,
                                reason: e.to_string(),
                                log: e.log_path().map(Path::to_path_buf),
                            });
                        }
                        Err(e) => return Err(e),
                    }
                }
                Component::Content => {
                    let dest = self.config.paths.content_dir.clone();
                    let aside = self.restore_tree(root, &entry, &dest, now)?;
                    report.set_aside.extend(aside);
                    report.restored.push(component);
                }
                Component::SearchIndex => {
                    let dest = self.config.paths.search_data_dir.clone();
                    let aside = self.restore_tree(root, &entry, &dest, now)?;
                    report.set_aside.extend(aside);
                    report.restored.push(component);
                }
                Component::Config => {
                    let asides = self.restore_config(root, &entry, now)?;
                    report.set_aside.extend(asides);
                    report.restored.push(component);
                }
            }
        }

        report.next_steps = next_steps(&report);
        info!(
            restored = report.restored.len(),
            failed = report.failures.len(),
            "Restore finished"
        );
        Ok(report)
    }

    /// Locate the backup root, unpacking archives into a scratch directory.
    fn open(&self, reference: &Path) -> Result<OpenedBackup> {
        let meta = fs::metadata(reference).map_err(|e| Error::InvalidBackup {
            path: reference.to_path_buf(),
            reason: e.to_string(),
        })?;

        if meta.is_dir() {
            return Ok(OpenedBackup {
                root: reference.to_path_buf(),
                _scratch: None,
            });
        }

        let scratch = tempfile::Builder::new()
            .prefix("stackctl-restore-")
            .tempdir()?;
        self.archiver
            .extract(reference, scratch.path())
            .map_err(|e| Error::InvalidBackup {
                path: reference.to_path_buf(),
                reason: format!("cannot unpack archive: {}", e),
            })?;
        let root = manifest_root(scratch.path()).ok_or_else(|| Error::InvalidBackup {
            path: reference.to_path_buf(),
            reason: format!("archive does not contain {}", MANIFEST_FILE),
        })?;

        Ok(OpenedBackup {
            root,
            _scratch: Some(scratch),
        })
    }

    fn build_plan(&self, root: &Path, opts: &RestoreOptions) -> Result<RestorePlan> {
        let manifest = BackupManifest::load(root)?;
        let mut components = Vec::new();
        let mut skipped = Vec::new();

        for component in opts.restore_type.components(opts.include_search_index) {
            match check_component(root, &manifest, component) {
                Ok(()) => components.push(component),
                Err(e) if opts.restore_type.is_optional(component) => {
                    warn!(component = %component, error = %e, "Optional component unavailable");
                    skipped.push((
                        component,
                        "not in backup; rebuild it from the database after the restore"
                            .to_string(),
                    ));
                }
                Err(e) => return Err(e),
            }
        }

        if opts.restore_type == BackupType::Full
            && !opts.include_search_index
            && manifest.entry(Component::SearchIndex).is_some()
        {
            skipped.push((Component::SearchIndex, "excluded by request".to_string()));
        }

        Ok(RestorePlan {
            source: opts.backup.clone(),
            manifest,
            components,
            skipped,
            confirmed: false,
            dry_run: opts.dry_run,
        })
    }

    /// Services that must not run while the selected components change.
    fn services_to_stop(&self, components: &[Component]) -> Result<Vec<String>> {
        let registry = self.orchestrator.registry();
        let mut services = self.config.backup.quiesce_services.clone();

        let mut add = |name: String| {
            if !services.contains(&name) {
                services.push(name);
            }
        };
        for component in components {
            match component {
                Component::Database => {
                    for name in registry.dependents_of(&self.config.database.service)? {
                        add(name);
                    }
                }
                Component::SearchIndex if registry.contains(SEARCH_SERVICE) => {
                    add(SEARCH_SERVICE.to_string());
                    for name in registry.dependents_of(SEARCH_SERVICE)? {
                        add(name);
                    }
                }
                _ => {}
            }
        }
        Ok(services)
    }

    async fn restore_database(
        &self,
        root: &Path,
        entry: &ComponentEntry,
        warnings: &mut Vec<String>,
    ) -> Result<()> {
        let dump = safe_join(root, &entry.path)?;
        let service = &self.config.database.service;
        let auto_started = ensure_running(&self.orchestrator, service).await?;

        let result = self.load_database(&dump).await;

        if auto_started {
            if let Some(warning) = stop_again(&self.orchestrator, service).await {
                warnings.push(warning);
            }
        }
        result
    }

    async fn load_database(&self, dump: &Path) -> Result<()> {
        let db = &self.config.database.name;
        let owner = &self.config.database.owner;
        self.database.drop_create(db, owner).await?;
        self.database.restore(db, dump).await?;
        self.database.grant(db, owner).await
    }

    /// Replace a data directory, renaming the live one aside first.
    fn restore_tree(
        &self,
        root: &Path,
        entry: &ComponentEntry,
        dest: &Path,
        now: DateTime<Utc>,
    ) -> Result<Option<PathBuf>> {
        let src = safe_join(root, &entry.path)?;

        let aside = if exists_or_link(dest) {
            let aside = aside_path(dest, now);
            fs::rename(dest, &aside)?;
            info!(from = ?dest, to = ?aside, "Moved live data aside");
            Some(aside)
        } else {
            None
        };

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        if let Err(e) = self.copier.copy(&src, dest, true) {
            let reason = match &aside {
                Some(aside) => format!("{}; previous data kept at {}", e, aside.display()),
                None => e.to_string(),
            };
            error!(component = %entry.name, aside = ?aside, "Copy into place failed");
            return Err(Error::RestoreFailed {
                component: entry.name,
                reason,
            });
        }
        Ok(aside)
    }

    /// Merge the captured config tree onto the config root.
    fn restore_config(
        &self,
        root: &Path,
        entry: &ComponentEntry,
        now: DateTime<Utc>,
    ) -> Result<Vec<PathBuf>> {
        let src_root = safe_join(root, &entry.path)?;
        let dest_root = &self.config.paths.config_root;
        let mut asides = Vec::new();

        let mut walker = WalkDir::new(&src_root)
            .min_depth(1)
            .follow_links(false)
            .into_iter();
        while let Some(item) = walker.next() {
            let item = item?;
            let rel = item
                .path()
                .strip_prefix(&src_root)
                .map_err(|_| Error::UnsafePath(item.path().display().to_string()))?;
            let dest = dest_root.join(rel);

            if item.file_type().is_dir() {
                if exists_or_link(&dest) {
                    continue;
                }
                // Nothing to set aside below a new directory; copy it whole.
                self.copier
                    .copy(item.path(), &dest, true)
                    .map_err(|e| Error::RestoreFailed {
                        component: Component::Config,
                        reason: format!("{}: {}", dest.display(), e),
                    })?;
                walker.skip_current_dir();
                continue;
            }

            if let Ok(meta) = dest.symlink_metadata() {
                if meta.is_dir() {
                    return Err(Error::RestoreFailed {
                        component: Component::Config,
                        reason: format!("{} is a directory", dest.display()),
                    });
                }
                let aside = aside_path(&dest, now);
                if meta.file_type().is_symlink() {
                    fs::rename(&dest, &aside)?;
                } else {
                    fs::copy(&dest, &aside)?;
                }
                asides.push(aside);
            }

            self.copier
                .copy(item.path(), &dest, true)
                .map_err(|e| Error::RestoreFailed {
                    component: Component::Config,
                    reason: format!("{}: {}", dest.display(), e),
                })?;
        }

        Ok(asides)
    }
}

/// Directory holding `manifest.toml`: `dir` itself or its single child.
fn manifest_root(dir: &Path) -> Option<PathBuf> {
    if dir.join(MANIFEST_FILE).is_file() {
        return Some(dir.to_path_buf());
    }
    let mut candidates = fs::read_dir(dir)
        .ok()?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.join(MANIFEST_FILE).is_file());
    let first = candidates.next()?;
    candidates.next().is_none().then_some(first)
}

/// A component is usable when the manifest records it, its data exists and,
/// for a dump, its checksum matches.
fn check_component(root: &Path, manifest: &BackupManifest, component: Component) -> Result<()> {
    let entry = manifest
        .entry(component)
        .ok_or_else(|| Error::MissingComponent {
            component,
            reason: "not recorded in manifest".to_string(),
        })?;
    let data = safe_join(root, &entry.path)?;
    if !exists_or_link(&data) {
        return Err(Error::MissingComponent {
            component,
            reason: format!("{} is missing from the backup", entry.path),
        });
    }
    if let Some(expected) = &entry.checksum {
        let actual = sha256_file(&data)?;
        if &actual != expected {
            return Err(Error::ChecksumMismatch {
                component,
                expected: expected.clone(),
                actual,
            });
        }
    }
    Ok(())
}

fn next_steps(report: &RestoreReport) -> Vec<String> {
    let mut steps = Vec::new();

    for failure in &report.failures {
        match &failure.log {
            Some(log) => steps.push(format!(
                "Inspect {} and retry with --type db",
                log.display()
            )),
            None => steps.push(format!("Retry the {} restore", failure.component)),
        }
    }
    if !report.restored.is_empty() {
        steps.push("Start the stack: stackctl start".to_string());
    }
    let search_restored = report.restored.contains(&Component::SearchIndex);
    let search_skipped = report
        .plan
        .skipped
        .iter()
        .any(|(c, _)| *c == Component::SearchIndex);
    if search_skipped || (report.restored.contains(&Component::Database) && !search_restored) {
        steps.push("Rebuild the search index from the database once the app is up".to_string());
    }
    if !report.set_aside.is_empty() {
        steps.push("Remove the .pre-restore copies once the restore is verified".to_string());
    }
    steps
}
