//! Backup and restore for the managed stack.
//!
//! A backup captures the stateful parts of the stack (database dump, user
//! content, search index, configuration files) into a timestamped directory
//! described by a manifest, optionally packed into a `.tar.gz`. A restore
//! validates a backup completely before touching live data and keeps the
//! data it replaces.
//!
//! # Architecture
//!
//! - **BackupEngine**: Quiesce, capture, compress and retention sweep
//! - **RestoreEngine**: Plan, confirm, quiesce and restore per component
//! - **ManifestWriter**: Append-only manifest with a completion marker
//! - **DatabaseTool**: Dump and load (PostgreSQL client tools in production)
//! - **FileCopier** / **Archiver** / **Confirm**: Filesystem, archive and
//!   operator seams
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use stackctl_backup::{BackupEngine, BackupOptions, BackupType};
//! use stackctl_config::ConfigLoader;
//! use stackctl_start::Orchestrator;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConfigLoader::system().load()?;
//!     let orchestrator = Arc::new(Orchestrator::from_config(&config)?);
//!     let engine = BackupEngine::new(&config, orchestrator);
//!     let opts = BackupOptions::from_config(&config.backup, BackupType::Full);
//!     let report = engine.run(&opts).await?;
//!     print!("{}", report);
//!     Ok(())
//! }
//! ```

pub mod archive;
pub mod backup;
pub mod catalog;
pub mod confirm;
pub mod database;
pub mod error;
pub mod fsops;
pub mod manifest;
pub mod paths;
pub mod restore;
pub mod services;

// Re-export main types
pub use archive::{Archiver, TarGz};
pub use backup::{BackupEngine, BackupOptions, BackupReport, DUMP_FILE};
pub use catalog::{list_backups, sweep_expired, BackupEntry};
pub use confirm::{Confirm, Preset, TerminalConfirm};
pub use database::{DatabaseTool, Postgres};
pub use error::{Error, Result};
pub use fsops::{format_size, sha256_file, FileCopier, LocalCopier};
pub use manifest::{
    BackupManifest, BackupType, Component, ComponentEntry, ManifestHeader, ManifestWriter,
    MANIFEST_FILE,
};
pub use restore::{ComponentFailure, RestoreEngine, RestoreOptions, RestorePlan, RestoreReport};
