//! Error types for backup and restore

use std::path::{Path, PathBuf};
use stackctl_config::{ConfigError, ErrorKind};
use thiserror::Error;

use crate::manifest::Component;

/// Result type alias for backup and restore operations
pub type Result<T> = std::result::Result<T, Error>;

/// Backup and restore errors
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid backup {path}: {reason}")]
    InvalidBackup { path: PathBuf, reason: String },

    #[error("Backup at {0} was never completed")]
    IncompleteManifest(PathBuf),

    #[error("Backup does not contain {component}: {reason}")]
    MissingComponent { component: Component, reason: String },

    #[error("Checksum mismatch for {component}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        component: Component,
        expected: String,
        actual: String,
    },

    #[error("Unsafe path in backup: {0}")]
    UnsafePath(String),

    #[error("Failed to capture {component}: {reason}")]
    CaptureFailed { component: Component, reason: String },

    #[error("Failed to restore {component}: {reason}")]
    RestoreFailed { component: Component, reason: String },

    #[error("Database {operation} failed: {reason}")]
    DatabaseTool {
        operation: String,
        reason: String,
        log: Option<PathBuf>,
    },

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Required tool {tool} is unavailable: {reason}")]
    ToolUnavailable { tool: String, reason: String },

    #[error("Services still running: {0:?}")]
    ServicesRunning(Vec<String>),

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("Invalid option: {0}")]
    InvalidOption(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Walk directory error: {0}")]
    WalkDir(#[from] walkdir::Error),

    #[error("Manifest parse error: {0}")]
    ManifestParse(#[from] toml::de::Error),

    #[error("Manifest serialize error: {0}")]
    ManifestSerialize(#[from] toml::ser::Error),

    #[error("Prompt error: {0}")]
    Prompt(#[from] dialoguer::Error),

    #[error(transparent)]
    Lifecycle(#[from] stackctl_start::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl Error {
    /// Classify the error for operator reporting.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidBackup { .. }
            | Error::IncompleteManifest(_)
            | Error::MissingComponent { .. }
            | Error::ChecksumMismatch { .. }
            | Error::UnsafePath(_)
            | Error::ManifestParse(_) => ErrorKind::Validation,
            Error::CaptureFailed { .. }
            | Error::RestoreFailed { .. }
            | Error::DatabaseTool { .. }
            | Error::Archive(_)
            | Error::Io(_)
            | Error::WalkDir(_)
            | Error::ManifestSerialize(_) => ErrorKind::DataMutation,
            Error::ToolUnavailable { .. }
            | Error::ServicesRunning(_)
            | Error::Cancelled(_)
            | Error::Prompt(_) => ErrorKind::Dependency,
            Error::InvalidOption(_) => ErrorKind::Configuration,
            Error::Lifecycle(e) => e.kind(),
            Error::Config(e) => e.kind(),
        }
    }

    /// Log file of the external tool behind this error, when one was captured.
    pub fn log_path(&self) -> Option<&Path> {
        match self {
            Error::DatabaseTool { log, .. } => log.as_deref(),
            _ => None,
        }
    }
}
