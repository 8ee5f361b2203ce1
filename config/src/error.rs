//! Error types for configuration operations

use std::path::PathBuf;
use thiserror::Error;

/// Operator-facing classification shared by every stackctl crate.
///
/// Each crate's error enum maps onto one of these through a `kind()` method so
/// the binary can report failures uniformly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Missing or invalid descriptor, memory override or config value
    Configuration,
    /// A required tool or service is unavailable
    Dependency,
    /// A health probe or shutdown exceeded its bound
    Timeout,
    /// A backup manifest lacks something the requested operation needs
    Validation,
    /// A copy, dump or restore action reported failure
    DataMutation,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Configuration => write!(f, "configuration error"),
            ErrorKind::Dependency => write!(f, "dependency error"),
            ErrorKind::Timeout => write!(f, "timeout"),
            ErrorKind::Validation => write!(f, "validation error"),
            ErrorKind::DataMutation => write!(f, "data mutation error"),
        }
    }
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Configuration file not found: {0}")]
    NotFound(PathBuf),

    #[error("Invalid memory override {key}: {reason}")]
    InvalidMemoryOverride { key: String, reason: String },

    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),
}

impl ConfigError {
    /// Every configuration failure is a configuration error, except an
    /// unreadable file which is reported as a missing dependency.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConfigError::Io(_) => ErrorKind::Dependency,
            _ => ErrorKind::Configuration,
        }
    }
}

/// Result type alias for configuration operations
pub type Result<T> = std::result::Result<T, ConfigError>;
