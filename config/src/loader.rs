//! Configuration loading utilities
//!
//! Locates, parses and validates the stack configuration file.

use crate::{ConfigError, Result, StackConfig};
use regex::Regex;
use std::path::{Path, PathBuf};

/// Configuration loader for the stack configuration file
pub struct ConfigLoader {
    /// Path of the configuration file
    path: PathBuf,
    /// Whether to use default values when the file is missing
    use_defaults: bool,
    /// Whether to validate configuration after loading
    validate: bool,
}

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            use_defaults: true,
            validate: true,
        }
    }

    /// Create a loader for the configuration file named by the environment,
    /// falling back to the system location
    pub fn system() -> Self {
        Self::new(get_config_path())
    }

    /// Set whether to use defaults for a missing file
    pub fn use_defaults(mut self, use_defaults: bool) -> Self {
        self.use_defaults = use_defaults;
        self
    }

    /// Set whether to validate configuration
    pub fn validate(mut self, validate: bool) -> Self {
        self.validate = validate;
        self
    }

    /// Load the configuration
    pub fn load(&self) -> Result<StackConfig> {
        let config = if self.path.exists() {
            StackConfig::from_file(&self.path)?
        } else if self.use_defaults {
            tracing::debug!(path = ?self.path, "Configuration file not found, using defaults");
            StackConfig::default()
        } else {
            return Err(ConfigError::NotFound(self.path.clone()));
        };

        if self.validate {
            validate_config(&config)?;
        }

        Ok(config)
    }

    /// Get the configuration file path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Validate configuration for common issues
pub fn validate_config(config: &StackConfig) -> Result<()> {
    // Names end up as SQL identifiers in grant statements
    let identifier = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$")?;
    for (what, value) in [
        ("database name", &config.database.name),
        ("database owner", &config.database.owner),
    ] {
        if !identifier.is_match(value) {
            return Err(ConfigError::Invalid(format!(
                "{} '{}' is not a plain identifier",
                what, value
            )));
        }
    }

    let prefix = Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$")?;
    if !prefix.is_match(&config.backup.prefix) {
        return Err(ConfigError::Invalid(format!(
            "backup prefix '{}' must be a plain file name",
            config.backup.prefix
        )));
    }

    for path in &config.backup.config_paths {
        if !path.is_absolute() {
            return Err(ConfigError::Invalid(format!(
                "config path '{}' must be absolute",
                path.display()
            )));
        }
    }

    for (what, path) in [
        ("content_dir", &config.paths.content_dir),
        ("search_data_dir", &config.paths.search_data_dir),
        ("config_root", &config.paths.config_root),
    ] {
        if !path.is_absolute() {
            return Err(ConfigError::Invalid(format!(
                "{} '{}' must be absolute",
                what,
                path.display()
            )));
        }
    }

    if config.orchestrator.probe_interval_ms == 0 {
        return Err(ConfigError::Invalid(
            "probe_interval_ms must be greater than zero".to_string(),
        ));
    }

    if config.database.privilege_wrapper.iter().any(|a| a.is_empty()) {
        return Err(ConfigError::Invalid(
            "privilege_wrapper contains an empty argument".to_string(),
        ));
    }

    if !config.paths.log_dir.exists() {
        tracing::warn!(
            "Log directory does not exist yet: {}",
            config.paths.log_dir.display()
        );
    }

    Ok(())
}

/// Default configuration paths
pub mod paths {
    use std::path::PathBuf;

    /// System configuration directory
    pub fn system_config() -> PathBuf {
        PathBuf::from("/etc/stackctl")
    }

    /// System stack configuration file
    pub fn stack_toml() -> PathBuf {
        system_config().join("stack.toml")
    }
}

/// Environment variable names used by the configuration system
pub mod env_vars {
    /// Configuration file override
    pub const CONFIG: &str = "STACKCTL_CONFIG";
}

/// Get the configuration file path from environment or default
pub fn get_config_path() -> PathBuf {
    std::env::var(env_vars::CONFIG)
        .map(PathBuf::from)
        .unwrap_or_else(|_| paths::stack_toml())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_loader_defaults() {
        let loader = ConfigLoader::new("/nonexistent/stack.toml");
        let config = loader.load().unwrap();
        assert_eq!(config.database.name, "stack");
    }

    #[test]
    fn test_config_loader_no_defaults() {
        let loader = ConfigLoader::new("/nonexistent/stack.toml").use_defaults(false);
        let result = loader.load();
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_validate_config() {
        let config = StackConfig::default();
        validate_config(&config).unwrap();
    }

    #[test]
    fn test_rejects_bad_identifier() {
        let mut config = StackConfig::default();
        config.database.owner = "stack; DROP ROLE x".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_rejects_path_like_prefix() {
        let mut config = StackConfig::default();
        config.backup.prefix = "../elsewhere".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_rejects_relative_config_path() {
        let mut config = StackConfig::default();
        config.backup.config_paths.push(PathBuf::from("etc/app.conf"));
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("stack.toml");
        std::fs::write(&path, "[database]\nname = \"crm\"\n").unwrap();

        let config = ConfigLoader::new(&path).load().unwrap();
        assert_eq!(config.database.name, "crm");
        assert_eq!(config.database.owner, "stack");
    }

    #[test]
    fn test_paths() {
        assert_eq!(paths::stack_toml(), PathBuf::from("/etc/stackctl/stack.toml"));
    }
}
