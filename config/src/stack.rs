//! The stack configuration object.
//!
//! A [`StackConfig`] is loaded once per invocation and handed by reference to
//! the orchestrator, the backup engine and the restore engine. Every field has
//! a default so that an empty or missing file describes a conventional
//! single-host install.

use crate::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Complete configuration for one managed stack.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StackConfig {
    /// Filesystem locations of live data
    pub paths: PathsConfig,
    /// Database connection and tooling
    pub database: DatabaseConfig,
    /// Backup defaults
    pub backup: BackupConfig,
    /// Lifecycle timing
    pub orchestrator: OrchestratorConfig,
    /// Memory sizing inputs
    pub memory: MemoryConfig,
    /// Per-service overrides keyed by service name
    pub services: BTreeMap<String, ServiceOverride>,
}

impl StackConfig {
    /// Load a stack configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: StackConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save the stack configuration to a TOML file.
    pub fn to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Look up the override block for a service, if one was configured.
    pub fn service(&self, name: &str) -> Option<&ServiceOverride> {
        self.services.get(name)
    }
}

/// Locations of the data the stack owns.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Uploaded/user content store
    pub content_dir: PathBuf,
    /// Search engine data directory
    pub search_data_dir: PathBuf,
    /// Root that absolute config paths are resolved against
    pub config_root: PathBuf,
    /// Directory receiving logs of external tools
    pub log_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            content_dir: PathBuf::from("/var/lib/stack/content"),
            search_data_dir: PathBuf::from("/var/lib/opensearch"),
            config_root: PathBuf::from("/"),
            log_dir: PathBuf::from("/var/log/stackctl"),
        }
    }
}

/// Database settings used for dumps and restores.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Registry name of the database service
    pub service: String,
    /// Database name
    pub name: String,
    /// Role that owns the database
    pub owner: String,
    /// Command prefix that runs the client tools as the database superuser
    pub privilege_wrapper: Vec<String>,
    /// Client binaries
    pub pg_dump: String,
    pub pg_restore: String,
    pub psql: String,
    pub createdb: String,
    pub dropdb: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            service: "database".to_string(),
            name: "stack".to_string(),
            owner: "stack".to_string(),
            privilege_wrapper: vec![
                "runuser".to_string(),
                "-u".to_string(),
                "postgres".to_string(),
                "--".to_string(),
            ],
            pg_dump: "pg_dump".to_string(),
            pg_restore: "pg_restore".to_string(),
            psql: "psql".to_string(),
            createdb: "createdb".to_string(),
            dropdb: "dropdb".to_string(),
        }
    }
}

/// Backup defaults; every value can be overridden on the command line.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    /// Directory receiving backups
    pub output_dir: PathBuf,
    /// Name prefix of backups; retention only ever touches this prefix
    pub prefix: String,
    /// Days to keep backups; 0 disables the sweep
    pub retention_days: u32,
    /// Archive backups as .tar.gz
    pub compress: bool,
    /// Include the search index in full backups and restores
    pub include_search_index: bool,
    /// Allow-list of configuration files and directories (absolute paths)
    pub config_paths: Vec<PathBuf>,
    /// Services that write backed-up data and are stopped for cold operations
    pub quiesce_services: Vec<String>,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("/var/backups/stack"),
            prefix: "stack-backup".to_string(),
            retention_days: 14,
            compress: true,
            include_search_index: true,
            config_paths: vec![
                PathBuf::from("/etc/stackctl/stack.toml"),
                PathBuf::from("/etc/stack/app.env"),
                PathBuf::from("/etc/stack/worker.env"),
                PathBuf::from("/etc/nginx/conf.d/stack.conf"),
                PathBuf::from("/etc/rabbitmq/rabbitmq.conf"),
                PathBuf::from("/etc/opensearch/opensearch.yml"),
                PathBuf::from("/etc/opensearch/jvm.options.d"),
            ],
            quiesce_services: vec![
                "proxy".to_string(),
                "app".to_string(),
                "worker".to_string(),
                "search".to_string(),
            ],
        }
    }
}

/// Timing used by the lifecycle orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Interval between health probes
    pub probe_interval_ms: u64,
    /// Bound on a single health probe
    pub probe_timeout_ms: u64,
    /// Pause between the stop and start phases of a restart
    pub settle_delay_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            probe_interval_ms: 2_000,
            probe_timeout_ms: 5_000,
            settle_delay_ms: 3_000,
        }
    }
}

impl OrchestratorConfig {
    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

/// Inputs to the memory profiler.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Total memory in MB; replaces host detection when set
    pub total_mb: Option<u64>,
    /// Explicit budgets in MB keyed by service or derived key
    pub overrides: BTreeMap<String, u64>,
}

/// Per-service overrides of the built-in registry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceOverride {
    /// Supervisor unit name
    pub unit: Option<String>,
    /// Replacement dependency list
    pub depends_on: Option<Vec<String>>,
    /// Bound on start-up including health checking
    pub start_timeout_secs: Option<u64>,
    /// Bound on a graceful stop
    pub stop_timeout_secs: Option<u64>,
    /// Replacement health probe
    pub probe: Option<ProbeSpec>,
    /// Replacement start action
    pub start: Option<ActionSpec>,
    /// Replacement stop action
    pub stop: Option<ActionSpec>,
    /// Replacement hard-kill action
    pub force_stop: Option<ActionSpec>,
}

/// How a service's readiness is checked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ProbeSpec {
    /// A TCP connection can be established
    Tcp { host: String, port: u16 },
    /// An HTTP GET returns a success status
    Http { url: String },
    /// A program exits with status 0
    Exec { argv: Vec<String> },
    /// The process manager reports the unit active
    Active,
}

impl std::fmt::Display for ProbeSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProbeSpec::Tcp { host, port } => write!(f, "tcp {}:{}", host, port),
            ProbeSpec::Http { url } => write!(f, "http {}", url),
            ProbeSpec::Exec { argv } => write!(f, "exec {}", argv.join(" ")),
            ProbeSpec::Active => write!(f, "unit active"),
        }
    }
}

/// How a lifecycle action is carried out.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ActionSpec {
    /// Use the process manager's own verb for the unit
    #[default]
    Managed,
    /// Run a program directly; arguments are never passed through a shell
    Exec { argv: Vec<String> },
}

impl ActionSpec {
    /// Build an exec action, rejecting an empty argv.
    pub fn exec<I, S>(argv: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let argv: Vec<String> = argv.into_iter().map(Into::into).collect();
        if argv.is_empty() {
            return Err(ConfigError::Invalid("empty exec action".to_string()));
        }
        Ok(ActionSpec::Exec { argv })
    }
}
