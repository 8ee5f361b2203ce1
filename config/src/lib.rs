//! Stackctl configuration
//!
//! This crate holds the explicit configuration object shared by every
//! stackctl component, the loader that reads it from disk, and the memory
//! profiler that sizes per-service budgets from host capacity.
//!
//! - [`stack`]: the [`StackConfig`] object and its sections
//! - [`loader`]: locating, parsing and validating the configuration file
//! - [`memory`]: tier ladder and per-service memory budgets
//! - [`error`]: configuration errors and the shared [`ErrorKind`] taxonomy
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use stackctl_config::{ConfigLoader, MemoryProfile};
//!
//! let config = ConfigLoader::system().load().unwrap();
//! let profile = MemoryProfile::from_config(&config.memory).unwrap();
//! println!("tier: {}", profile.tier);
//! ```

pub mod error;
pub mod loader;
pub mod memory;
pub mod stack;

pub use error::{ConfigError, ErrorKind, Result};
pub use loader::{get_config_path, paths, validate_config, ConfigLoader};
pub use memory::{detect_total_memory_mb, MemoryProfile, Tier, BUDGETED_SERVICES, TIERS};
pub use stack::{
    ActionSpec, BackupConfig, DatabaseConfig, MemoryConfig, OrchestratorConfig, PathsConfig,
    ProbeSpec, ServiceOverride, StackConfig,
};
