//! Error types for lifecycle orchestration.

use std::time::Duration;
use stackctl_config::{ConfigError, ErrorKind};
use thiserror::Error;

/// Result type alias for orchestration operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while managing the stack.
#[derive(Error, Debug)]
pub enum Error {
    /// Service not found
    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    /// Service declared twice
    #[error("Service already exists: {0}")]
    ServiceAlreadyExists(String),

    /// Dependency on a service that is not in the registry
    #[error("Service {service} depends on unknown service {dependency}")]
    UnknownDependency { service: String, dependency: String },

    /// Circular dependency detected
    #[error("Circular dependency detected: {0:?}")]
    CircularDependency(Vec<String>),

    /// Invalid descriptor or override
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// The start action reported failure
    #[error("Service failed to start: {name}: {reason}")]
    ServiceStartFailed { name: String, reason: String },

    /// The stop or hard-kill action reported failure
    #[error("Service failed to stop: {name}: {reason}")]
    ServiceStopFailed { name: String, reason: String },

    /// Health checking exceeded the start timeout
    #[error("Health check for {name} timed out after {}s ({attempts} probes)", .elapsed.as_secs())]
    HealthCheckTimeout {
        name: String,
        elapsed: Duration,
        attempts: u32,
    },

    /// A restart could not stop every service
    #[error("Stop phase left services running: {0:?}")]
    StopIncomplete(Vec<String>),

    /// A program the orchestrator needs is missing
    #[error("Required tool {tool} is unavailable: {reason}")]
    ToolUnavailable { tool: String, reason: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading error
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl Error {
    /// Classify the error for operator reporting.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::ServiceNotFound(_)
            | Error::ServiceAlreadyExists(_)
            | Error::UnknownDependency { .. }
            | Error::CircularDependency(_)
            | Error::ConfigError(_) => ErrorKind::Configuration,
            Error::HealthCheckTimeout { .. } => ErrorKind::Timeout,
            Error::Config(e) => e.kind(),
            Error::ServiceStartFailed { .. }
            | Error::ServiceStopFailed { .. }
            | Error::StopIncomplete(_)
            | Error::ToolUnavailable { .. }
            | Error::Io(_) => ErrorKind::Dependency,
        }
    }

    /// Name of the service the error is about, when there is one.
    pub fn service(&self) -> Option<&str> {
        match self {
            Error::ServiceNotFound(name)
            | Error::ServiceAlreadyExists(name)
            | Error::ServiceStartFailed { name, .. }
            | Error::ServiceStopFailed { name, .. }
            | Error::HealthCheckTimeout { name, .. } => Some(name),
            Error::UnknownDependency { service, .. } => Some(service),
            _ => None,
        }
    }
}
