//! Service descriptor types and states.

use serde::{Deserialize, Serialize};
use stackctl_config::{ActionSpec, ProbeSpec, ServiceOverride};
use std::time::Duration;

/// Current state of a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServiceState {
    /// Service is not running
    #[default]
    Stopped,
    /// Start action issued
    Starting,
    /// Waiting for the health probe to pass
    HealthChecking,
    /// Service is running and healthy
    Running,
    /// Stop action issued
    Stopping,
    /// Service failed to start or stop
    Failed,
}

impl std::fmt::Display for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceState::Stopped => write!(f, "stopped"),
            ServiceState::Starting => write!(f, "starting"),
            ServiceState::HealthChecking => write!(f, "health-checking"),
            ServiceState::Running => write!(f, "running"),
            ServiceState::Stopping => write!(f, "stopping"),
            ServiceState::Failed => write!(f, "failed"),
        }
    }
}

/// Service descriptor - describes how to run and check one service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    /// Unique name of the service
    pub name: String,
    /// Human-readable description
    pub description: String,
    /// Unit name known to the process manager
    pub unit: String,
    /// Services that must be running before this one starts
    pub depends_on: Vec<String>,
    /// How to start the service
    pub start: ActionSpec,
    /// How to stop the service gracefully
    pub stop: ActionSpec,
    /// How to kill the service when a graceful stop times out
    pub force_stop: ActionSpec,
    /// Readiness check
    pub probe: ProbeSpec,
    /// Maximum time to wait for the service to become healthy
    pub start_timeout: Duration,
    /// Maximum time to wait for the service to stop
    pub stop_timeout: Duration,
}

fn default_timeout_start() -> Duration {
    Duration::from_secs(60)
}

fn default_timeout_stop() -> Duration {
    Duration::from_secs(60)
}

impl ServiceDescriptor {
    /// Create a new descriptor with managed actions and a unit-active probe.
    pub fn new(name: impl Into<String>, unit: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            unit: unit.into(),
            depends_on: Vec::new(),
            start: ActionSpec::Managed,
            stop: ActionSpec::Managed,
            force_stop: ActionSpec::Managed,
            probe: ProbeSpec::Active,
            start_timeout: default_timeout_start(),
            stop_timeout: default_timeout_stop(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_dependencies(mut self, deps: &[&str]) -> Self {
        self.depends_on = deps.iter().map(|d| d.to_string()).collect();
        self
    }

    pub fn with_probe(mut self, probe: ProbeSpec) -> Self {
        self.probe = probe;
        self
    }

    pub fn with_timeouts(mut self, start: Duration, stop: Duration) -> Self {
        self.start_timeout = start;
        self.stop_timeout = stop;
        self
    }

    /// Apply a configured override on top of this descriptor.
    pub fn apply_override(&mut self, o: &ServiceOverride) {
        if let Some(unit) = &o.unit {
            self.unit = unit.clone();
        }
        if let Some(deps) = &o.depends_on {
            self.depends_on = deps.clone();
        }
        if let Some(secs) = o.start_timeout_secs {
            self.start_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = o.stop_timeout_secs {
            self.stop_timeout = Duration::from_secs(secs);
        }
        if let Some(probe) = &o.probe {
            self.probe = probe.clone();
        }
        if let Some(action) = &o.start {
            self.start = action.clone();
        }
        if let Some(action) = &o.stop {
            self.stop = action.clone();
        }
        if let Some(action) = &o.force_stop {
            self.force_stop = action.clone();
        }
    }
}

/// Live status of one service, for display.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceStatus {
    /// Service name
    pub name: String,
    /// Unit name
    pub unit: String,
    /// State derived from the process manager and one probe
    pub state: ServiceState,
    /// Description of the readiness check
    pub probe: String,
}
