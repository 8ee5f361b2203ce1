//! Lifecycle orchestration for the managed stack.
//!
//! This crate brings a fixed set of cooperating services up and down in
//! dependency order:
//!
//! - Service registry with cycle detection and a deterministic start order
//! - Health-gated start with per-service timeouts
//! - Reverse-order stop with optional hard-kill escalation
//! - Live status derived from the process manager and health probes
//!
//! # Architecture
//!
//! - **ServiceRegistry**: Validated service table and computed order
//! - **Orchestrator**: Runs start, stop, restart and status sequences
//! - **ProcessManager**: Issues lifecycle actions (systemd in production)
//! - **HealthProber**: Readiness checks (tcp, http, exec, unit active)
//!
//! # Example
//!
//! ```no_run
//! use stackctl_config::ConfigLoader;
//! use stackctl_start::{Orchestrator, StartOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConfigLoader::system().load()?;
//!     let orchestrator = Orchestrator::from_config(&config)?;
//!     let report = orchestrator.start(StartOptions::default()).await?;
//!     print!("{}", report);
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod manager;
pub mod orchestrator;
pub mod poll;
pub mod probe;
pub mod registry;
pub mod service;

// Re-export main types
pub use error::{Error, Result};
pub use manager::{run_command, ProcessManager, Systemd};
pub use orchestrator::{
    Orchestrator, RestartReport, StartOptions, StartOutcome, StartReport, StopEntry, StopMode,
    StopOptions, StopOutcome, StopReport,
};
pub use poll::{poll_until, PollOutcome};
pub use probe::{HealthProber, LiveProber};
pub use registry::{default_descriptors, ServiceRegistry};
pub use service::{ServiceDescriptor, ServiceState, ServiceStatus};
