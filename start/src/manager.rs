//! Process/service manager abstraction.
//!
//! The orchestrator never runs shell strings. It asks a [`ProcessManager`] to
//! start, stop or kill a described service and to report whether it is active.
//! [`Systemd`] is the implementation for hosts supervised by systemd; test
//! code supplies in-memory implementations.

use crate::error::{Error, Result};
use crate::service::ServiceDescriptor;
use async_trait::async_trait;
use stackctl_config::ActionSpec;
use std::process::{Output, Stdio};
use tracing::debug;

/// Lifecycle operations on supervised services.
#[async_trait]
pub trait ProcessManager: Send + Sync {
    /// Issue the start action. Returns once the action was accepted; readiness
    /// is established separately through health probes.
    async fn start(&self, service: &ServiceDescriptor) -> Result<()>;

    /// Issue the graceful stop action.
    async fn stop(&self, service: &ServiceDescriptor) -> Result<()>;

    /// Issue the hard-kill action.
    async fn force_stop(&self, service: &ServiceDescriptor) -> Result<()>;

    /// Whether the service is currently active.
    async fn is_active(&self, service: &ServiceDescriptor) -> bool;
}

/// Which lifecycle verb an action implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verb {
    Start,
    Stop,
    Kill,
}

/// Process manager backed by `systemctl`.
pub struct Systemd {
    /// Path or name of the systemctl binary
    systemctl: String,
}

impl Systemd {
    /// Create a manager using `systemctl` from `PATH`.
    pub fn new() -> Self {
        Self::with_binary("systemctl")
    }

    /// Create a manager using a specific systemctl binary.
    pub fn with_binary(systemctl: impl Into<String>) -> Self {
        Self {
            systemctl: systemctl.into(),
        }
    }

    fn managed_args(verb: Verb, unit: &str) -> Vec<String> {
        let args: &[&str] = match verb {
            // --no-block: readiness is judged by health probes, not by systemctl
            Verb::Start => &["start", "--no-block"],
            Verb::Stop => &["stop", "--no-block"],
            Verb::Kill => &["kill", "--signal=SIGKILL"],
        };
        args.iter()
            .map(|a| a.to_string())
            .chain(std::iter::once(unit.to_string()))
            .collect()
    }

    async fn run_action(&self, service: &ServiceDescriptor, verb: Verb) -> Result<()> {
        let action = match verb {
            Verb::Start => &service.start,
            Verb::Stop => &service.stop,
            Verb::Kill => &service.force_stop,
        };

        let argv: Vec<String> = match action {
            ActionSpec::Managed => std::iter::once(self.systemctl.clone())
                .chain(Self::managed_args(verb, &service.unit))
                .collect(),
            ActionSpec::Exec { argv } => argv.clone(),
        };

        let failure = |reason: String| match verb {
            Verb::Start => Error::ServiceStartFailed {
                name: service.name.clone(),
                reason,
            },
            Verb::Stop | Verb::Kill => Error::ServiceStopFailed {
                name: service.name.clone(),
                reason,
            },
        };

        debug!(service = %service.name, command = ?argv, "Running lifecycle action");
        let output = run_command(&argv).await?;
        if !output.status.success() {
            return Err(failure(format!(
                "{} exited with {}: {}",
                argv[0],
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }
}

impl Default for Systemd {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProcessManager for Systemd {
    async fn start(&self, service: &ServiceDescriptor) -> Result<()> {
        self.run_action(service, Verb::Start).await
    }

    async fn stop(&self, service: &ServiceDescriptor) -> Result<()> {
        self.run_action(service, Verb::Stop).await
    }

    async fn force_stop(&self, service: &ServiceDescriptor) -> Result<()> {
        self.run_action(service, Verb::Kill).await
    }

    async fn is_active(&self, service: &ServiceDescriptor) -> bool {
        let argv = [
            self.systemctl.clone(),
            "is-active".to_string(),
            "--quiet".to_string(),
            service.unit.clone(),
        ];
        match run_command(&argv).await {
            Ok(output) => output.status.success(),
            Err(e) => {
                debug!(service = %service.name, error = %e, "is-active check failed");
                false
            }
        }
    }
}

/// Run an argv to completion with stdin closed, capturing its output.
///
/// A missing program is reported as an unavailable tool.
pub async fn run_command(argv: &[String]) -> Result<Output> {
    let (program, args) = argv.split_first().ok_or_else(|| Error::ToolUnavailable {
        tool: String::new(),
        reason: "empty command".to_string(),
    })?;

    tokio::process::Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                Error::ToolUnavailable {
                    tool: program.clone(),
                    reason: e.to_string(),
                }
            }
            _ => Error::Io(e),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn exec(argv: &[&str]) -> ActionSpec {
        ActionSpec::Exec {
            argv: argv.iter().map(|a| a.to_string()).collect(),
        }
    }

    #[test]
    fn test_managed_args() {
        assert_eq!(
            Systemd::managed_args(Verb::Start, "nginx"),
            vec!["start", "--no-block", "nginx"]
        );
        assert_eq!(
            Systemd::managed_args(Verb::Kill, "nginx"),
            vec!["kill", "--signal=SIGKILL", "nginx"]
        );
    }

    #[tokio::test]
    async fn test_exec_action_success() {
        let mut def = ServiceDescriptor::new("worker", "stack-worker");
        def.start = exec(&["true"]);
        Systemd::new().start(&def).await.unwrap();
    }

    #[tokio::test]
    async fn test_exec_action_failure_names_service() {
        let mut def = ServiceDescriptor::new("worker", "stack-worker");
        def.stop = exec(&["false"]);
        let err = Systemd::new().stop(&def).await.unwrap_err();
        assert_matches!(err, Error::ServiceStopFailed { ref name, .. } if name == "worker");
    }

    #[tokio::test]
    async fn test_missing_binary_is_unavailable_tool() {
        let def = ServiceDescriptor::new("database", "postgresql");
        let manager = Systemd::with_binary("/nonexistent/systemctl");
        let err = manager.start(&def).await.unwrap_err();
        assert_matches!(err, Error::ToolUnavailable { .. });
        assert!(!manager.is_active(&def).await);
    }

    #[tokio::test]
    async fn test_empty_command() {
        assert_matches!(run_command(&[]).await, Err(Error::ToolUnavailable { .. }));
    }
}
