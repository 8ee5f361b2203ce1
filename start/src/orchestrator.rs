//! Lifecycle orchestrator.
//!
//! Brings the stack up in dependency order, gating each service on its health
//! probe, and takes it down in reverse order with optional hard-kill
//! escalation. Every step is awaited before the next begins; nothing runs
//! concurrently.
//!
//! Start is fail-fast: the first service that cannot start or does not become
//! healthy within its start timeout aborts the sequence. Stop never aborts:
//! every service gets an attempt and the outcome is collected in a
//! [`StopReport`].
//!
//! Service state is never persisted. Whether a service is already running is
//! derived live from the [`ProcessManager`] and one health probe, which makes
//! re-running `start` after an interruption safe.

use crate::error::{Error, Result};
use crate::manager::{ProcessManager, Systemd};
use crate::poll::{poll_until, PollOutcome};
use crate::probe::{HealthProber, LiveProber};
use crate::registry::ServiceRegistry;
use crate::service::{ServiceDescriptor, ServiceState, ServiceStatus};
use stackctl_config::{OrchestratorConfig, StackConfig};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{error, info, warn};

/// How long to wait for a service to disappear after the hard-kill action.
const FORCE_STOP_GRACE: Duration = Duration::from_secs(10);

/// Options for a start sequence.
#[derive(Debug, Clone, Copy)]
pub struct StartOptions {
    /// Gate each service on its health probe before starting the next
    pub wait: bool,
}

impl Default for StartOptions {
    fn default() -> Self {
        Self { wait: true }
    }
}

/// Whether a stop may escalate to the hard-kill action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopMode {
    Graceful,
    Forced,
}

/// Options for a stop sequence.
#[derive(Debug, Clone, Copy)]
pub struct StopOptions {
    pub mode: StopMode,
    /// Wait for each service to report inactive before moving on
    pub wait: bool,
}

impl Default for StopOptions {
    fn default() -> Self {
        Self {
            mode: StopMode::Graceful,
            wait: true,
        }
    }
}

/// What happened to one service during a start sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    /// Started and passed its health probe
    Started { attempts: u32, elapsed: Duration },
    /// Was already running and healthy; no action issued
    AlreadyRunning,
    /// Start action issued without waiting for health
    Requested,
}

/// Per-service results of a start sequence, in start order.
#[derive(Debug, Clone, Default)]
pub struct StartReport {
    pub entries: Vec<(String, StartOutcome)>,
}

impl StartReport {
    /// Services for which a start action was issued.
    pub fn started(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(_, o)| !matches!(o, StartOutcome::AlreadyRunning))
            .map(|(n, _)| n.as_str())
            .collect()
    }
}

impl std::fmt::Display for StartReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (name, outcome) in &self.entries {
            match outcome {
                StartOutcome::Started { attempts, elapsed } => writeln!(
                    f,
                    "  {:<12} running   ({:.1}s, {} probes)",
                    name,
                    elapsed.as_secs_f64(),
                    attempts
                )?,
                StartOutcome::AlreadyRunning => {
                    writeln!(f, "  {:<12} running   (already running)", name)?
                }
                StartOutcome::Requested => writeln!(f, "  {:<12} starting  (not waited for)", name)?,
            }
        }
        Ok(())
    }
}

/// Final status of one service after a stop attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    /// Stopped by the graceful action (or was not running)
    Stopped,
    /// Stopped only after the hard-kill action
    Forced,
    /// Still running, or an action failed
    Failed(String),
}

impl std::fmt::Display for StopOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopOutcome::Stopped => write!(f, "stopped"),
            StopOutcome::Forced => write!(f, "forced"),
            StopOutcome::Failed(_) => write!(f, "failed"),
        }
    }
}

/// One row of a [`StopReport`].
#[derive(Debug, Clone)]
pub struct StopEntry {
    pub name: String,
    pub outcome: StopOutcome,
    pub elapsed: Duration,
    /// Extra information for the operator
    pub detail: Option<String>,
}

/// Per-service results of a stop sequence, in stop order.
#[derive(Debug, Clone, Default)]
pub struct StopReport {
    pub entries: Vec<StopEntry>,
}

impl StopReport {
    /// Whether every service ended up stopped (gracefully or forced).
    pub fn success(&self) -> bool {
        self.entries
            .iter()
            .all(|e| !matches!(e.outcome, StopOutcome::Failed(_)))
    }

    /// Names of services that could not be stopped.
    pub fn failed(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| matches!(e.outcome, StopOutcome::Failed(_)))
            .map(|e| e.name.clone())
            .collect()
    }

    /// Outcome for one service.
    pub fn outcome(&self, name: &str) -> Option<&StopOutcome> {
        self.entries
            .iter()
            .find(|e| e.name == name)
            .map(|e| &e.outcome)
    }
}

impl std::fmt::Display for StopReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for entry in &self.entries {
            write!(
                f,
                "  {:<12} {:<8} ({:.1}s)",
                entry.name,
                entry.outcome.to_string(),
                entry.elapsed.as_secs_f64()
            )?;
            match (&entry.outcome, &entry.detail) {
                (StopOutcome::Failed(reason), _) => writeln!(f, " {}", reason)?,
                (_, Some(detail)) => writeln!(f, " {}", detail)?,
                _ => writeln!(f)?,
            }
        }
        Ok(())
    }
}

/// Results of a restart.
#[derive(Debug, Clone, Default)]
pub struct RestartReport {
    pub stop: StopReport,
    pub start: StartReport,
}

/// Lifecycle orchestrator for the stack.
pub struct Orchestrator {
    /// Service table and computed order
    registry: ServiceRegistry,
    /// Process manager issuing lifecycle actions
    manager: Arc<dyn ProcessManager>,
    /// Readiness checks
    prober: Arc<dyn HealthProber>,
    /// Interval between probes
    probe_interval: Duration,
    /// Pause between the phases of a restart
    settle_delay: Duration,
    /// In-process state machine; never written to disk
    states: RwLock<HashMap<String, ServiceState>>,
}

impl Orchestrator {
    /// Create an orchestrator over a registry and its collaborators.
    pub fn new(
        registry: ServiceRegistry,
        manager: Arc<dyn ProcessManager>,
        prober: Arc<dyn HealthProber>,
        config: &OrchestratorConfig,
    ) -> Self {
        Self {
            registry,
            manager,
            prober,
            probe_interval: config.probe_interval(),
            settle_delay: config.settle_delay(),
            states: RwLock::new(HashMap::new()),
        }
    }

    /// Create the production orchestrator for a configuration: systemd as the
    /// process manager and live probes.
    pub fn from_config(config: &StackConfig) -> Result<Self> {
        let registry = ServiceRegistry::from_config(config)?;
        let manager: Arc<dyn ProcessManager> = Arc::new(Systemd::new());
        let prober = Arc::new(LiveProber::new(
            Arc::clone(&manager),
            config.orchestrator.probe_timeout(),
        )?);
        Ok(Self::new(registry, manager, prober, &config.orchestrator))
    }

    /// The service registry.
    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    /// Last state the orchestrator observed for a service in this process.
    pub async fn state(&self, name: &str) -> ServiceState {
        self.states
            .read()
            .await
            .get(name)
            .copied()
            .unwrap_or_default()
    }

    async fn set_state(&self, name: &str, state: ServiceState) {
        self.states.write().await.insert(name.to_string(), state);
    }

    /// Whether a service is active according to the process manager.
    pub async fn is_active(&self, name: &str) -> Result<bool> {
        let def = self.registry.get(name)?;
        Ok(self.manager.is_active(def).await)
    }

    /// Start every service in dependency order.
    pub async fn start(&self, opts: StartOptions) -> Result<StartReport> {
        let order = self.registry.start_order().to_vec();
        self.start_sequence(&order, opts).await
    }

    /// Start a subset of services, in dependency order.
    ///
    /// Dependencies outside the subset are not started.
    pub async fn start_services(&self, names: &[&str], opts: StartOptions) -> Result<StartReport> {
        let order = self.registry.ordered_subset(names)?;
        self.start_sequence(&order, opts).await
    }

    /// Stop every service in reverse dependency order.
    pub async fn stop(&self, opts: StopOptions) -> StopReport {
        let order = self.registry.stop_order();
        self.stop_sequence(&order, opts).await
    }

    /// Stop a subset of services, in reverse dependency order.
    pub async fn stop_services(&self, names: &[&str], opts: StopOptions) -> Result<StopReport> {
        let mut order = self.registry.ordered_subset(names)?;
        order.reverse();
        Ok(self.stop_sequence(&order, opts).await)
    }

    /// Stop everything (escalating to hard kills), pause, then start everything.
    pub async fn restart(&self) -> Result<RestartReport> {
        let stop = self
            .stop(StopOptions {
                mode: StopMode::Forced,
                wait: true,
            })
            .await;

        if !stop.success() {
            return Err(Error::StopIncomplete(stop.failed()));
        }

        info!(delay_ms = self.settle_delay.as_millis() as u64, "Waiting before start phase");
        tokio::time::sleep(self.settle_delay).await;

        let start = self.start(StartOptions::default()).await?;
        Ok(RestartReport { stop, start })
    }

    /// Live status of every service in start order.
    pub async fn status(&self) -> Vec<ServiceStatus> {
        let mut statuses = Vec::new();
        for def in self.ordered_descriptors() {
            let state = if !self.manager.is_active(def).await {
                ServiceState::Stopped
            } else if self.prober.probe(def).await {
                ServiceState::Running
            } else {
                ServiceState::Starting
            };
            self.set_state(&def.name, state).await;
            statuses.push(ServiceStatus {
                name: def.name.clone(),
                unit: def.unit.clone(),
                state,
                probe: def.probe.to_string(),
            });
        }
        statuses
    }

    fn ordered_descriptors(&self) -> Vec<&ServiceDescriptor> {
        self.registry
            .start_order()
            .iter()
            .filter_map(|name| self.registry.get(name).ok())
            .collect()
    }

    async fn start_sequence(&self, order: &[String], opts: StartOptions) -> Result<StartReport> {
        let mut report = StartReport::default();

        for name in order {
            let def = self.registry.get(name)?;
            let outcome = self.start_one(def, opts).await?;
            report.entries.push((name.clone(), outcome));
        }

        Ok(report)
    }

    async fn start_one(&self, def: &ServiceDescriptor, opts: StartOptions) -> Result<StartOutcome> {
        let name = def.name.as_str();

        if self.manager.is_active(def).await {
            if self.prober.probe(def).await {
                self.set_state(name, ServiceState::Running).await;
                info!(service = %name, "Service is already running");
                return Ok(StartOutcome::AlreadyRunning);
            }
            // Active but not yet healthy: wait on it without a second start.
            info!(service = %name, "Service is active but not ready yet");
            self.set_state(name, ServiceState::Starting).await;
        } else {
            self.set_state(name, ServiceState::Starting).await;
            info!(service = %name, unit = %def.unit, "Starting service");

            if let Err(e) = self.manager.start(def).await {
                self.set_state(name, ServiceState::Failed).await;
                error!(service = %name, error = %e, "Failed to start service");
                return Err(match e {
                    Error::ServiceStartFailed { .. } | Error::ToolUnavailable { .. } => e,
                    other => Error::ServiceStartFailed {
                        name: name.to_string(),
                        reason: other.to_string(),
                    },
                });
            }
        }

        if !opts.wait {
            return Ok(StartOutcome::Requested);
        }

        self.set_state(name, ServiceState::HealthChecking).await;
        let prober = &self.prober;
        let outcome = poll_until(self.probe_interval, def.start_timeout, move || prober.probe(def)).await;

        match outcome {
            PollOutcome::Ready { attempts, elapsed } => {
                self.set_state(name, ServiceState::Running).await;
                info!(
                    service = %name,
                    elapsed_ms = elapsed.as_millis() as u64,
                    attempts,
                    "Service is healthy"
                );
                Ok(StartOutcome::Started { attempts, elapsed })
            }
            PollOutcome::TimedOut { attempts, elapsed } => {
                self.set_state(name, ServiceState::Failed).await;
                error!(
                    service = %name,
                    elapsed_ms = elapsed.as_millis() as u64,
                    attempts,
                    "Service did not become healthy, aborting start sequence"
                );
                Err(Error::HealthCheckTimeout {
                    name: name.to_string(),
                    elapsed,
                    attempts,
                })
            }
        }
    }

    async fn stop_sequence(&self, order: &[String], opts: StopOptions) -> StopReport {
        let mut report = StopReport::default();

        for name in order {
            let def = match self.registry.get(name) {
                Ok(def) => def,
                Err(e) => {
                    report.entries.push(StopEntry {
                        name: name.clone(),
                        outcome: StopOutcome::Failed(e.to_string()),
                        elapsed: Duration::ZERO,
                        detail: None,
                    });
                    continue;
                }
            };
            report.entries.push(self.stop_one(def, opts).await);
        }

        report
    }

    async fn stop_one(&self, def: &ServiceDescriptor, opts: StopOptions) -> StopEntry {
        let name = def.name.as_str();
        let started = Instant::now();
        let forced = opts.mode == StopMode::Forced;

        if !self.manager.is_active(def).await {
            self.set_state(name, ServiceState::Stopped).await;
            return StopEntry {
                name: name.to_string(),
                outcome: StopOutcome::Stopped,
                elapsed: started.elapsed(),
                detail: Some("not running".to_string()),
            };
        }

        self.set_state(name, ServiceState::Stopping).await;
        info!(service = %name, unit = %def.unit, "Stopping service");

        let mut detail = None;
        let outcome = match self.manager.stop(def).await {
            Err(e) if forced => {
                warn!(service = %name, error = %e, "Stop action failed, escalating to hard kill");
                self.force_stop(def).await
            }
            Err(e) => {
                error!(service = %name, error = %e, "Stop action failed");
                StopOutcome::Failed(e.to_string())
            }
            Ok(()) if !opts.wait => {
                detail = Some("stop requested".to_string());
                StopOutcome::Stopped
            }
            Ok(()) => {
                let manager = &self.manager;
                let waited = poll_until(self.probe_interval, def.stop_timeout, move || async move {
                    !manager.is_active(def).await
                })
                .await;

                match waited {
                    PollOutcome::Ready { .. } => StopOutcome::Stopped,
                    PollOutcome::TimedOut { elapsed, .. } if forced => {
                        warn!(
                            service = %name,
                            elapsed_ms = elapsed.as_millis() as u64,
                            "Service did not stop in time, escalating to hard kill"
                        );
                        self.force_stop(def).await
                    }
                    PollOutcome::TimedOut { elapsed, .. } => {
                        error!(service = %name, elapsed_ms = elapsed.as_millis() as u64, "Service did not stop in time");
                        StopOutcome::Failed(format!(
                            "still active after {}s",
                            elapsed.as_secs()
                        ))
                    }
                }
            }
        };

        let state = match outcome {
            StopOutcome::Failed(_) => ServiceState::Failed,
            StopOutcome::Stopped | StopOutcome::Forced => ServiceState::Stopped,
        };
        self.set_state(name, state).await;
        if !matches!(outcome, StopOutcome::Failed(_)) {
            info!(service = %name, outcome = %outcome, "Service stopped");
        }

        StopEntry {
            name: name.to_string(),
            outcome,
            elapsed: started.elapsed(),
            detail,
        }
    }

    async fn force_stop(&self, def: &ServiceDescriptor) -> StopOutcome {
        if let Err(e) = self.manager.force_stop(def).await {
            error!(service = %def.name, error = %e, "Hard kill failed");
            return StopOutcome::Failed(e.to_string());
        }

        let manager = &self.manager;
        let gone = poll_until(self.probe_interval, FORCE_STOP_GRACE, move || async move {
            !manager.is_active(def).await
        })
        .await;

        if gone.is_ready() {
            StopOutcome::Forced
        } else {
            StopOutcome::Failed("still active after hard kill".to_string())
        }
    }
}
