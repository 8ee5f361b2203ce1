//! Service handling around backup and restore.
//!
//! Cold operations need the services that write the affected data to be
//! stopped, and database operations need the database running. These
//! helpers put the stack into that state and record what they changed so it
//! can be put back afterwards.

use crate::confirm::Confirm;
use crate::{Error, Result};
use stackctl_start::{Orchestrator, StartOptions, StopMode, StopOptions};
use tracing::{info, warn};

/// Stop whichever of `services` are running.
///
/// Without `force` the operator is asked first and a "no" cancels the
/// operation. Returns the services that were stopped, in stop order.
pub async fn quiesce(
    orchestrator: &Orchestrator,
    services: &[String],
    force: bool,
    confirm: &dyn Confirm,
    purpose: &str,
) -> Result<Vec<String>> {
    let mut running = Vec::new();
    for name in services {
        if !orchestrator.registry().contains(name) {
            warn!(service = %name, "Ignoring unknown quiesce service");
            continue;
        }
        if orchestrator.is_active(name).await? {
            running.push(name.as_str());
        }
    }

    if running.is_empty() {
        return Ok(Vec::new());
    }

    if !force {
        let prompt = format!("Stop {} to {}?", running.join(", "), purpose);
        if !confirm.confirm(&prompt)? {
            return Err(Error::Cancelled(format!(
                "services still running: {}",
                running.join(", ")
            )));
        }
    }

    info!(services = ?running, "Stopping services");
    let report = orchestrator
        .stop_services(
            &running,
            StopOptions {
                mode: StopMode::Graceful,
                wait: true,
            },
        )
        .await?;

    if !report.success() {
        return Err(Error::ServicesRunning(report.failed()));
    }

    Ok(report.entries.into_iter().map(|e| e.name).collect())
}

/// Start services stopped by [`quiesce`] again.
///
/// Returns a warning instead of failing: the data operation already
/// succeeded and the operator can start the stack by hand.
pub async fn resume(orchestrator: &Orchestrator, stopped: &[String]) -> Option<String> {
    if stopped.is_empty() {
        return None;
    }
    let names: Vec<&str> = stopped.iter().map(String::as_str).collect();
    info!(services = ?names, "Starting services again");
    match orchestrator
        .start_services(&names, StartOptions::default())
        .await
    {
        Ok(_) => None,
        Err(e) => {
            warn!(error = %e, "Could not start services again");
            Some(format!("services were not restarted: {}", e))
        }
    }
}

/// Make sure `service` runs. Returns true if it had to be started.
pub async fn ensure_running(orchestrator: &Orchestrator, service: &str) -> Result<bool> {
    if orchestrator.is_active(service).await? {
        return Ok(false);
    }
    info!(service = %service, "Starting service for the duration of the operation");
    orchestrator
        .start_services(&[service], StartOptions::default())
        .await?;
    Ok(true)
}

/// Stop a service started by [`ensure_running`].
pub async fn stop_again(orchestrator: &Orchestrator, service: &str) -> Option<String> {
    let report = match orchestrator
        .stop_services(&[service], StopOptions::default())
        .await
    {
        Ok(report) => report,
        Err(e) => return Some(format!("{} was left running: {}", service, e)),
    };
    if report.success() {
        None
    } else {
        warn!(service = %service, "Service started for the operation did not stop");
        Some(format!("{} was left running", service))
    }
}
