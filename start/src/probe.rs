//! Health probes.
//!
//! A probe is a side-effect-free readiness check with its own short timeout.
//! Probe failures of any sort, including the probe's own timeout, are
//! reported as `false`; the orchestrator retries them until the service's
//! start timeout.

use crate::error::{Error, Result};
use crate::manager::ProcessManager;
use crate::service::ServiceDescriptor;
use async_trait::async_trait;
use stackctl_config::ProbeSpec;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::trace;

/// Readiness checks.
#[async_trait]
pub trait HealthProber: Send + Sync {
    /// Whether the service is ready to serve.
    async fn probe(&self, service: &ServiceDescriptor) -> bool;
}

/// Prober that performs the descriptor's configured check against the host.
pub struct LiveProber {
    manager: Arc<dyn ProcessManager>,
    timeout: Duration,
    http: reqwest::Client,
}

impl LiveProber {
    /// Create a prober whose individual checks are bounded by `timeout`.
    pub fn new(manager: Arc<dyn ProcessManager>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::ToolUnavailable {
                tool: "http client".to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            manager,
            timeout,
            http,
        })
    }

    async fn check_tcp(&self, host: &str, port: u16) -> bool {
        matches!(
            timeout(self.timeout, TcpStream::connect((host, port))).await,
            Ok(Ok(_))
        )
    }

    async fn check_http(&self, url: &str) -> bool {
        match self.http.get(url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                trace!(url = %url, error = %e, "HTTP probe failed");
                false
            }
        }
    }

    async fn check_exec(&self, argv: &[String]) -> bool {
        let Some((program, args)) = argv.split_first() else {
            return false;
        };
        let status = tokio::process::Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status();
        matches!(timeout(self.timeout, status).await, Ok(Ok(s)) if s.success())
    }
}

#[async_trait]
impl HealthProber for LiveProber {
    async fn probe(&self, service: &ServiceDescriptor) -> bool {
        let healthy = match &service.probe {
            ProbeSpec::Tcp { host, port } => self.check_tcp(host, *port).await,
            ProbeSpec::Http { url } => self.check_http(url).await,
            ProbeSpec::Exec { argv } => self.check_exec(argv).await,
            ProbeSpec::Active => timeout(self.timeout, self.manager.is_active(service))
                .await
                .unwrap_or(false),
        };
        trace!(service = %service.name, probe = %service.probe, healthy, "Probe finished");
        healthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    struct AlwaysActive;

    #[async_trait]
    impl ProcessManager for AlwaysActive {
        async fn start(&self, _: &ServiceDescriptor) -> Result<()> {
            Ok(())
        }
        async fn stop(&self, _: &ServiceDescriptor) -> Result<()> {
            Ok(())
        }
        async fn force_stop(&self, _: &ServiceDescriptor) -> Result<()> {
            Ok(())
        }
        async fn is_active(&self, _: &ServiceDescriptor) -> bool {
            true
        }
    }

    fn prober() -> LiveProber {
        LiveProber::new(Arc::new(AlwaysActive), Duration::from_millis(500)).unwrap()
    }

    #[tokio::test]
    async fn test_tcp_probe() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let def = ServiceDescriptor::new("database", "postgresql").with_probe(ProbeSpec::Tcp {
            host: "127.0.0.1".to_string(),
            port,
        });
        assert!(prober().probe(&def).await);

        drop(listener);
        assert!(!prober().probe(&def).await);
    }

    #[tokio::test]
    async fn test_exec_probe() {
        let ok = ServiceDescriptor::new("worker", "stack-worker").with_probe(ProbeSpec::Exec {
            argv: vec!["true".to_string()],
        });
        let bad = ServiceDescriptor::new("worker", "stack-worker").with_probe(ProbeSpec::Exec {
            argv: vec!["false".to_string()],
        });
        let empty = ServiceDescriptor::new("worker", "stack-worker")
            .with_probe(ProbeSpec::Exec { argv: vec![] });

        assert!(prober().probe(&ok).await);
        assert!(!prober().probe(&bad).await);
        assert!(!prober().probe(&empty).await);
    }

    #[tokio::test]
    async fn test_active_probe_uses_manager() {
        let def = ServiceDescriptor::new("worker", "stack-worker");
        assert!(prober().probe(&def).await);
    }

    #[tokio::test]
    async fn test_http_probe_unreachable() {
        let def = ServiceDescriptor::new("app", "stack-app").with_probe(ProbeSpec::Http {
            url: "http://127.0.0.1:9/health".to_string(),
        });
        assert!(!prober().probe(&def).await);
    }
}
