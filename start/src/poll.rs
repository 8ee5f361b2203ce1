//! Bounded polling.
//!
//! Every wait in stackctl goes through [`poll_until`]: a check is run at a
//! fixed interval until it passes or the deadline elapses. Failed checks are
//! retried, never escalated.

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Result of a bounded poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// The check passed
    Ready { attempts: u32, elapsed: Duration },
    /// The deadline elapsed before the check passed
    TimedOut { attempts: u32, elapsed: Duration },
}

impl PollOutcome {
    pub fn is_ready(&self) -> bool {
        matches!(self, PollOutcome::Ready { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            PollOutcome::Ready { attempts, .. } | PollOutcome::TimedOut { attempts, .. } => {
                *attempts
            }
        }
    }

    pub fn elapsed(&self) -> Duration {
        match self {
            PollOutcome::Ready { elapsed, .. } | PollOutcome::TimedOut { elapsed, .. } => *elapsed,
        }
    }
}

/// Run `check` every `interval` until it returns true or `timeout` elapses.
///
/// The first check runs immediately. A check is only started if the next
/// interval still fits inside the timeout, so a timeout `T` and interval `I`
/// allow at most `ceil(T / I)` checks. A timed-out poll returns only once the
/// full timeout has passed.
pub async fn poll_until<F, Fut>(interval: Duration, timeout: Duration, mut check: F) -> PollOutcome
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = Instant::now();
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        if check().await {
            return PollOutcome::Ready {
                attempts,
                elapsed: start.elapsed(),
            };
        }

        let elapsed = start.elapsed();
        debug!(attempt = attempts, elapsed_ms = elapsed.as_millis() as u64, "Check not ready");

        if elapsed + interval >= timeout {
            if let Some(remaining) = timeout.checked_sub(elapsed) {
                tokio::time::sleep(remaining).await;
            }
            return PollOutcome::TimedOut {
                attempts,
                elapsed: start.elapsed(),
            };
        }

        tokio::time::sleep(interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_ready_immediately() {
        let outcome = poll_until(Duration::from_secs(2), Duration::from_secs(60), || async {
            true
        })
        .await;
        assert_eq!(
            outcome,
            PollOutcome::Ready {
                attempts: 1,
                elapsed: Duration::ZERO
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_after_retries() {
        let calls = AtomicU32::new(0);
        let outcome = poll_until(Duration::from_secs(2), Duration::from_secs(60), || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move { n >= 4 }
        })
        .await;

        assert!(outcome.is_ready());
        assert_eq!(outcome.attempts(), 4);
        assert_eq!(outcome.elapsed(), Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_probe_count() {
        let calls = AtomicU32::new(0);
        let outcome = poll_until(Duration::from_secs(2), Duration::from_secs(60), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { false }
        })
        .await;

        assert_eq!(
            outcome,
            PollOutcome::TimedOut {
                attempts: 30,
                elapsed: Duration::from_secs(60)
            }
        );
        assert_eq!(calls.load(Ordering::SeqCst), 30);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_not_multiple_of_interval() {
        let outcome = poll_until(Duration::from_secs(2), Duration::from_secs(5), || async {
            false
        })
        .await;
        // checks at 0s, 2s, 4s
        assert_eq!(outcome.attempts(), 3);
        assert_eq!(outcome.elapsed(), Duration::from_secs(5));
    }
}
