//! Bounded waiting for eventually-true conditions
//!
//! Every "wait for X" in the pipeline goes through [`wait_until`]: the check
//! runs, and while it reports "not yet" the poller sleeps for the interval
//! and tries again until the timeout is spent. Running out of time is an
//! ordinary outcome, not an error.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Interval and timeout for one kind of wait
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollBudget {
    pub timeout_secs: u64,
    pub interval_secs: u64,
}

impl PollBudget {
    pub const fn new(timeout_secs: u64, interval_secs: u64) -> Self {
        Self {
            timeout_secs,
            interval_secs,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// How a wait ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T> {
    /// The check produced a value
    Ready(T),
    /// The budget ran out first
    TimedOut { attempts: u32, waited: Duration },
}

impl<T> PollOutcome<T> {
    pub fn is_ready(&self) -> bool {
        matches!(self, PollOutcome::Ready(_))
    }
}

/// Repeat `check` until it yields a value or `timeout` elapses
///
/// `Ok(None)` from the check means "not ready yet"; `Err` aborts the wait
/// immediately. A check that hangs is cut off at the remaining budget.
pub async fn wait_until<T, E, F, Fut>(
    timeout: Duration,
    interval: Duration,
    what: &str,
    mut check: F,
) -> Result<PollOutcome<T>, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
{
    let interval = interval.max(Duration::from_millis(1));
    let start = Instant::now();
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        let remaining = timeout.saturating_sub(start.elapsed());

        match tokio::time::timeout(remaining, check()).await {
            Ok(Ok(Some(value))) => {
                debug!(what, attempts, "ready");
                return Ok(PollOutcome::Ready(value));
            }
            Ok(Ok(None)) => debug!(what, attempts, "not ready yet"),
            Ok(Err(e)) => return Err(e),
            Err(_) => debug!(what, attempts, "check exceeded remaining budget"),
        }

        let elapsed = start.elapsed();
        if elapsed >= timeout {
            return Ok(PollOutcome::TimedOut {
                attempts,
                waited: elapsed,
            });
        }
        tokio::time::sleep(interval.min(timeout - elapsed)).await;
    }
}

/// [`wait_until`] for a plain yes/no condition
pub async fn wait_for<E, F, Fut>(
    budget: PollBudget,
    what: &str,
    mut condition: F,
) -> Result<PollOutcome<()>, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, E>>,
{
    wait_until(budget.timeout(), budget.interval(), what, || {
        let pending = condition();
        async move { pending.await.map(|ready| ready.then_some(())) }
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_ready_on_first_attempt() {
        let outcome: Result<_, ()> =
            wait_until(Duration::from_secs(10), Duration::from_secs(1), "x", || async {
                Ok(Some(42))
            })
            .await;
        assert_eq!(outcome, Ok(PollOutcome::Ready(42)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_after_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let start = Instant::now();

        let outcome: Result<_, ()> = wait_for(PollBudget::new(300, 10), "ssh", move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move { Ok(n >= 3) }
        })
        .await;

        assert_eq!(outcome, Ok(PollOutcome::Ready(())));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(start.elapsed(), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_false_times_out_at_budget() {
        for (timeout, interval) in [(300, 10), (1800, 30), (7, 3), (5, 60), (0, 1)] {
            let start = Instant::now();
            let outcome: Result<_, ()> =
                wait_for(PollBudget::new(timeout, interval), "never", || async { Ok(false) })
                    .await;

            let elapsed = start.elapsed();
            match outcome {
                Ok(PollOutcome::TimedOut { waited, attempts }) => {
                    assert!(waited >= Duration::from_secs(timeout));
                    assert!(attempts >= 1);
                }
                other => panic!("expected timeout, got {:?}", other),
            }
            assert!(elapsed >= Duration::from_secs(timeout));
            assert!(elapsed <= Duration::from_secs(timeout) + Duration::from_secs(interval));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_aborts_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let outcome = wait_for(PollBudget::new(600, 15), "droplet", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err::<bool, _>("401 unauthorized") }
        })
        .await;

        assert_eq!(outcome, Err("401 unauthorized"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_check_is_bounded() {
        let start = Instant::now();
        let outcome: Result<PollOutcome<()>, ()> =
            wait_until(Duration::from_secs(60), Duration::from_secs(5), "hang", || {
                std::future::pending::<Result<Option<()>, ()>>()
            })
            .await;

        assert!(matches!(outcome, Ok(PollOutcome::TimedOut { .. })));
        assert_eq!(start.elapsed(), Duration::from_secs(60));
    }
}
