//! Bounded retry with a fixed pause.

use std::future::Future;
use std::time::Duration;

use crate::DriverError;

/// Default number of invocations.
pub const DEFAULT_ATTEMPTS: u32 = 10;

/// Default pause between invocations.
pub const DEFAULT_PAUSE: Duration = Duration::from_secs(5);

/// Re-runs an operation while it fails with a retryable error.
///
/// `attempts` counts total invocations: an operation that always fails
/// transiently runs `attempts` times, sleeps `attempts - 1` times, and the
/// last error is returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Retrier {
    attempts: u32,
    pause: Duration,
}

impl Default for Retrier {
    fn default() -> Self {
        Self::new(DEFAULT_ATTEMPTS, DEFAULT_PAUSE)
    }
}

impl Retrier {
    /// Creates a retrier; `attempts` below one is treated as one.
    #[must_use]
    pub fn new(attempts: u32, pause: Duration) -> Self {
        Self { attempts: attempts.max(1), pause }
    }

    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Retries errors for which [`DriverError::is_transient`] holds.
    ///
    /// # Errors
    /// Returns the first non-transient error, or the last transient one once
    /// attempts are exhausted.
    pub async fn retry<T, F, Fut>(&self, op: F) -> Result<T, DriverError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, DriverError>>,
    {
        self.retry_if(DriverError::is_transient, op).await
    }

    /// Retries errors matching `retryable`.
    ///
    /// # Errors
    /// Returns the first error `retryable` rejects, or the last error once
    /// attempts are exhausted.
    pub async fn retry_if<T, P, F, Fut>(&self, retryable: P, mut op: F) -> Result<T, DriverError>
    where
        P: Fn(&DriverError) -> bool,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, DriverError>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.attempts && retryable(&e) => {
                    tracing::info!(
                        attempt,
                        remaining = self.attempts - attempt,
                        error = %e,
                        "retrying after retryable error"
                    );
                    tokio::time::sleep(self.pause).await;
                    attempt += 1;
                }
                Err(e) => {
                    if attempt > 1 {
                        tracing::info!(attempts = attempt, error = %e, "retry failed");
                    }
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn not_ready() -> DriverError {
        DriverError::NotReady { command: "showvminfo".into(), output: String::new() }
    }

    fn quick(attempts: u32) -> Retrier {
        Retrier::new(attempts, Duration::ZERO)
    }

    #[tokio::test]
    async fn recovers_after_n_minus_one_transient_failures() {
        let calls = &AtomicU32::new(0);
        let result = quick(10)
            .retry(move || async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 4 { Err(not_ready()) } else { Ok(n) }
            })
            .await;
        assert_eq!(result.expect("should succeed on 4th call"), 4);
        assert_eq!(calls.load(Ordering::SeqCst), 4, "three retries after three failures");
    }

    #[tokio::test]
    async fn always_transient_runs_exactly_attempts_times() {
        let calls = &AtomicU32::new(0);
        let result: Result<(), _> = quick(10)
            .retry(move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(not_ready())
            })
            .await;
        assert!(matches!(result, Err(DriverError::NotReady { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn non_transient_errors_are_not_retried() {
        let calls = &AtomicU32::new(0);
        let result: Result<(), _> = quick(10)
            .retry(move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(DriverError::BrokenInstallation { command: "list vms".into() })
            })
            .await;
        assert!(matches!(result, Err(DriverError::BrokenInstallation { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retry_if_uses_custom_predicate() {
        let calls = &AtomicU32::new(0);
        let result = quick(3)
            .retry_if(DriverError::is_import_retryable, move || async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n == 1 {
                    Err(DriverError::ImportNameMissing { path: "image.ovf".into() })
                } else {
                    Ok("vm")
                }
            })
            .await;
        assert_eq!(result.expect("second call succeeds"), "vm");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn defaults_match_hypervisor_backoff() {
        let r = Retrier::default();
        assert_eq!(r.attempts(), 10);
        assert_eq!(r, Retrier::new(10, Duration::from_secs(5)));
        assert_eq!(Retrier::new(0, Duration::ZERO).attempts(), 1);
    }
}
