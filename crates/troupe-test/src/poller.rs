//! Convergence polling.
//!
//! Integration tests observe a distributed system that settles over time.
//! [`eventually`] retries a probe until a predicate holds; [`consistently`]
//! samples a probe for a while and fails on the first sample that breaks
//! the predicate.
//!
//! ```rust,ignore
//! let state = eventually(|| async { sup.snapshot(id).map(|s| s.state).ok() })
//!     .within(Duration::from_secs(5))
//!     .until(|s| *s == Some(ProcessState::Ready))
//!     .await?;
//! ```

use std::fmt::Debug;
use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::PollError;

/// Overrides the default `eventually` timeout (humantime syntax).
pub const EVENTUALLY_TIMEOUT_ENV: &str = "TROUPE_EVENTUALLY_TIMEOUT";

/// Overrides the default `consistently` duration (humantime syntax).
pub const CONSISTENTLY_DURATION_ENV: &str = "TROUPE_CONSISTENTLY_DURATION";

const DEFAULT_EVENTUALLY_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_EVENTUALLY_INTERVAL: Duration = Duration::from_millis(500);
const DEFAULT_CONSISTENTLY_DURATION: Duration = Duration::from_secs(5);
const DEFAULT_CONSISTENTLY_INTERVAL: Duration = Duration::from_millis(100);

fn from_env(var: &str, default: Duration) -> Duration {
    match std::env::var(var) {
        Ok(text) => match humantime::parse_duration(&text) {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!(var, value = %text, error = %e, "ignoring invalid duration");
                default
            }
        },
        Err(_) => default,
    }
}

/// Default `eventually` timeout: `TROUPE_EVENTUALLY_TIMEOUT` or 60s.
#[must_use]
pub fn default_eventually_timeout() -> Duration {
    from_env(EVENTUALLY_TIMEOUT_ENV, DEFAULT_EVENTUALLY_TIMEOUT)
}

/// Default `consistently` duration: `TROUPE_CONSISTENTLY_DURATION` or 5s.
#[must_use]
pub fn default_consistently_duration() -> Duration {
    from_env(CONSISTENTLY_DURATION_ENV, DEFAULT_CONSISTENTLY_DURATION)
}

// ============================================================================
// eventually
// ============================================================================

/// Starts an `eventually` poll over `probe`.
pub fn eventually<F, Fut, T>(probe: F) -> Eventually<F>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = T>,
{
    Eventually {
        probe,
        timeout: default_eventually_timeout(),
        interval: DEFAULT_EVENTUALLY_INTERVAL,
    }
}

/// Retries a probe until a predicate holds.
#[must_use = "a poll does nothing until `until` is awaited"]
pub struct Eventually<F> {
    probe: F,
    timeout: Duration,
    interval: Duration,
}

impl<F> Eventually<F> {
    /// Sets the timeout.
    pub const fn within(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the polling interval.
    pub const fn every(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Probes until `pred` holds and returns the matching value.
    ///
    /// # Errors
    /// Returns `Timeout` with the last observed value if `pred` never held.
    pub async fn until<Fut, T, P>(mut self, mut pred: P) -> Result<T, PollError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = T>,
        T: Debug,
        P: FnMut(&T) -> bool,
    {
        let start = Instant::now();
        let deadline = start + self.timeout;
        loop {
            let value = (self.probe)().await;
            if pred(&value) {
                return Ok(value);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(PollError::Timeout {
                    waited: now - start,
                    last: format!("{value:?}"),
                });
            }
            tokio::time::sleep(self.interval.min(deadline - now)).await;
        }
    }
}

// ============================================================================
// consistently
// ============================================================================

/// Starts a `consistently` poll over `probe`.
pub fn consistently<F, Fut, T>(probe: F) -> Consistently<F>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = T>,
{
    Consistently {
        probe,
        duration: default_consistently_duration(),
        interval: DEFAULT_CONSISTENTLY_INTERVAL,
    }
}

/// Samples a probe for a fixed duration.
#[must_use = "a poll does nothing until `holds` is awaited"]
pub struct Consistently<F> {
    probe: F,
    duration: Duration,
    interval: Duration,
}

impl<F> Consistently<F> {
    /// Sets how long the predicate must hold.
    pub const fn for_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    /// Sets the sampling interval.
    pub const fn every(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Samples until the duration elapses, failing on the first violation.
    ///
    /// # Errors
    /// Returns `Violated` with the offending value.
    pub async fn holds<Fut, T, P>(mut self, mut pred: P) -> Result<(), PollError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = T>,
        T: Debug,
        P: FnMut(&T) -> bool,
    {
        let start = Instant::now();
        let deadline = start + self.duration;
        loop {
            let value = (self.probe)().await;
            if !pred(&value) {
                return Err(PollError::Violated {
                    after: start.elapsed(),
                    observed: format!("{value:?}"),
                });
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            tokio::time::sleep(self.interval.min(deadline - now)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn counter() -> (Arc<AtomicU32>, impl FnMut() -> std::future::Ready<u32>) {
        let n = Arc::new(AtomicU32::new(0));
        let probe_n = Arc::clone(&n);
        (n, move || std::future::ready(probe_n.fetch_add(1, Ordering::SeqCst) + 1))
    }

    #[tokio::test]
    async fn test_eventually_returns_matching_value() {
        let (_, probe) = counter();
        let value = eventually(probe)
            .within(Duration::from_secs(2))
            .every(Duration::from_millis(5))
            .until(|n| *n >= 3)
            .await
            .unwrap();
        assert_eq!(value, 3);
    }

    #[tokio::test]
    async fn test_eventually_times_out_with_last_value() {
        let started = std::time::Instant::now();
        let err = eventually(|| async { "starting" })
            .within(Duration::from_millis(100))
            .every(Duration::from_millis(10))
            .until(|s| *s == "ready")
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert!(err.to_string().contains("\"starting\""));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_consistently_holds() {
        let (n, probe) = counter();
        consistently(probe)
            .for_duration(Duration::from_millis(50))
            .every(Duration::from_millis(10))
            .holds(|v| *v < 1000)
            .await
            .unwrap();
        assert!(n.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_consistently_fails_on_first_violation() {
        let (n, probe) = counter();
        let err = consistently(probe)
            .for_duration(Duration::from_secs(5))
            .every(Duration::from_millis(5))
            .holds(|v| *v < 3)
            .await
            .unwrap_err();
        assert!(matches!(err, PollError::Violated { ref observed, .. } if observed == "3"));
        assert_eq!(n.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_default_durations() {
        // Only meaningful when the overrides are not set in the environment.
        if std::env::var(EVENTUALLY_TIMEOUT_ENV).is_err() {
            assert_eq!(default_eventually_timeout(), DEFAULT_EVENTUALLY_TIMEOUT);
        }
        if std::env::var(CONSISTENTLY_DURATION_ENV).is_err() {
            assert_eq!(default_consistently_duration(), DEFAULT_CONSISTENTLY_DURATION);
        }
    }

    #[test]
    fn test_from_env_falls_back_when_unset() {
        assert_eq!(
            from_env("TROUPE_TEST_UNSET_DURATION_VAR", Duration::from_secs(7)),
            Duration::from_secs(7)
        );
    }
}
