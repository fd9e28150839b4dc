// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Retry and recovery decorators shared by the transfer and deletion
//! pipelines (C8): exponential backoff and a circuit breaker that trips
//! after sustained failures and sheds load until a probe succeeds.

use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;

/// Classifies an error as worth retrying or not. Implemented by each
/// component's own error enum so the generic retry wrapper never has to
/// guess.
pub trait Retriable {
    fn is_transient(&self) -> bool;
}

/// Exponential backoff, capped, matching the transfer engines' own
/// schedule: `min(2^attempt, cap)` seconds.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    cap_secs: u64,
}

impl Backoff {
    pub fn new(cap_secs: u64) -> Self {
        Self { cap_secs }
    }

    /// Delay before the `attempt`-th retry (0-indexed: the first retry is
    /// `attempt == 0`).
    pub fn delay(&self, attempt: u32) -> Duration {
        let secs = 2u64.saturating_pow(attempt).min(self.cap_secs);
        Duration::from_secs(secs)
    }
}

impl Default for Backoff {
    /// 1s, 2s, 4s, ..., capped at 60s, matching the transfer engines.
    fn default() -> Self {
        Self::new(60)
    }
}

/// Circuit breaker state (§4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<std::time::Instant>,
}

/// Trips to `Open` after `failure_threshold` consecutive failures, then
/// shifts to `HalfOpen` after `reset_after` to let a single probe through.
/// A probe success closes the circuit; a probe failure reopens it.
pub struct CircuitBreaker {
    failure_threshold: u32,
    reset_after: Duration,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, reset_after: Duration) -> Self {
        Self {
            failure_threshold,
            reset_after,
            inner: Mutex::new(Inner { state: CircuitState::Closed, consecutive_failures: 0, opened_at: None }),
        }
    }

    /// Whether a call should be attempted right now. Transitions `Open` to
    /// `HalfOpen` as a side effect once `reset_after` has elapsed.
    pub fn allow(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed = inner.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= self.reset_after {
                    inner.state = CircuitState::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(std::time::Instant::now());
            }
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(std::time::Instant::now());
                }
            }
            CircuitState::Open => {}
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }
}

/// Outcome of a [`CircuitBreaker::guard`] call: either the circuit refused
/// the call outright, or the wrapped call ran and (maybe) failed.
#[derive(Debug, thiserror::Error)]
pub enum CircuitError<E> {
    #[error("circuit open for {component}")]
    Open { component: String },
    #[error(transparent)]
    Inner(E),
}

impl CircuitBreaker {
    /// Run `f` iff the circuit allows it, recording the outcome.
    pub async fn guard<T, E, F, Fut>(&self, component: &str, f: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.allow() {
            return Err(CircuitError::Open { component: component.to_string() });
        }
        match f().await {
            Ok(v) => {
                self.record_success();
                Ok(v)
            }
            Err(err) => {
                self.record_failure();
                Err(CircuitError::Inner(err))
            }
        }
    }
}

/// Parameters for the generic exponential-backoff retry wrapper (§4.8).
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub component: String,
    pub log_errors: bool,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, initial_delay: Duration, component: impl Into<String>) -> Self {
        Self { max_retries, initial_delay, component: component.into(), log_errors: true }
    }

    /// Delay before the `attempt`-th retry (1-indexed, per §4.8:
    /// `initial_delay × 2^(attempt-1)`).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.initial_delay * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}

/// Run `f` up to `policy.max_retries + 1` times, sleeping
/// `policy.delay_for(attempt)` between attempts, retrying only while the
/// error reports itself as transient. On final failure returns the last
/// error; the caller is responsible for logging it to the error log at
/// Medium severity per §4.8 (this module has no C7 dependency).
pub async fn retry_with_backoff<T, E, F, Fut>(policy: &RetryPolicy, mut f: F) -> Result<T, E>
where
    E: Retriable,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0u32;
    loop {
        match f().await {
            Ok(v) => return Ok(v),
            Err(err) if attempt < policy.max_retries && err.is_transient() => {
                attempt += 1;
                if policy.log_errors {
                    tracing::warn!(
                        component = %policy.component,
                        attempt,
                        "retrying after transient error"
                    );
                }
                tokio::time::sleep(policy.delay_for(attempt)).await;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Wrap a call; on failure return `fallback` instead of propagating,
/// unless `critical` is set (in which case the error still propagates).
/// This is the "graceful degradation" decorator from §4.8; callers treat
/// its `Ok(fallback)` result as a signal to log Medium-severity entry
/// into, and Info-severity recovery out of, a degraded state.
pub async fn with_fallback<T, E, F, Fut>(critical: bool, fallback: T, f: F) -> Result<T, E>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    match f().await {
        Ok(v) => Ok(v),
        Err(err) if critical => Err(err),
        Err(_) => Ok(fallback),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_matches_doubling_schedule_capped() {
        let b = Backoff::default();
        assert_eq!(b.delay(0), Duration::from_secs(1));
        assert_eq!(b.delay(1), Duration::from_secs(2));
        assert_eq!(b.delay(5), Duration::from_secs(32));
        assert_eq!(b.delay(10), Duration::from_secs(60), "capped at 60s");
    }

    #[test]
    fn breaker_opens_after_threshold_consecutive_failures() {
        let cb = CircuitBreaker::new(3, Duration::from_secs(30));
        assert!(cb.allow());
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.allow());
    }

    #[test]
    fn breaker_closes_on_half_open_probe_success() {
        let cb = CircuitBreaker::new(1, Duration::from_millis(0));
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        // reset_after is zero, so the next allow() flips to HalfOpen.
        assert!(cb.allow());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn breaker_reopens_on_half_open_probe_failure() {
        let cb = CircuitBreaker::new(1, Duration::from_millis(0));
        cb.record_failure();
        assert!(cb.allow());
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[derive(Debug)]
    struct FlakyError(bool);

    impl Retriable for FlakyError {
        fn is_transient(&self) -> bool {
            self.0
        }
    }

    #[tokio::test]
    async fn retry_with_backoff_stops_on_success() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1), "test");
        let attempts = std::sync::atomic::AtomicU32::new(0);
        let result: Result<u32, FlakyError> = retry_with_backoff(&policy, || {
            let n = attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            async move { if n < 2 { Err(FlakyError(true)) } else { Ok(n) } }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
    }

    #[tokio::test]
    async fn retry_with_backoff_gives_up_on_non_transient() {
        let policy = RetryPolicy::new(5, Duration::from_millis(1), "test");
        let result: Result<u32, FlakyError> =
            retry_with_backoff(&policy, || async { Err(FlakyError(false)) }).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn retry_with_backoff_exhausts_after_max_retries() {
        let policy = RetryPolicy::new(2, Duration::from_millis(1), "test");
        let attempts = std::sync::atomic::AtomicU32::new(0);
        let result: Result<u32, FlakyError> = retry_with_backoff(&policy, || {
            attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            async { Err(FlakyError(true)) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 3, "initial attempt + 2 retries");
    }

    #[tokio::test]
    async fn circuit_guard_refuses_when_open() {
        let cb = CircuitBreaker::new(1, Duration::from_secs(60));
        cb.record_failure();
        let result: Result<(), CircuitError<FlakyError>> =
            cb.guard("engine", || async { Ok(()) }).await;
        assert!(matches!(result, Err(CircuitError::Open { .. })));
    }

    #[tokio::test]
    async fn with_fallback_returns_fallback_unless_critical() {
        let result: Result<u32, FlakyError> = with_fallback(false, 7, || async { Err(FlakyError(true)) }).await;
        assert_eq!(result.unwrap(), 7);

        let result: Result<u32, FlakyError> = with_fallback(true, 7, || async { Err(FlakyError(true)) }).await;
        assert!(result.is_err());
    }
}
