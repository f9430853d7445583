//! Bounded polling and retry helpers shared by the drivers.
//!
//! Every loop here is bounded by a [`RetryPolicy`] and observes a
//! [`CancellationToken`], so an interrupted run never blocks on a slow
//! backend.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// How many attempts to make and how long to pause between them.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, at least one is always made.
    pub attempts: u32,
    /// Pause between attempts.
    pub interval: Duration,
}

impl RetryPolicy {
    /// Creates a policy.
    #[must_use]
    pub const fn new(attempts: u32, interval: Duration) -> Self {
        Self { attempts, interval }
    }

    /// Policy sized so that `attempts * interval` covers `timeout`.
    #[must_use]
    pub fn covering(timeout: Duration, interval: Duration) -> Self {
        let interval_ms = interval.as_millis().max(1);
        let attempts = timeout.as_millis().div_ceil(interval_ms);
        Self {
            attempts: u32::try_from(attempts).unwrap_or(u32::MAX).max(1),
            interval,
        }
    }
}

/// Why a bounded wait ended without success.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum WaitError<E> {
    /// Every attempt was used up.
    #[error("gave up after {attempts} attempts")]
    Exhausted {
        /// Attempts that were made.
        attempts: u32,
    },
    /// The cancellation token fired.
    #[error("wait cancelled")]
    Cancelled,
    /// A non-retryable failure ended the wait early.
    #[error(transparent)]
    Fatal(E),
}

/// Sleeps for `duration` unless `cancel` fires first.
///
/// Returns `false` when the pause was cut short by cancellation.
pub async fn pause(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        () = cancel.cancelled() => false,
        () = tokio::time::sleep(duration) => true,
    }
}

/// Polls `probe` until it yields `Some`, up to `policy.attempts` times.
///
/// # Errors
///
/// Returns [`WaitError::Fatal`] when the probe fails,
/// [`WaitError::Cancelled`] when `cancel` fires, and
/// [`WaitError::Exhausted`] when no attempt produced a value.
pub async fn poll_until<T, E, F, Fut>(
    policy: RetryPolicy,
    cancel: &CancellationToken,
    mut probe: F,
) -> Result<T, WaitError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
{
    let attempts = policy.attempts.max(1);
    for attempt in 1..=attempts {
        if cancel.is_cancelled() {
            return Err(WaitError::Cancelled);
        }
        if let Some(value) = probe().await.map_err(WaitError::Fatal)? {
            return Ok(value);
        }
        debug!(attempt, attempts, "condition not met yet");
        if attempt < attempts && !pause(policy.interval, cancel).await {
            return Err(WaitError::Cancelled);
        }
    }
    Err(WaitError::Exhausted { attempts })
}

/// Retries `operation` while `is_retryable` accepts its error.
///
/// # Errors
///
/// Returns [`WaitError::Fatal`] for the first non-retryable error,
/// [`WaitError::Cancelled`] when `cancel` fires, and
/// [`WaitError::Exhausted`] when every attempt failed with a retryable error.
pub async fn retry<T, E, F, Fut, P>(
    policy: RetryPolicy,
    cancel: &CancellationToken,
    mut operation: F,
    is_retryable: P,
) -> Result<T, WaitError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
{
    let attempts = policy.attempts.max(1);
    for attempt in 1..=attempts {
        if cancel.is_cancelled() {
            return Err(WaitError::Cancelled);
        }
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if is_retryable(&err) => {
                debug!(attempt, attempts, "retryable failure");
            }
            Err(err) => return Err(WaitError::Fatal(err)),
        }
        if attempt < attempts && !pause(policy.interval, cancel).await {
            return Err(WaitError::Cancelled);
        }
    }
    Err(WaitError::Exhausted { attempts })
}
