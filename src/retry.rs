// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Retry and polling helpers.
//!
//! Two different kinds of waiting happen in the pipeline:
//!
//! - **Transient API failures** (HTTP 429, 5xx, connection errors) are retried with
//!   exponential backoff by [`retry_api_call`]. Permanent errors fail immediately.
//! - **Eventual conditions** (cluster healthy, endpoint ready, load balancer provisioned,
//!   CoreDNS reloaded) are polled at a fixed interval for a bounded number of attempts by
//!   [`poll_until`].

use crate::errors::ChainError;
use rand::Rng;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, error, trace, warn};

/// Maximum total time to spend retrying (5 minutes)
const MAX_ELAPSED_TIME_SECS: u64 = 300;

/// Initial retry interval (100ms)
const INITIAL_INTERVAL_MILLIS: u64 = 100;

/// Maximum interval between retries (30 seconds)
const MAX_INTERVAL_SECS: u64 = 30;

/// Backoff multiplier (exponential growth factor)
const BACKOFF_MULTIPLIER: f64 = 2.0;

/// Randomization factor (±10%)
const RANDOMIZATION_FACTOR: f64 = 0.1;

/// Exponential backoff with jitter.
pub struct ExponentialBackoff {
    /// Current interval duration
    pub current_interval: Duration,
    /// Initial interval duration
    pub initial_interval: Duration,
    /// Maximum interval duration
    pub max_interval: Duration,
    /// Maximum total elapsed time
    pub max_elapsed_time: Option<Duration>,
    /// Backoff multiplier (typically 2.0 for doubling)
    pub multiplier: f64,
    /// Randomization factor (e.g., 0.1 for ±10%)
    pub randomization_factor: f64,
    start_time: Instant,
}

impl ExponentialBackoff {
    fn new(
        initial_interval: Duration,
        max_interval: Duration,
        max_elapsed_time: Option<Duration>,
        multiplier: f64,
        randomization_factor: f64,
    ) -> Self {
        Self {
            current_interval: initial_interval,
            initial_interval,
            max_interval,
            max_elapsed_time,
            multiplier,
            randomization_factor,
            start_time: Instant::now(),
        }
    }

    /// Get the next backoff interval, or None if max elapsed time exceeded.
    pub fn next_backoff(&mut self) -> Option<Duration> {
        if let Some(max_elapsed) = self.max_elapsed_time {
            if self.start_time.elapsed() >= max_elapsed {
                return None;
            }
        }

        let interval = self.current_interval;
        let jittered = self.apply_jitter(interval);

        let next = interval.as_secs_f64() * self.multiplier;
        self.current_interval = Duration::from_secs_f64(next).min(self.max_interval);

        Some(jittered)
    }

    fn apply_jitter(&self, interval: Duration) -> Duration {
        if self.randomization_factor == 0.0 {
            return interval;
        }

        let secs = interval.as_secs_f64();
        let delta = secs * self.randomization_factor;

        let mut rng = rand::thread_rng();
        let jittered = rng.gen_range((secs - delta)..=(secs + delta));

        Duration::from_secs_f64(jittered.max(0.0))
    }
}

/// Default exponential backoff for Kubernetes API retries.
///
/// 100ms initial interval doubling up to 30s, ±10% jitter, giving up after 5 minutes.
#[must_use]
pub fn default_backoff() -> ExponentialBackoff {
    ExponentialBackoff::new(
        Duration::from_millis(INITIAL_INTERVAL_MILLIS),
        Duration::from_secs(MAX_INTERVAL_SECS),
        Some(Duration::from_secs(MAX_ELAPSED_TIME_SECS)),
        BACKOFF_MULTIPLIER,
        RANDOMIZATION_FACTOR,
    )
}

/// Retry a Kubernetes API call with exponential backoff.
///
/// Retries on transient errors (HTTP 429, 5xx, connection failures) and fails
/// immediately on anything else.
///
/// # Errors
///
/// Returns the last `kube::Error` when the error is not retryable or the backoff is
/// exhausted.
pub async fn retry_api_call<T, F, Fut>(
    mut operation: F,
    operation_name: &str,
) -> Result<T, kube::Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, kube::Error>>,
{
    let mut backoff = default_backoff();
    let start_time = Instant::now();
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(
                        operation = operation_name,
                        attempt = attempt,
                        elapsed = ?start_time.elapsed(),
                        "Kubernetes API call succeeded after retries"
                    );
                }
                return Ok(value);
            }
            Err(e) => {
                if !is_retryable_error(&e) {
                    debug!(
                        operation = operation_name,
                        error = %e,
                        "Non-retryable Kubernetes API error"
                    );
                    return Err(e);
                }

                if let Some(duration) = backoff.next_backoff() {
                    warn!(
                        operation = operation_name,
                        attempt = attempt,
                        retry_after = ?duration,
                        error = %e,
                        "Retryable Kubernetes API error, will retry"
                    );
                    tokio::time::sleep(duration).await;
                } else {
                    error!(
                        operation = operation_name,
                        attempt = attempt,
                        elapsed = ?start_time.elapsed(),
                        error = %e,
                        "Backoff exhausted, giving up"
                    );
                    return Err(e);
                }
            }
        }
    }
}

/// Whether a Kubernetes error is transient.
///
/// HTTP 429 and 5xx responses and service (connection) errors are retryable; every other
/// error, including all other 4xx responses, is not.
pub(crate) fn is_retryable_error(err: &kube::Error) -> bool {
    match err {
        kube::Error::Api(api_err) => {
            api_err.code == 429 || (api_err.code >= 500 && api_err.code < 600)
        }
        kube::Error::Service(_) => true,
        _ => false,
    }
}

/// Fixed-interval polling bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Delay between attempts
    pub interval: Duration,
    /// Maximum number of checks (at least 1)
    pub max_attempts: u32,
}

impl PollPolicy {
    #[must_use]
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts: max_attempts.max(1),
        }
    }

    /// A policy that checks immediately and then every `interval` until `timeout` has
    /// been covered.
    #[must_use]
    pub fn within(timeout: Duration, interval: Duration) -> Self {
        let attempts = if interval.is_zero() {
            1
        } else {
            timeout.as_millis() / interval.as_millis().max(1) + 1
        };
        Self::new(interval, u32::try_from(attempts).unwrap_or(u32::MAX))
    }

    /// Upper bound of the time spent sleeping between checks.
    #[must_use]
    pub fn budget(&self) -> Duration {
        self.interval * self.max_attempts.saturating_sub(1)
    }
}

/// Result of one poll check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Check<T, P> {
    /// Condition met
    Ready(T),
    /// Not yet; carries the latest observation
    Pending(P),
}

/// Result of [`poll_until`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollResult<T, P> {
    /// Condition met on attempt `attempts`
    Ready { value: T, attempts: u32 },
    /// Bound exhausted; `last` is the final observation
    Exhausted { last: P, attempts: u32 },
}

/// Poll `check` until it reports [`Check::Ready`] or the policy's attempts are used up.
///
/// # Errors
///
/// An error returned by `check` aborts polling and is returned as-is.
pub async fn poll_until<T, P, F, Fut>(
    policy: PollPolicy,
    what: &str,
    mut check: F,
) -> Result<PollResult<T, P>, ChainError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Check<T, P>, ChainError>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match check(attempt).await? {
            Check::Ready(value) => {
                return Ok(PollResult::Ready {
                    value,
                    attempts: attempt,
                })
            }
            Check::Pending(last) => {
                if attempt >= policy.max_attempts {
                    debug!(what, attempts = attempt, "Polling bound exhausted");
                    return Ok(PollResult::Exhausted {
                        last,
                        attempts: attempt,
                    });
                }
                trace!(what, attempt, "Condition not met yet, polling again");
            }
        }
        tokio::time::sleep(policy.interval).await;
    }
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod retry_tests;
