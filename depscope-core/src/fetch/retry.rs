// Bounded retry with exponential backoff and an optional hard deadline.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::FetchSection;
use crate::error::FetchError;

/// How often and how patiently a unit is retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub multiplier: u32,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(1),
            multiplier: 2,
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn from_section(section: &FetchSection) -> Self {
        Self {
            max_attempts: section.max_attempts.max(1),
            initial_backoff: Duration::from_millis(section.initial_backoff_ms),
            multiplier: 2,
            max_backoff: Duration::from_millis(section.max_backoff_ms),
        }
    }

    /// Delay before attempt `attempt + 1`, where `attempt` is 1-based.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let mut delay = self.initial_backoff;
        for _ in 1..attempt {
            delay = delay.saturating_mul(self.multiplier).min(self.max_backoff);
        }
        delay.min(self.max_backoff)
    }
}

/// A unit that exhausted its attempts or ran into the deadline.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{last_error} (after {attempts} attempt(s))")]
pub struct RetryError {
    /// Attempts actually made; 0 when the deadline passed before the first.
    pub attempts: u32,
    pub last_error: FetchError,
    pub deadline_hit: bool,
}

/// Run `op` until it succeeds, fails permanently, runs out of attempts, or
/// the deadline passes. `op` receives the 1-based attempt number.
///
/// The deadline is checked before each attempt and before each backoff. An
/// attempt already in flight when it passes runs to completion.
pub async fn retry<T, F, Fut>(
    policy: &RetryPolicy,
    deadline: Option<Instant>,
    mut op: F,
) -> Result<T, RetryError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    let past_deadline = |at: Instant| deadline.is_some_and(|d| at >= d);
    let mut attempt = 0;

    loop {
        if past_deadline(Instant::now()) {
            return Err(RetryError {
                attempts: attempt,
                last_error: FetchError::DeadlineExceeded,
                deadline_hit: true,
            });
        }
        attempt += 1;

        let err = match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if !err.is_transient() {
            debug!(attempt, error = %err, "Permanent fetch failure");
            return Err(RetryError {
                attempts: attempt,
                last_error: err,
                deadline_hit: false,
            });
        }
        if attempt >= policy.max_attempts {
            warn!(attempt, error = %err, "Retries exhausted");
            return Err(RetryError {
                attempts: attempt,
                last_error: err,
                deadline_hit: false,
            });
        }

        let wait = policy.backoff(attempt);
        if past_deadline(Instant::now() + wait) {
            warn!(attempt, error = %err, "Deadline reached before next attempt");
            return Err(RetryError {
                attempts: attempt,
                last_error: err,
                deadline_hit: true,
            });
        }
        warn!(
            attempt,
            error = %err,
            wait_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
            "Transient fetch failure, backing off"
        );
        tokio::time::sleep(wait).await;
    }
}
