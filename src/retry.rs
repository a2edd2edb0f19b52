//! Retrying fallible setup operations.
//!
//! Setup talks to services that are still coming up: the kind API server right
//! after creation, the document store right after its pod turns ready. Calls
//! against them are wrapped in [`retry_with_backoff`], which re-invokes the
//! operation until it succeeds, attempts run out, or the overall deadline
//! passes.
//!
//! Unlike [`crate::poll`], the operation here is an action, not an observation:
//! there is no "pending" state, only success or an error worth retrying.
//!
//! A retry loop bound to a [`CancellationToken`] makes no new attempt once the
//! token is cancelled. A sleep between attempts ends as soon as cancellation is
//! observed and the last error is returned. An attempt already in flight runs
//! to completion.

use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

/// Retry policy for operations that may fail transiently
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Maximum number of attempts (0 = unlimited)
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub initial_delay: Duration,
    /// Upper bound on any single delay
    pub max_delay: Duration,
    /// Growth factor applied to the delay after each failure
    pub backoff_multiplier: f64,
    /// Scale each delay by a random factor in 0.5..1.5
    pub jitter: bool,
    /// Give up once this much time has passed since the first attempt
    pub deadline: Option<Duration>,
    /// Stop retrying once this token is cancelled
    pub cancel: Option<CancellationToken>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: true,
            deadline: None,
            cancel: None,
        }
    }
}

impl RetryConfig {
    /// Exponential backoff limited to `attempts` tries
    pub fn with_max_attempts(attempts: u32) -> Self {
        Self {
            max_attempts: attempts,
            ..Default::default()
        }
    }

    /// Constant `interval` between attempts, giving up after `deadline`
    pub fn fixed(interval: Duration, deadline: Duration) -> Self {
        Self {
            max_attempts: 0,
            initial_delay: interval,
            max_delay: interval,
            backoff_multiplier: 1.0,
            jitter: false,
            deadline: Some(deadline),
            cancel: None,
        }
    }

    /// Stop retrying when `token` is cancelled
    pub fn cancel_on(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|t| t.is_cancelled())
    }

    fn next_delay(&self, delay: Duration) -> Duration {
        Duration::from_secs_f64(
            (delay.as_secs_f64() * self.backoff_multiplier).min(self.max_delay.as_secs_f64()),
        )
    }
}

/// Run `operation` until it succeeds or the retry policy is exhausted.
///
/// Returns the last error once `max_attempts` is reached, the next sleep
/// would carry past the deadline, or the config's token is cancelled.
pub async fn retry_with_backoff<F, Fut, T, E>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let started = Instant::now();
    let mut attempt = 0u32;
    let mut delay = config.initial_delay;

    loop {
        attempt += 1;

        let e = match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => e,
        };

        if config.is_cancelled() {
            warn!(operation = %operation_name, attempt, error = %e, "cancelled, not retrying");
            return Err(e);
        }

        if config.max_attempts > 0 && attempt >= config.max_attempts {
            error!(operation = %operation_name, attempt, error = %e, "giving up after max attempts");
            return Err(e);
        }

        let sleep_for = if config.jitter {
            let factor = rand::thread_rng().gen_range(0.5..1.5);
            Duration::from_secs_f64(delay.as_secs_f64() * factor)
        } else {
            delay
        };

        if let Some(deadline) = config.deadline {
            if started.elapsed() + sleep_for > deadline {
                error!(operation = %operation_name, attempt, error = %e, ?deadline, "giving up at deadline");
                return Err(e);
            }
        }

        warn!(
            operation = %operation_name,
            attempt,
            error = %e,
            delay_ms = sleep_for.as_millis() as u64,
            "operation failed, retrying"
        );
        if let Some(token) = &config.cancel {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    warn!(operation = %operation_name, attempt, "cancelled while waiting to retry");
                    return Err(e);
                }
                _ = tokio::time::sleep(sleep_for) => {}
            }
        } else {
            tokio::time::sleep(sleep_for).await;
        }
        delay = config.next_delay(delay);
    }
}
