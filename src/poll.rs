//! Condition polling with timeout and cancellation.
//!
//! Every wait in the harness (deployment readiness, table status, converged
//! workloads) goes through [`poll_until`]: invoke a check, sleep, repeat, until
//! the check is satisfied, fails terminally, the deadline passes, or the caller
//! cancels.
//!
//! A check returns `Result<Outcome<T>, E>`:
//!
//! - `Ok(Outcome::Satisfied(value))` stops polling and returns `value`
//! - `Ok(Outcome::Pending)` keeps polling
//! - `Ok(Outcome::Failed(msg))` stops with [`PollError::Failed`]
//! - `Err(e)` is treated as transient (a dropped connection, a 404 before the
//!   object exists) and keeps polling; the last such error is reported if the
//!   poll times out
//!
//! # Example
//!
//! ```ignore
//! use maestro_e2e::poll::{poll_until, Outcome, PollConfig};
//!
//! let deployment = poll_until(
//!     &PollConfig::with_timeout(Duration::from_secs(120)),
//!     "deployment nginx1 to have 1 replica",
//!     || async { Ok::<_, kube::Error>(Outcome::Pending) },
//! )
//! .await?;
//! ```

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Default time between attempts
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Default total time to keep polling
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(120);

/// Stand-in deadline for timeouts too large to represent, roughly 30 years
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// Result of a single check attempt
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T = ()> {
    /// Not yet satisfied, poll again
    Pending,
    /// Satisfied, stop and return the value
    Satisfied(T),
    /// Terminal failure, stop with this message
    Failed(String),
}

impl From<bool> for Outcome<()> {
    fn from(done: bool) -> Self {
        if done {
            Outcome::Satisfied(())
        } else {
            Outcome::Pending
        }
    }
}

/// Timing and cancellation for a poll
#[derive(Clone, Debug)]
pub struct PollConfig {
    /// Sleep between attempts
    pub interval: Duration,
    /// Maximum wall-clock time to keep polling
    pub timeout: Duration,
    /// Optional external cancellation
    pub cancel: Option<CancellationToken>,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            timeout: DEFAULT_POLL_TIMEOUT,
            cancel: None,
        }
    }
}

impl PollConfig {
    /// Create a config with the given timeout and the default interval
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Default::default()
        }
    }

    /// Set the interval between attempts
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Abort the poll when `token` is cancelled
    pub fn cancel_on(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|t| t.is_cancelled())
    }
}

/// Why a poll stopped without being satisfied
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PollError {
    /// The deadline passed before the check was satisfied
    #[error("timed out after {timeout:?} waiting for {description} ({attempts} attempts){}", last_error_suffix(.last_error))]
    Timeout {
        /// What was being waited for
        description: String,
        /// Configured timeout
        timeout: Duration,
        /// Number of check invocations
        attempts: u32,
        /// Last transient error returned by the check
        last_error: Option<String>,
    },

    /// The check reported a terminal failure
    #[error("{description} failed: {message}")]
    Failed {
        /// What was being waited for
        description: String,
        /// Failure reported by the check
        message: String,
    },

    /// The surrounding context was cancelled
    #[error("cancelled while waiting for {description} ({attempts} attempts)")]
    Cancelled {
        /// What was being waited for
        description: String,
        /// Number of check invocations before cancellation was observed
        attempts: u32,
    },
}

fn last_error_suffix(last_error: &Option<String>) -> String {
    last_error
        .as_deref()
        .map(|e| format!(", last error: {e}"))
        .unwrap_or_default()
}

/// `at + offset`, saturating to a far-future instant instead of overflowing
fn saturating_deadline(at: Instant, offset: Duration) -> Instant {
    at.checked_add(offset)
        .or_else(|| Instant::now().checked_add(FAR_FUTURE))
        .unwrap_or(at)
}

async fn cancelled(token: Option<&CancellationToken>) {
    match token {
        Some(token) => token.cancelled().await,
        None => std::future::pending().await,
    }
}

/// Poll `check` until it is satisfied, fails, times out, or is cancelled.
///
/// The first attempt runs immediately; later attempts run `interval` apart.
/// Nothing waits past `timeout + interval`: a check still in flight at that
/// point is dropped and the poll times out. Cancellation is observed during
/// checks and sleeps and takes precedence over the timeout.
pub async fn poll_until<T, E, F, Fut>(
    config: &PollConfig,
    description: &str,
    mut check: F,
) -> Result<T, PollError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Outcome<T>, E>>,
    E: Display,
{
    let deadline = saturating_deadline(Instant::now(), config.timeout);
    let hard_deadline = saturating_deadline(deadline, config.interval);
    let mut attempts = 0u32;
    let mut last_error: Option<String> = None;

    let cancelled_err = |attempts| PollError::Cancelled {
        description: description.to_string(),
        attempts,
    };
    let timeout_err = |attempts, last_error| PollError::Timeout {
        description: description.to_string(),
        timeout: config.timeout,
        attempts,
        last_error,
    };

    loop {
        if config.is_cancelled() {
            return Err(cancelled_err(attempts));
        }

        attempts += 1;
        let result = tokio::select! {
            biased;
            _ = cancelled(config.cancel.as_ref()) => return Err(cancelled_err(attempts)),
            result = check() => result,
            _ = sleep_until(hard_deadline) => return Err(timeout_err(attempts, last_error)),
        };

        match result {
            Ok(Outcome::Satisfied(value)) => {
                debug!(condition = %description, attempts, "condition satisfied");
                return Ok(value);
            }
            Ok(Outcome::Failed(message)) => {
                return Err(PollError::Failed {
                    description: description.to_string(),
                    message,
                });
            }
            Ok(Outcome::Pending) => {
                trace!(condition = %description, attempts, "condition not yet met");
            }
            Err(e) => {
                trace!(condition = %description, attempts, error = %e, "check failed, retrying");
                last_error = Some(e.to_string());
            }
        }

        if Instant::now() >= deadline {
            return Err(timeout_err(attempts, last_error));
        }

        tokio::select! {
            biased;
            _ = cancelled(config.cancel.as_ref()) => return Err(cancelled_err(attempts)),
            _ = sleep(config.interval) => {}
        }
    }
}
