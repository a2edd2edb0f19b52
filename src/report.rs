//! Run-all-and-report scenario execution.
//!
//! A failing scenario does not stop the run. Each result is recorded with its
//! duration, scenarios whose prerequisite failed are recorded as skipped, and
//! [`Suite::finish`] logs a summary and fails if anything failed.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Mutex;
use std::time::Duration;

use futures::FutureExt;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::{Error, Result};

const MAX_SUMMARY_ERROR_LEN: usize = 200;

/// How a scenario ended
#[derive(Clone, Debug, PartialEq)]
pub enum Status {
    /// Completed without error
    Passed,
    /// Returned an error or panicked
    Failed(String),
    /// Not run because a prerequisite failed
    Skipped(String),
}

/// Outcome of one scenario
#[derive(Clone, Debug, PartialEq)]
pub struct ScenarioResult {
    /// Scenario name
    pub name: String,
    /// How it ended
    pub status: Status,
    /// Wall-clock time spent
    pub duration: Duration,
}

/// Collects scenario results for one run
pub struct Suite {
    name: String,
    results: Mutex<Vec<ScenarioResult>>,
}

impl Suite {
    /// Create an empty suite
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            results: Mutex::new(Vec::new()),
        }
    }

    /// Run a scenario and record its outcome.
    ///
    /// Returns the scenario's value when it passed, so dependents can use it.
    pub async fn run<T, F, Fut>(&self, name: &str, scenario: F) -> Option<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        info!(scenario = %name, "running");
        let start = Instant::now();
        let outcome = AssertUnwindSafe(scenario()).catch_unwind().await;

        let (status, value) = match outcome {
            Ok(Ok(value)) => (Status::Passed, Some(value)),
            Ok(Err(e)) => (Status::Failed(e.to_string()), None),
            Err(panic) => {
                let msg = if let Some(s) = panic.downcast_ref::<&str>() {
                    s.to_string()
                } else if let Some(s) = panic.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "unknown panic".to_string()
                };
                (Status::Failed(format!("PANIC: {msg}")), None)
            }
        };

        match &status {
            Status::Failed(e) => error!(scenario = %name, error = %e, "failed"),
            _ => info!(scenario = %name, "passed"),
        }
        self.push(name, status, start.elapsed());
        value
    }

    /// Record a scenario as skipped
    pub fn skip(&self, name: &str, reason: &str) {
        warn!(scenario = %name, %reason, "skipped");
        self.push(name, Status::Skipped(reason.to_string()), Duration::ZERO);
    }

    /// Results recorded so far, in run order
    pub fn results(&self) -> Vec<ScenarioResult> {
        self.lock().clone()
    }

    /// Log the summary; fails when any scenario failed
    pub fn finish(&self) -> Result<()> {
        let results = self.lock();
        let total: Duration = results.iter().map(|r| r.duration).sum();
        let count = |f: fn(&Status) -> bool| results.iter().filter(|r| f(&r.status)).count();
        let passed = count(|s| matches!(s, Status::Passed));
        let skipped = count(|s| matches!(s, Status::Skipped(_)));

        info!("========================================");
        info!("  {}", self.name.to_uppercase());
        info!("========================================");
        for r in results.iter() {
            let (tag, detail) = match &r.status {
                Status::Passed => ("PASS", None),
                Status::Failed(e) => ("FAIL", Some(e)),
                Status::Skipped(reason) => ("SKIP", Some(reason)),
            };
            info!("  {tag}  {:40} {:.1}s", r.name, r.duration.as_secs_f64());
            if let Some(detail) = detail {
                info!("        -> {}", truncate(detail, MAX_SUMMARY_ERROR_LEN));
            }
        }

        let failed: Vec<String> = results
            .iter()
            .filter(|r| matches!(r.status, Status::Failed(_)))
            .map(|r| r.name.clone())
            .collect();

        info!("----------------------------------------");
        info!(
            "  {} passed, {} failed, {} skipped ({:.1}s total)",
            passed,
            failed.len(),
            skipped,
            total.as_secs_f64()
        );
        info!("========================================");

        if failed.is_empty() {
            Ok(())
        } else {
            Err(Error::SuiteFailed {
                suite: self.name.clone(),
                failed,
            })
        }
    }

    fn push(&self, name: &str, status: Status, duration: Duration) {
        self.lock().push(ScenarioResult {
            name: name.to_string(),
            status,
            duration,
        });
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<ScenarioResult>> {
        self.results
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_passing_scenario_returns_value() {
        let suite = Suite::new("e2e");
        let value = suite.run("consumer", || async { Ok(7) }).await;
        assert_eq!(value, Some(7));
        assert_eq!(suite.results()[0].status, Status::Passed);
        assert!(suite.finish().is_ok());
    }

    #[tokio::test]
    async fn test_failure_is_recorded_and_run_continues() {
        let suite = Suite::new("e2e");
        let first: Option<()> = suite
            .run("consumer", || async {
                Err(Error::assertion("consumer", "expected 1 label, got 2"))
            })
            .await;
        assert!(first.is_none());
        suite.skip("resource", "consumer failed");
        suite.run("other", || async { Ok(()) }).await;

        let statuses: Vec<Status> = suite.results().into_iter().map(|r| r.status).collect();
        assert!(matches!(&statuses[0], Status::Failed(e) if e.contains("expected 1 label")));
        assert_eq!(statuses[1], Status::Skipped("consumer failed".to_string()));
        assert_eq!(statuses[2], Status::Passed);

        match suite.finish() {
            Err(Error::SuiteFailed { suite, failed }) => {
                assert_eq!(suite, "e2e");
                assert_eq!(failed, vec!["consumer".to_string()]);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_panic_is_a_failure() {
        let suite = Suite::new("e2e");
        let value: Option<()> = suite
            .run("panics", || async {
                let explode = true;
                if explode {
                    panic!("boom");
                }
                Ok(())
            })
            .await;
        assert!(value.is_none());
        assert_eq!(
            suite.results()[0].status,
            Status::Failed("PANIC: boom".to_string())
        );
    }

    #[test]
    fn test_skips_alone_do_not_fail_the_suite() {
        let suite = Suite::new("e2e");
        suite.skip("resource", "no consumer");
        assert!(suite.finish().is_ok());
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "h");
        assert_eq!(truncate("short", 200), "short");
    }
}
