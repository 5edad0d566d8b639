//! Scoped timing of CI steps.
//!
//! A [`TimedOperation`] prints its "done" line exactly once: either when
//! [`TimedOperation::finish`] is called or when it is dropped, so early
//! returns and `?` still close the scope.

use std::future::Future;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::exec::{CommandRunner, CommandSpec, ExitOutcome};
use crate::reporter::Reporter;

/// Render a duration as whole minutes and remaining whole seconds.
///
/// ```
/// use std::time::Duration;
/// use ampci_core::format_elapsed;
///
/// assert_eq!(format_elapsed(Duration::ZERO), "0m 0s");
/// assert_eq!(format_elapsed(Duration::from_secs(61)), "1m 1s");
/// ```
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{}m {}s", secs / 60, secs % 60)
}

/// A running, labeled operation. Reports on drop.
#[must_use = "dropping a TimedOperation immediately ends the timed scope"]
pub struct TimedOperation {
    label: String,
    started_at: DateTime<Utc>,
    start: Instant,
    reporter: Reporter,
    reported: bool,
}

impl TimedOperation {
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Wall-clock time the operation began.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// End the scope now and return the elapsed time.
    pub fn finish(mut self) -> Duration {
        self.report()
    }

    fn report(&mut self) -> Duration {
        let elapsed = self.start.elapsed();
        if !self.reported {
            self.reported = true;
            self.reporter.done(&self.label, elapsed);
            tracing::debug!(
                label = %self.label,
                started_at = %self.started_at.to_rfc3339(),
                elapsed_ms = elapsed.as_millis() as u64,
                "timed operation finished"
            );
        }
        elapsed
    }
}

impl Drop for TimedOperation {
    fn drop(&mut self) {
        self.report();
    }
}

impl Reporter {
    /// Print `Running <label>...` and start timing.
    pub fn begin(&self, label: impl Into<String>) -> TimedOperation {
        let label = label.into();
        self.starting(&label);
        TimedOperation {
            label,
            started_at: Utc::now(),
            start: Instant::now(),
            reporter: self.clone(),
            reported: false,
        }
    }

    /// Run a future inside a timed scope.
    pub async fn timed<F, T>(&self, label: impl Into<String>, fut: F) -> T
    where
        F: Future<Output = T>,
    {
        let _op = self.begin(label);
        fut.await
    }
}

/// Run a command inside a timed scope labeled with the command line.
///
/// A non-zero exit is returned as an outcome, not an error.
pub async fn timed_exec(
    runner: &dyn CommandRunner,
    reporter: &Reporter,
    cmd: &CommandSpec,
) -> Result<ExitOutcome> {
    reporter.timed(cmd.to_string(), runner.run(cmd)).await
}

/// Run a command inside a timed scope; a non-zero exit is an error.
pub async fn timed_exec_or_fail(
    runner: &dyn CommandRunner,
    reporter: &Reporter,
    cmd: &CommandSpec,
) -> Result<()> {
    reporter.timed(cmd.to_string(), runner.run_or_fail(cmd)).await
}
