//! Wire grammar for the test tool's line-delimited JSON stream.
//!
//! One JSON object per line:
//!
//! ```text
//! Event := { t: Timestamp, action: Action, package: String,
//!            test?: String, output?: String, elapsed?: Seconds }
//! Action := "start" | "run" | "pause" | "cont" | "pass" | "fail" | "skip" | "output"
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Event action verb.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Package compilation/run started
    Start,
    /// Test started
    Run,
    /// Test paused (parallel scheduling)
    Pause,
    /// Test continued
    Cont,
    Pass,
    Fail,
    Skip,
    /// Free-text output line attributed to a package or test
    Output,
    /// Forward-compatible catch-all; processed as a no-op
    #[serde(other)]
    Unknown,
}

impl Action {
    /// Whether this action terminates a test or package.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Action::Pass | Action::Fail | Action::Skip)
    }
}

/// One decoded line of the event stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TestEvent {
    /// Event timestamp
    pub t: DateTime<Utc>,
    pub action: Action,
    pub package: String,
    /// Absent for package-level events
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test: Option<String>,
    /// Only present on `output` events
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    /// Seconds; only present on terminal events
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elapsed: Option<f64>,
}

impl TestEvent {
    /// Elapsed seconds converted to a duration (seconds -> nanoseconds).
    ///
    /// Negative or non-finite values clamp to zero rather than panic.
    pub fn elapsed_duration(&self) -> Duration {
        match self.elapsed {
            Some(secs) if secs.is_finite() && secs > 0.0 => Duration::from_secs_f64(secs),
            _ => Duration::ZERO,
        }
    }

    /// Whether this event addresses a specific test (vs. the package).
    pub fn is_test_scoped(&self) -> bool {
        self.test.as_deref().is_some_and(|t| !t.is_empty())
    }
}
