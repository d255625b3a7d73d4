//! Outbound rendering interface and watch diagnostics.
//!
//! The core makes no formatting decisions: everything user-visible flows
//! through the [`Renderer`] trait. Callbacks are invoked from the
//! scheduler task only, serially, in this order per cycle:
//! `on_file_change` (before each non-cached run), `on_run_start`,
//! `on_suite_complete` per suite, `on_run_complete`.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

use crate::errors::VigilError;
use crate::impact::FileChange;
use crate::model::{TestRun, TestSuite};

/// Receiver of run progress. Implemented by the CLI (or a test double);
/// the scheduler owns the only reference and never shares it across
/// threads.
pub trait Renderer: Send {
    /// A new run is starting; `run` is a header (id and start time set,
    /// no suites yet).
    fn on_run_start(&mut self, run: &TestRun);

    /// One suite finished parsing.
    fn on_suite_complete(&mut self, suite: &TestSuite);

    /// The run finished; `run` is the final aggregate.
    fn on_run_complete(&mut self, run: &TestRun);

    /// The changes that triggered the upcoming run.
    fn on_file_change(&mut self, changes: &[FileChange]);

    /// A structured failure that did not stop the watch loop.
    fn on_error(&mut self, _error: &VigilError) {}

    /// A pipeline diagnostic (skipped path, stage failure).
    fn on_diagnostic(&mut self, _diagnostic: &WatchDiagnostic) {}
}

/// Renderer that swallows everything. Useful for tests and benchmarks.
#[derive(Debug, Default)]
pub struct NullRenderer;

impl Renderer for NullRenderer {
    fn on_run_start(&mut self, _run: &TestRun) {}
    fn on_suite_complete(&mut self, _suite: &TestSuite) {}
    fn on_run_complete(&mut self, _run: &TestRun) {}
    fn on_file_change(&mut self, _changes: &[FileChange]) {}
}

/// Reason why a path was dropped by the pipeline.
///
/// Variant order matters for precedence when reporting.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum SkipReason {
    /// Internal hard-coded ignore rules (.git/, vendor/, editor swap)
    IgnoredInternal,
    /// Matched by gitignore-style rules
    IgnoredByGitignore,
    /// Excluded by a configured glob pattern
    ExcludedByGlob,
    /// Classified as Unknown; produces no targets
    UnknownKind,
    /// Target directory no longer exists
    NotRunnable,
}

impl SkipReason {
    /// Stable sort key for deterministic ordering.
    pub fn sort_key(&self) -> u8 {
        match self {
            SkipReason::IgnoredInternal => 0,
            SkipReason::IgnoredByGitignore => 1,
            SkipReason::ExcludedByGlob => 2,
            SkipReason::UnknownKind => 3,
            SkipReason::NotRunnable => 4,
        }
    }

    /// Human-readable description.
    pub fn description(&self) -> &'static str {
        match self {
            SkipReason::IgnoredInternal => "internal ignore rule",
            SkipReason::IgnoredByGitignore => "matched by gitignore",
            SkipReason::ExcludedByGlob => "excluded by pattern",
            SkipReason::UnknownKind => "no known change kind",
            SkipReason::NotRunnable => "target directory missing",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Pipeline stage where a per-path failure occurred.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum DiagnosticStage {
    Hash,
    Classify,
    Launch,
    Parse,
    CacheWrite,
}

impl DiagnosticStage {
    pub fn sort_key(&self) -> u8 {
        match self {
            DiagnosticStage::Hash => 0,
            DiagnosticStage::Classify => 1,
            DiagnosticStage::Launch => 2,
            DiagnosticStage::Parse => 3,
            DiagnosticStage::CacheWrite => 4,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            DiagnosticStage::Hash => "hashing file",
            DiagnosticStage::Classify => "classifying path",
            DiagnosticStage::Launch => "launching tool",
            DiagnosticStage::Parse => "parsing stream",
            DiagnosticStage::CacheWrite => "writing cache",
        }
    }
}

impl fmt::Display for DiagnosticStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// A diagnostic event from the watch pipeline.
///
/// Designed for deterministic sorting and structured output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum WatchDiagnostic {
    /// Path was dropped without producing a run
    Skipped { path: String, reason: SkipReason },
    /// A per-path failure that did not stop the pipeline
    Error {
        path: String,
        stage: DiagnosticStage,
        message: String,
    },
}

impl WatchDiagnostic {
    pub fn skipped(path: String, reason: SkipReason) -> Self {
        WatchDiagnostic::Skipped { path, reason }
    }

    pub fn error(path: String, stage: DiagnosticStage, message: String) -> Self {
        WatchDiagnostic::Error {
            path,
            stage,
            message,
        }
    }

    pub fn path(&self) -> &str {
        match self {
            WatchDiagnostic::Skipped { path, .. } => path,
            WatchDiagnostic::Error { path, .. } => path,
        }
    }

    /// Stable sort key: path, then variant (Error first), then stage/reason.
    pub fn sort_key(&self) -> (&str, u8, u8) {
        match self {
            WatchDiagnostic::Error { path, stage, .. } => (path, 0, stage.sort_key()),
            WatchDiagnostic::Skipped { path, reason } => (path, 1, reason.sort_key()),
        }
    }

    /// Human-readable one-liner.
    ///
    /// Examples:
    /// - "SKIP vendor/dep.go: internal ignore rule"
    /// - "ERROR pkg/a.go: hashing file: permission denied"
    pub fn format_line(&self) -> String {
        match self {
            WatchDiagnostic::Skipped { path, reason } => format!("SKIP {}: {}", path, reason),
            WatchDiagnostic::Error {
                path,
                stage,
                message,
            } => format!("ERROR {}: {}: {}", path, stage, message),
        }
    }
}

impl fmt::Display for WatchDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format_line())
    }
}

impl PartialOrd for WatchDiagnostic {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for WatchDiagnostic {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skip_reason_ordering() {
        assert!(SkipReason::IgnoredInternal.sort_key() < SkipReason::IgnoredByGitignore.sort_key());
        assert!(SkipReason::ExcludedByGlob.sort_key() < SkipReason::UnknownKind.sort_key());
    }

    #[test]
    fn test_diagnostic_sorting() {
        let mut diagnostics = vec![
            WatchDiagnostic::skipped("src/c.go".to_string(), SkipReason::ExcludedByGlob),
            WatchDiagnostic::error(
                "src/a.go".to_string(),
                DiagnosticStage::Hash,
                "denied".to_string(),
            ),
            WatchDiagnostic::skipped("src/a.go".to_string(), SkipReason::UnknownKind),
        ];
        diagnostics.sort();

        assert_eq!(diagnostics[0].path(), "src/a.go");
        assert!(matches!(diagnostics[0], WatchDiagnostic::Error { .. }));
        assert_eq!(diagnostics[1].path(), "src/a.go");
        assert!(matches!(diagnostics[1], WatchDiagnostic::Skipped { .. }));
        assert_eq!(diagnostics[2].path(), "src/c.go");
    }

    #[test]
    fn test_format_line() {
        let diag = WatchDiagnostic::skipped("vendor/dep.go".to_string(), SkipReason::IgnoredInternal);
        assert_eq!(diag.format_line(), "SKIP vendor/dep.go: internal ignore rule");

        let diag = WatchDiagnostic::error(
            "pkg/a.go".to_string(),
            DiagnosticStage::Hash,
            "permission denied".to_string(),
        );
        assert_eq!(
            diag.format_line(),
            "ERROR pkg/a.go: hashing file: permission denied"
        );
    }
}
