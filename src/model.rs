//! Result tree for one test run.
//!
//! A run is an ordered sequence of suites (one per package); a suite holds
//! top-level tests; tests hold subtests. Subtests reference their parent by
//! name string only, never by back-pointer, so the tree owns everything
//! downward and stays serializable.
//!
//! Counter invariant: after terminal events for all member tests,
//! `num_total == num_passed + num_failed + num_skipped` per suite and at
//! the run level.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Lifecycle status of one test.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TestStatus {
    /// Known but not yet started
    Pending,
    /// `run` event seen, no terminal event yet
    Running,
    Passed,
    Failed,
    Skipped,
    /// Infrastructure failure, not a test assertion
    Error,
}

impl TestStatus {
    /// Whether this is a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TestStatus::Passed | TestStatus::Failed | TestStatus::Skipped | TestStatus::Error
        )
    }
}

/// Classified failure kind, derived from output heuristics.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TestErrorKind {
    AssertionError,
    Panic,
    Timeout,
    Error,
}

/// Source position extracted from free-text output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SourceLocation {
    pub file: String,
    pub line: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
    /// Context lines around `line`; empty when the file was unreadable
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub snippet: Vec<String>,
    /// 1-indexed line number of the first snippet entry
    #[serde(default)]
    pub start_line: u32,
}

/// A classified test failure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TestError {
    pub message: String,
    pub kind: TestErrorKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<SourceLocation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual: Option<String>,
}

impl TestError {
    pub fn new(message: impl Into<String>, kind: TestErrorKind) -> Self {
        Self {
            message: message.into(),
            kind,
            location: None,
            expected: None,
            actual: None,
        }
    }
}

/// Result of one test, including its subtests.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TestResult {
    /// Full test name as emitted by the tool (`TestA/sub` for subtests)
    pub name: String,
    /// Parent test name (`TestA` for `TestA/sub`); empty for top-level tests
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub parent: String,
    pub package: String,
    pub status: TestStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    pub duration: Duration,
    /// Raw output lines attributed to this test
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub output: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<TestError>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subtests: Vec<TestResult>,
}

impl TestResult {
    /// Fresh result in `Pending` state.
    pub fn new(name: impl Into<String>, package: impl Into<String>) -> Self {
        let name = name.into();
        let parent = parent_name(&name).unwrap_or("").to_string();
        Self {
            name,
            parent,
            package: package.into(),
            status: TestStatus::Pending,
            start_time: None,
            end_time: None,
            duration: Duration::ZERO,
            output: Vec::new(),
            error: None,
            subtests: Vec::new(),
        }
    }

    /// Last `/`-separated segment of the name.
    pub fn display_name(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }

    /// Depth-first search for a subtest by full name.
    pub fn find_subtest(&self, name: &str) -> Option<&TestResult> {
        for sub in &self.subtests {
            if sub.name == name {
                return Some(sub);
            }
            if let Some(found) = sub.find_subtest(name) {
                return Some(found);
            }
        }
        None
    }

    /// Total number of tests in this subtree, including self.
    pub fn subtree_len(&self) -> usize {
        1 + self.subtests.iter().map(|s| s.subtree_len()).sum::<usize>()
    }
}

/// Parent portion of a `/`-separated test name.
///
/// `TestA/sub/case` -> `TestA/sub`; `TestA` -> None.
pub fn parent_name(name: &str) -> Option<&str> {
    name.rfind('/').map(|idx| &name[..idx])
}

/// Number of `/`-separated segments in a test name.
pub fn segment_count(name: &str) -> usize {
    name.split('/').count()
}

/// Aggregate for all tests of one package in one run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct TestSuite {
    pub package_name: String,
    /// Derived test file path (see [`TestSuite::derive_file_path`])
    pub file_path: String,
    /// Top-level tests only; subtests live inside their parents
    pub tests: Vec<TestResult>,
    pub num_total: usize,
    pub num_passed: usize,
    pub num_failed: usize,
    pub num_skipped: usize,
    pub duration: Duration,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    pub build_failed: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub build_error: String,
}

impl TestSuite {
    /// Fresh suite for a package.
    pub fn new(package_name: impl Into<String>, test_extension: &str) -> Self {
        let package_name = package_name.into();
        let file_path = Self::derive_file_path(&package_name, test_extension);
        Self {
            package_name,
            file_path,
            ..Self::default()
        }
    }

    /// Derive the suite's test file path from the package name.
    ///
    /// Takes the last two path segments of the package and appends
    /// `/<last>_test.<ext>`; a single-segment package yields
    /// `<seg>_test.<ext>` with no directory prefix.
    pub fn derive_file_path(package_name: &str, extension: &str) -> String {
        let segments: Vec<&str> = package_name.split('/').collect();
        match segments.as_slice() {
            [] => String::new(),
            [only] => format!("{}_test.{}", only, extension),
            [.., second_last, last] => {
                format!("{}/{}/{}_test.{}", second_last, last, last, extension)
            }
        }
    }

    /// Record one terminal status in the suite counters.
    pub fn record_terminal(&mut self, status: TestStatus) {
        self.num_total += 1;
        match status {
            TestStatus::Passed => self.num_passed += 1,
            TestStatus::Failed | TestStatus::Error => self.num_failed += 1,
            TestStatus::Skipped => self.num_skipped += 1,
            TestStatus::Pending | TestStatus::Running => {}
        }
    }

    /// Find a top-level test by full name.
    pub fn find_test(&self, name: &str) -> Option<&TestResult> {
        self.tests.iter().find(|t| t.name == name)
    }

    /// Counter invariant check: total equals the terminal sum.
    pub fn counters_consistent(&self) -> bool {
        self.num_total == self.num_passed + self.num_failed + self.num_skipped
    }
}

/// One complete execution of the test tool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TestRun {
    /// Correlates renderer callbacks with this run
    pub run_id: Uuid,
    /// Suites in first-seen package order
    pub suites: Vec<TestSuite>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    /// Malformed event lines skipped while streaming
    pub parse_errors: u64,
}

impl TestRun {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            suites: Vec::new(),
            start_time: None,
            end_time: None,
            parse_errors: 0,
        }
    }

    pub fn find_suite(&self, package: &str) -> Option<&TestSuite> {
        self.suites.iter().find(|s| s.package_name == package)
    }

    pub fn num_total(&self) -> usize {
        self.suites.iter().map(|s| s.num_total).sum()
    }

    pub fn num_passed(&self) -> usize {
        self.suites.iter().map(|s| s.num_passed).sum()
    }

    pub fn num_failed(&self) -> usize {
        self.suites.iter().map(|s| s.num_failed).sum()
    }

    pub fn num_skipped(&self) -> usize {
        self.suites.iter().map(|s| s.num_skipped).sum()
    }

    /// Whether any suite failed to build or had a failing test.
    pub fn has_failures(&self) -> bool {
        self.suites
            .iter()
            .any(|s| s.build_failed || s.num_failed > 0)
    }
}

impl Default for TestRun {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parent_name() {
        assert_eq!(parent_name("TestA"), None);
        assert_eq!(parent_name("TestA/sub"), Some("TestA"));
        assert_eq!(parent_name("TestA/sub/case"), Some("TestA/sub"));
    }

    #[test]
    fn test_segment_count() {
        assert_eq!(segment_count("TestA"), 1);
        assert_eq!(segment_count("TestA/sub"), 2);
    }

    #[test]
    fn test_derive_file_path() {
        assert_eq!(
            TestSuite::derive_file_path("github.com/ex/pkg", "go"),
            "ex/pkg/pkg_test.go"
        );
        assert_eq!(
            TestSuite::derive_file_path("ex/pkg", "go"),
            "ex/pkg/pkg_test.go"
        );
        assert_eq!(TestSuite::derive_file_path("main", "go"), "main_test.go");
    }

    #[test]
    fn test_record_terminal_counters() {
        let mut suite = TestSuite::new("ex/pkg", "go");
        suite.record_terminal(TestStatus::Passed);
        suite.record_terminal(TestStatus::Failed);
        suite.record_terminal(TestStatus::Skipped);
        suite.record_terminal(TestStatus::Error);

        assert_eq!(suite.num_total, 4);
        assert_eq!(suite.num_passed, 1);
        assert_eq!(suite.num_failed, 2);
        assert_eq!(suite.num_skipped, 1);
        assert!(suite.counters_consistent());
    }

    #[test]
    fn test_display_name() {
        let result = TestResult::new("TestA/sub/deep", "ex/pkg");
        assert_eq!(result.display_name(), "deep");
        assert_eq!(result.parent, "TestA/sub");
    }

    #[test]
    fn test_run_level_counters() {
        let mut run = TestRun::new();
        let mut a = TestSuite::new("ex/a", "go");
        a.record_terminal(TestStatus::Passed);
        let mut b = TestSuite::new("ex/b", "go");
        b.record_terminal(TestStatus::Failed);
        run.suites.push(a);
        run.suites.push(b);

        assert_eq!(run.num_total(), 2);
        assert_eq!(
            run.num_total(),
            run.num_passed() + run.num_failed() + run.num_skipped()
        );
        assert!(run.has_failures());
    }

    /// Serialize a result tree to JSON and back; the reconstruction is
    /// structurally equal.
    #[test]
    fn test_result_tree_round_trip() {
        let mut parent = TestResult::new("TestA", "ex/pkg");
        parent.status = TestStatus::Passed;
        parent.duration = Duration::from_millis(100);

        let mut sub = TestResult::new("TestA/sub", "ex/pkg");
        sub.status = TestStatus::Failed;
        sub.duration = Duration::from_millis(40);
        sub.error = Some(TestError {
            message: "Expected 5, got 3".to_string(),
            kind: TestErrorKind::AssertionError,
            location: Some(SourceLocation {
                file: "foo_test.go".to_string(),
                line: 42,
                column: Some(12),
                snippet: vec!["want := 5".to_string()],
                start_line: 40,
            }),
            expected: Some("5".to_string()),
            actual: Some("3".to_string()),
        });
        parent.subtests.push(sub);

        let json = serde_json::to_string(&parent).unwrap();
        let back: TestResult = serde_json::from_str(&json).unwrap();
        assert_eq!(parent, back);
    }
}
