//! Streaming decoder for the test tool's JSON event stream.
//!
//! Consumes one event line at a time and mutates an in-progress
//! [`TestRun`]. Two consumption modes:
//!
//! - `parse`: strict batch decode — any malformed line is an error. Events
//!   are stable-sorted by timestamp before application.
//! - `feed_line_lossy` / `parse_streaming`: streaming — malformed lines are
//!   skipped and counted, the stream continues.
//!
//! Subtests are grafted into their parent's `subtests` on their terminal
//! event; a placeholder parent (status `Running`) is always created when a
//! child's terminal event arrives before the parent exists.

pub mod event;
pub mod location;

use ahash::{AHashMap, AHashSet};
use std::io::BufRead;
use std::path::PathBuf;

use crate::config::WatchConfig;
use crate::errors::VigilError;
use crate::model::{
    parent_name, TestError, TestErrorKind, TestResult, TestRun, TestStatus, TestSuite,
};
use self::event::{Action, TestEvent};
use self::location::{attach_snippet, LocationExtractor};

/// Parser-side slice of the pipeline config.
#[derive(Debug, Clone)]
pub struct ParserConfig {
    /// Extension used when deriving suite file paths (default `go`)
    pub test_extension: String,
    /// Lines of context read around an extracted error location
    pub context_lines: usize,
    /// Roots tried when resolving relative source paths for snippets
    pub search_roots: Vec<PathBuf>,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            test_extension: "go".to_string(),
            context_lines: 5,
            search_roots: Vec::new(),
        }
    }
}

impl From<&WatchConfig> for ParserConfig {
    fn from(config: &WatchConfig) -> Self {
        Self {
            test_extension: config.test_extension().to_string(),
            context_lines: config.context_lines,
            search_roots: config.roots.clone(),
        }
    }
}

/// Line-by-line decoder building a [`TestRun`].
pub struct StreamParser {
    config: ParserConfig,
    extractor: LocationExtractor,
    run: TestRun,
    /// package name -> index into run.suites
    suite_index: AHashMap<String, usize>,
    /// (package, test) pairs that have emitted a "panic:" line
    panicking: AHashSet<(String, String)>,
    line_number: u64,
}

impl StreamParser {
    pub fn new(config: ParserConfig) -> Self {
        Self {
            config,
            extractor: LocationExtractor::new(),
            run: TestRun::new(),
            suite_index: AHashMap::new(),
            panicking: AHashSet::new(),
            line_number: 0,
        }
    }

    /// Parser whose run carries a caller-chosen id, so the scheduler's
    /// `on_run_start` header and the final aggregate correlate.
    pub fn with_run_id(config: ParserConfig, run_id: uuid::Uuid) -> Self {
        let mut parser = Self::new(config);
        parser.run.run_id = run_id;
        parser
    }

    /// In-progress run (read-only).
    pub fn run(&self) -> &TestRun {
        &self.run
    }

    /// Strict batch parse of a whole stream.
    ///
    /// Decodes every line first (any malformed line is a parse error), then
    /// applies events in timestamp order, stable on ties.
    pub fn parse<R: BufRead>(mut self, reader: R) -> Result<TestRun, VigilError> {
        let mut events = Vec::new();
        for line in reader.lines() {
            self.line_number += 1;
            let line = line.map_err(|e| VigilError::Parse {
                operation: "read-stream".to_string(),
                line_number: self.line_number,
                message: e.to_string(),
            })?;
            if line.trim().is_empty() {
                continue;
            }
            events.push(self.decode(&line)?);
        }

        events.sort_by_key(|e| e.t);
        for event in events {
            self.apply(event);
        }
        Ok(self.finish())
    }

    /// Streaming parse: malformed lines are skipped and counted, the
    /// callback fires once per completed suite.
    pub fn parse_streaming<R, F>(&mut self, reader: R, mut on_suite: F) -> Result<(), VigilError>
    where
        R: BufRead,
        F: FnMut(&TestSuite),
    {
        for line in reader.lines() {
            let line = line.map_err(|e| VigilError::Parse {
                operation: "read-stream".to_string(),
                line_number: self.line_number + 1,
                message: e.to_string(),
            })?;
            if let Some(idx) = self.feed_line_lossy(&line) {
                on_suite(&self.run.suites[idx]);
            }
        }
        Ok(())
    }

    /// Decode and apply one line, strictly.
    ///
    /// # Returns
    /// The index of the suite completed by this line, if it carried a
    /// package-level terminal event.
    pub fn feed_line(&mut self, line: &str) -> Result<Option<usize>, VigilError> {
        self.line_number += 1;
        if line.trim().is_empty() {
            return Ok(None);
        }
        let event = self.decode(line)?;
        Ok(self.apply(event))
    }

    /// Decode and apply one line; a malformed line increments the run's
    /// parse-error counter and the stream continues.
    pub fn feed_line_lossy(&mut self, line: &str) -> Option<usize> {
        match self.feed_line(line) {
            Ok(completed) => completed,
            Err(_) => {
                self.run.parse_errors += 1;
                None
            }
        }
    }

    /// Seal the run and hand it out.
    pub fn finish(mut self) -> TestRun {
        if self.run.end_time.is_none() {
            self.run.end_time = self.run.suites.iter().filter_map(|s| s.end_time).max();
        }
        self.run
    }

    fn decode(&self, line: &str) -> Result<TestEvent, VigilError> {
        serde_json::from_str(line).map_err(|e| VigilError::Parse {
            operation: "decode-event".to_string(),
            line_number: self.line_number,
            message: e.to_string(),
        })
    }

    /// Apply one decoded event; returns the completed suite's index when
    /// the event is a package-level terminal.
    fn apply(&mut self, event: TestEvent) -> Option<usize> {
        let suite_idx = self.ensure_suite(&event);

        match event.action {
            Action::Start => {
                let suite = &mut self.run.suites[suite_idx];
                suite.start_time = Some(event.t);
                None
            }
            Action::Run => {
                if event.is_test_scoped() {
                    self.on_run(suite_idx, &event);
                }
                None
            }
            // Pause/cont reflect the tool's parallel scheduling; the test
            // stays Running from the consumer's point of view.
            Action::Pause | Action::Cont | Action::Unknown => None,
            Action::Output => {
                if event.is_test_scoped() {
                    self.on_test_output(suite_idx, &event);
                } else {
                    self.on_package_output(suite_idx, &event);
                }
                None
            }
            Action::Pass | Action::Fail | Action::Skip => {
                if event.is_test_scoped() {
                    self.on_test_terminal(suite_idx, &event);
                    None
                } else {
                    self.on_package_terminal(suite_idx, &event);
                    Some(suite_idx)
                }
            }
        }
    }

    fn ensure_suite(&mut self, event: &TestEvent) -> usize {
        if let Some(&idx) = self.suite_index.get(&event.package) {
            return idx;
        }
        let mut suite = TestSuite::new(event.package.clone(), &self.config.test_extension);
        suite.start_time = Some(event.t);
        if self.run.start_time.is_none() {
            self.run.start_time = Some(event.t);
        }
        self.run.suites.push(suite);
        let idx = self.run.suites.len() - 1;
        self.suite_index.insert(event.package.clone(), idx);
        idx
    }

    fn on_run(&mut self, suite_idx: usize, event: &TestEvent) {
        let name = event.test.as_deref().unwrap_or_default();
        let package = event.package.clone();
        let suite = &mut self.run.suites[suite_idx];
        if find_result_mut(&mut suite.tests, name).is_none() {
            suite.tests.push(TestResult::new(name, package));
        }
        let result = find_result_mut(&mut suite.tests, name).unwrap();
        result.status = TestStatus::Running;
        result.start_time = Some(event.t);
    }

    fn on_test_output(&mut self, suite_idx: usize, event: &TestEvent) {
        let name = event.test.as_deref().unwrap_or_default().to_string();
        let output = match &event.output {
            Some(output) => output.clone(),
            None => return,
        };
        let package = event.package.clone();
        let panic_key = (package.clone(), name.clone());
        let newly_panicking = output.contains("panic:");
        if newly_panicking {
            self.panicking.insert(panic_key.clone());
        }
        let in_panic = newly_panicking || self.panicking.contains(&panic_key);

        // Classification and extraction both borrow the extractor, so
        // compute them before taking the mutable test handle.
        let kind = self.extractor.classify(&output);
        let expectation = self.extractor.extract_expectation(&output);
        let mut found_location = self.extractor.extract(&output, in_panic);

        let context_lines = self.config.context_lines;
        let search_roots = self.config.search_roots.clone();
        let suite = &mut self.run.suites[suite_idx];
        if find_result_mut(&mut suite.tests, &name).is_none() {
            let mut fresh = TestResult::new(&name, package);
            fresh.status = TestStatus::Running;
            suite.tests.push(fresh);
        }
        let result = find_result_mut(&mut suite.tests, &name).unwrap();
        result.output.push(output.clone());

        if let Some(kind) = kind {
            let trimmed = output.trim().to_string();
            match &mut result.error {
                None => {
                    result.error = Some(TestError::new(trimmed, kind));
                }
                Some(error) => {
                    // Later, more specific classifications upgrade a
                    // generic FAIL; the message keeps accumulating.
                    if error.kind == TestErrorKind::Error && kind != TestErrorKind::Error {
                        error.kind = kind;
                    }
                    error.message.push('\n');
                    error.message.push_str(&trimmed);
                }
            }
        }

        if let Some(error) = &mut result.error {
            if let Some((expected, actual)) = expectation {
                if error.expected.is_none() {
                    error.expected = Some(expected);
                    error.actual = Some(actual);
                }
            }
            if error.location.is_none() {
                if let Some(location) = &mut found_location {
                    attach_snippet(location, context_lines, &search_roots);
                    error.location = found_location;
                }
            }
        }
    }

    fn on_package_output(&mut self, suite_idx: usize, event: &TestEvent) {
        let output = match &event.output {
            Some(output) => output,
            None => return,
        };
        let marker = format!("# {}", event.package);
        let suite = &mut self.run.suites[suite_idx];
        if output.contains(&marker)
            || output.contains("syntax error")
            || output.contains("undefined:")
        {
            suite.build_failed = true;
            suite.build_error.push_str(output);
        }
    }

    fn on_test_terminal(&mut self, suite_idx: usize, event: &TestEvent) {
        let name = event.test.as_deref().unwrap_or_default().to_string();
        let status = match event.action {
            Action::Pass => TestStatus::Passed,
            Action::Skip => TestStatus::Skipped,
            _ => TestStatus::Failed,
        };
        let duration = event.elapsed_duration();
        let package = event.package.clone();
        let suite = &mut self.run.suites[suite_idx];

        if parent_name(&name).is_none() {
            // Top-level test: finalize in place, preserving list order.
            if find_result_mut(&mut suite.tests, &name).is_none() {
                suite.tests.push(TestResult::new(&name, package));
            }
            let result = find_result_mut(&mut suite.tests, &name).unwrap();
            result.status = status;
            result.end_time = Some(event.t);
            result.duration = duration;
            suite.record_terminal(status);
            return;
        }

        // Subtest: detach from the top level (or build fresh), finalize,
        // then graft under the parent.
        let mut result = match suite.tests.iter().position(|t| t.name == name) {
            Some(idx) => suite.tests.remove(idx),
            None => {
                if let Some(nested) = find_result_mut(&mut suite.tests, &name) {
                    // Already grafted (duplicate terminal); update in place.
                    nested.status = status;
                    nested.end_time = Some(event.t);
                    nested.duration = duration;
                    suite.record_terminal(status);
                    return;
                }
                TestResult::new(&name, package.clone())
            }
        };
        result.status = status;
        result.end_time = Some(event.t);
        result.duration = duration;
        suite.record_terminal(status);

        let parent = parent_name(&name).unwrap_or_default().to_string();
        if find_result_mut(&mut suite.tests, &parent).is_none() {
            // Child finished before its parent surfaced; the placeholder
            // is finalized by the parent's own terminal.
            let mut placeholder = TestResult::new(&parent, package);
            placeholder.status = TestStatus::Running;
            suite.tests.push(placeholder);
        }
        let parent_result = find_result_mut(&mut suite.tests, &parent).unwrap();
        parent_result.subtests.push(result);
    }

    fn on_package_terminal(&mut self, suite_idx: usize, event: &TestEvent) {
        let suite = &mut self.run.suites[suite_idx];
        suite.end_time = Some(event.t);
        suite.duration = event.elapsed_duration();
        if let Some(current) = self.run.end_time {
            if event.t > current {
                self.run.end_time = Some(event.t);
            }
        } else {
            self.run.end_time = Some(event.t);
        }
    }
}

/// Depth-first mutable lookup by full test name.
fn find_result_mut<'a>(tests: &'a mut [TestResult], name: &str) -> Option<&'a mut TestResult> {
    for test in tests.iter_mut() {
        if test.name == name {
            return Some(test);
        }
        if let Some(found) = find_result_mut(&mut test.subtests, name) {
            return Some(found);
        }
    }
    None
}
