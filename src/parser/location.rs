//! Error classification and source-location extraction from output lines.
//!
//! The test tool emits failure details as free text interleaved with the
//! event stream. This module classifies failure lines into error kinds and
//! extracts `file:line[:column]` references, with a bounded best-effort
//! read of the surrounding source lines.

use regex::Regex;
use std::path::{Path, PathBuf};

use crate::model::{SourceLocation, TestErrorKind};

/// Compiled extraction rules. Build once, use per line.
#[derive(Debug)]
pub struct LocationExtractor {
    posix: Regex,
    windows: Regex,
    relative: Regex,
    panic_frame: Regex,
    expect_got: Regex,
}

impl LocationExtractor {
    pub fn new() -> Self {
        // The three path rules are tried in order; first match wins.
        // The panic-frame rule is only consulted after a line containing
        // "panic:" has been seen for the same test.
        Self {
            posix: Regex::new(r"((?:/[\w.-]+)+\.\w+):(\d+)(?::(\d+))?").unwrap(),
            windows: Regex::new(r"(\w:\\(?:[\w.-]+\\)+[\w.-]+\.\w+):(\d+)(?::(\d+))?").unwrap(),
            relative: Regex::new(r"([\w.-]+(?:/[\w.-]+)*\.\w+):(\d+)(?::(\d+))?").unwrap(),
            panic_frame: Regex::new(r"\s*([^:\s]+\.\w+):(\d+)").unwrap(),
            expect_got: Regex::new(r"[Ee]xpected\s+(.+?),\s+(?:got|was|actual:?)\s+(.+)").unwrap(),
        }
    }

    /// Classify an output line into an error kind, if it signals one.
    ///
    /// First match wins: panic, timeout, assertion, generic FAIL.
    pub fn classify(&self, line: &str) -> Option<TestErrorKind> {
        if line.contains("panic:") {
            return Some(TestErrorKind::Panic);
        }
        if line.contains("timed out") {
            return Some(TestErrorKind::Timeout);
        }
        if line.contains("Expected") || line.contains("assertion") {
            return Some(TestErrorKind::AssertionError);
        }
        if line.contains("FAIL") {
            return Some(TestErrorKind::Error);
        }
        None
    }

    /// Extract `(expected, actual)` from an assertion message, if phrased
    /// in a recognized form.
    pub fn extract_expectation(&self, line: &str) -> Option<(String, String)> {
        let caps = self.expect_got.captures(line)?;
        Some((
            caps[1].trim().to_string(),
            caps[2].trim().trim_end_matches('\n').to_string(),
        ))
    }

    /// Extract a source location from an output line.
    ///
    /// `in_panic` widens matching to bare stack-frame references
    /// (`   foo.go:42`) which are only unambiguous inside a panic trace.
    pub fn extract(&self, line: &str, in_panic: bool) -> Option<SourceLocation> {
        for regex in [&self.posix, &self.windows, &self.relative] {
            if let Some(caps) = regex.captures(line) {
                let line_no = caps[2].parse::<u32>().ok()?;
                let column = caps.get(3).and_then(|c| c.as_str().parse::<u32>().ok());
                return Some(SourceLocation {
                    file: caps[1].to_string(),
                    line: line_no,
                    column,
                    snippet: Vec::new(),
                    start_line: 0,
                });
            }
        }
        if in_panic {
            if let Some(caps) = self.panic_frame.captures(line) {
                let line_no = caps[2].parse::<u32>().ok()?;
                return Some(SourceLocation {
                    file: caps[1].to_string(),
                    line: line_no,
                    column: None,
                    snippet: Vec::new(),
                    start_line: 0,
                });
            }
        }
        None
    }
}

impl Default for LocationExtractor {
    fn default() -> Self {
        Self::new()
    }
}

/// Populate `snippet`/`start_line` by reading ±`context_lines` around the
/// located line.
///
/// The file is tried as given, then relative to each search root. Read
/// failures leave the snippet empty; this is diagnostic sugar, never a
/// pipeline error.
pub fn attach_snippet(
    location: &mut SourceLocation,
    context_lines: usize,
    search_roots: &[PathBuf],
) {
    let contents = match read_source(&location.file, search_roots) {
        Some(contents) => contents,
        None => return,
    };

    let lines: Vec<&str> = contents.lines().collect();
    if lines.is_empty() || location.line == 0 {
        return;
    }

    let target = (location.line as usize).min(lines.len());
    let start = target.saturating_sub(context_lines + 1); // 0-indexed
    let end = (target + context_lines).min(lines.len());

    location.snippet = lines[start..end].iter().map(|l| l.to_string()).collect();
    location.start_line = (start + 1) as u32;
}

fn read_source(file: &str, search_roots: &[PathBuf]) -> Option<String> {
    let direct = Path::new(file);
    if direct.is_file() {
        return std::fs::read_to_string(direct).ok();
    }
    for root in search_roots {
        let candidate = root.join(file);
        if candidate.is_file() {
            if let Ok(contents) = std::fs::read_to_string(&candidate) {
                return Some(contents);
            }
        }
    }
    None
}
