//! Glob matching for ignore and test-file patterns.
//!
//! All matching is pure: paths are normalized to forward slashes before
//! being tested, so the same pattern set produces the same verdicts on
//! every platform. `**` matches across directory separators.

use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::Path;

use crate::errors::VigilError;

/// Directory names that are always ignored (hard-coded).
///
/// These never contain watchable sources and frequently churn, so they are
/// filtered before user-supplied patterns are consulted.
const INTERNAL_IGNORE_DIRS: &[&str] = &[
    ".git",
    ".hg",
    "node_modules",
    "vendor",
    "target",
    ".idea",
    ".vscode",
];

/// File name suffixes that are always ignored (editor artifacts).
const INTERNAL_IGNORE_SUFFIXES: &[&str] = &[".swp", ".swx", ".tmp", "~"];

/// Compiled set of glob patterns.
///
/// Wraps a `globset::GlobSet`; empty pattern lists compile to a set that
/// matches nothing.
#[derive(Debug, Clone)]
pub struct PatternSet {
    set: GlobSet,
    patterns: Vec<String>,
}

impl PatternSet {
    /// Compile a list of glob patterns.
    ///
    /// # Errors
    /// Returns a `Config` error naming the first pattern that fails to
    /// compile.
    pub fn compile(patterns: &[String]) -> Result<Self, VigilError> {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            let glob = Glob::new(pattern).map_err(|e| VigilError::Config {
                operation: "compile-patterns".to_string(),
                target: pattern.clone(),
                message: e.to_string(),
            })?;
            builder.add(glob);
        }
        let set = builder.build().map_err(|e| VigilError::Config {
            operation: "compile-patterns".to_string(),
            target: patterns.join(","),
            message: e.to_string(),
        })?;
        Ok(Self {
            set,
            patterns: patterns.to_vec(),
        })
    }

    /// Empty set that matches nothing.
    pub fn empty() -> Self {
        Self {
            set: GlobSet::empty(),
            patterns: Vec::new(),
        }
    }

    /// Whether `path` matches any pattern in the set.
    ///
    /// The path is normalized to forward slashes first; both the full
    /// normalized path and its file name are tested, so `*.yml` matches
    /// `conf/app.yml`.
    pub fn matches(&self, path: &Path) -> bool {
        if self.patterns.is_empty() {
            return false;
        }
        let normalized = normalize_slashes(path);
        if self.set.is_match(&normalized) {
            return true;
        }
        match path.file_name().and_then(|n| n.to_str()) {
            Some(name) => self.set.is_match(name),
            None => false,
        }
    }

    /// Source patterns this set was compiled from.
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }
}

/// Normalize a path to forward slashes for matching.
pub fn normalize_slashes(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// Whether a path falls under an internal hard-coded ignore rule.
///
/// Checks every path component against the internal directory list and the
/// file name against editor-artifact suffixes.
pub fn is_internally_ignored(path: &Path) -> bool {
    for component in path.components() {
        if let Some(name) = component.as_os_str().to_str() {
            if INTERNAL_IGNORE_DIRS.contains(&name) {
                return true;
            }
        }
    }
    if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
        for suffix in INTERNAL_IGNORE_SUFFIXES {
            if name.ends_with(suffix) {
                return true;
            }
        }
        // Vim swap files hide behind a leading dot as well
        if name.starts_with('.') && name.ends_with(".swp") {
            return true;
        }
    }
    false
}
