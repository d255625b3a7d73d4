//! Path classification for changed files.
//!
//! First-match rules, in precedence order: test file, dependency manifest,
//! source file, config file, unknown. The classifier is a pure function of
//! the path; filesystem state is never consulted.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::config::WatchConfig;
use crate::errors::VigilError;
use crate::patterns::PatternSet;

/// What kind of file a change touched.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    /// A test file (matches the test-file suffix)
    Test,
    /// A source file (extension in the source set)
    Source,
    /// A configuration file
    Config,
    /// A dependency manifest (go.mod and friends)
    Dependency,
    /// Anything else; produces no targets
    Unknown,
}

impl ChangeKind {
    /// Whether this kind invalidates every cached target.
    pub fn is_broad(&self) -> bool {
        matches!(self, ChangeKind::Config | ChangeKind::Dependency)
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChangeKind::Test => "test",
            ChangeKind::Source => "source",
            ChangeKind::Config => "config",
            ChangeKind::Dependency => "dependency",
            ChangeKind::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

/// Classifies paths into [`ChangeKind`] using path rules from the config.
#[derive(Debug, Clone)]
pub struct FileClassifier {
    test_suffix: String,
    dependency_manifests: Vec<String>,
    source_extensions: Vec<String>,
    config_patterns: PatternSet,
}

impl FileClassifier {
    /// Build a classifier from the pipeline config.
    pub fn new(config: &WatchConfig) -> Result<Self, VigilError> {
        Ok(Self {
            test_suffix: config.test_suffix.clone(),
            dependency_manifests: config.dependency_manifests.clone(),
            source_extensions: config.source_extensions.clone(),
            config_patterns: PatternSet::compile(&config.config_patterns)?,
        })
    }

    /// Classify a path. First match wins.
    pub fn classify(&self, path: &Path) -> ChangeKind {
        let file_name = match path.file_name().and_then(|n| n.to_str()) {
            Some(name) => name,
            None => return ChangeKind::Unknown,
        };

        if file_name.ends_with(&self.test_suffix) {
            return ChangeKind::Test;
        }

        if self
            .dependency_manifests
            .iter()
            .any(|m| m == file_name)
        {
            return ChangeKind::Dependency;
        }

        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            if self.source_extensions.iter().any(|s| s == ext) {
                return ChangeKind::Source;
            }
        }

        if self.config_patterns.matches(path) {
            return ChangeKind::Config;
        }

        ChangeKind::Unknown
    }
}
