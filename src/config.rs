//! Pipeline configuration.
//!
//! One `WatchConfig` is built by the CLI (or a test) and handed to the
//! controller; every component reads its slice of the config at
//! construction time. No component re-reads configuration mid-run.

use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the watch/run pipeline.
#[derive(Debug, Clone)]
pub struct WatchConfig {
    /// Directories watched recursively
    pub roots: Vec<PathBuf>,
    /// Glob patterns for paths to ignore (`**` supported)
    pub ignore_patterns: Vec<String>,
    /// Enable .gitignore filtering (default: true)
    pub gitignore_aware: bool,
    /// Suffix identifying test files, including extension (default: `_test.go`)
    pub test_suffix: String,
    /// Extensions classified as source files, without dot (default: `go`)
    pub source_extensions: Vec<String>,
    /// File names treated as dependency manifests (default: `go.mod`, `go.sum`)
    pub dependency_manifests: Vec<String>,
    /// Glob patterns classified as configuration files
    pub config_patterns: Vec<String>,
    /// Debounce quiet interval
    pub debounce_interval: Duration,
    /// Capacity of the debouncer's output channel; a full channel drops the batch
    pub batch_channel_capacity: usize,
    /// Wall-clock bound on one launcher+parser cycle
    pub run_timeout: Duration,
    /// Lines of context read around an extracted error location
    pub context_lines: usize,
    /// Test tool argument vector; per-target arguments are appended
    pub tool: Vec<String>,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            roots: vec![PathBuf::from(".")],
            ignore_patterns: Vec::new(),
            gitignore_aware: true,
            test_suffix: "_test.go".to_string(),
            source_extensions: vec!["go".to_string()],
            dependency_manifests: vec!["go.mod".to_string(), "go.sum".to_string()],
            config_patterns: vec![
                "*.json".to_string(),
                "*.yml".to_string(),
                "*.yaml".to_string(),
                "*.toml".to_string(),
            ],
            debounce_interval: Duration::from_millis(250),
            batch_channel_capacity: 16,
            run_timeout: Duration::from_secs(300),
            context_lines: 5,
            tool: vec!["go".to_string(), "test".to_string(), "-json".to_string()],
        }
    }
}

impl WatchConfig {
    /// Extension portion of the test suffix (e.g. `go` for `_test.go`).
    ///
    /// Used when deriving a suite's file path from its package name.
    pub fn test_extension(&self) -> &str {
        self.test_suffix
            .rsplit('.')
            .next()
            .filter(|ext| !ext.is_empty() && !self.test_suffix.ends_with('.'))
            .unwrap_or("go")
    }

    /// Bare suffix without the extension (e.g. `_test` for `_test.go`).
    pub fn test_stem_suffix(&self) -> &str {
        self.test_suffix
            .split('.')
            .next()
            .unwrap_or(&self.test_suffix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = WatchConfig::default();
        assert_eq!(config.debounce_interval, Duration::from_millis(250));
        assert_eq!(config.test_suffix, "_test.go");
        assert_eq!(config.context_lines, 5);
        assert!(config.gitignore_aware);
    }

    #[test]
    fn test_test_extension() {
        let config = WatchConfig::default();
        assert_eq!(config.test_extension(), "go");
        assert_eq!(config.test_stem_suffix(), "_test");

        let config = WatchConfig {
            test_suffix: "_spec.ts".to_string(),
            ..WatchConfig::default()
        };
        assert_eq!(config.test_extension(), "ts");
        assert_eq!(config.test_stem_suffix(), "_spec");
    }
}
