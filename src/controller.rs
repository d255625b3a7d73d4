//! Controller facade: the two entry points the CLI consumes.
//!
//! `run_once` executes a single cycle over the initial target set;
//! `watch` installs the full pipeline until cancelled. The controller
//! validates configuration up front and owns the scheduler (and through
//! it, every downstream component) for its whole lifetime. No state lives
//! at process scope.

use std::sync::atomic::AtomicBool;
use std::sync::mpsc::Receiver;
use std::sync::Arc;

use crate::cache::CacheStats;
use crate::clock::{ClockSource, SystemClock};
use crate::config::WatchConfig;
use crate::errors::VigilError;
use crate::model::TestRun;
use crate::patterns::PatternSet;
use crate::render::Renderer;
use crate::scheduler::{KeyCommand, Scheduler};

/// Pipeline facade. Construct one per invocation; teardown happens when
/// it drops.
pub struct Controller {
    scheduler: Scheduler,
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller").finish_non_exhaustive()
    }
}

impl Controller {
    /// Validate the config and assemble the pipeline.
    pub fn new(config: WatchConfig) -> Result<Self, VigilError> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Construction with an injected clock, for tests.
    pub fn with_clock(
        config: WatchConfig,
        clock: Arc<dyn ClockSource>,
    ) -> Result<Self, VigilError> {
        validate_config(&config)?;
        Ok(Self {
            scheduler: Scheduler::new(config, clock),
        })
    }

    /// Single execution over the initial target set; no watcher.
    pub fn run_once(&self, renderer: &mut dyn Renderer) -> Result<TestRun, VigilError> {
        self.scheduler.run_once(renderer)
    }

    /// Run the pipeline until `cancel` fires or a fatal error propagates.
    ///
    /// `keys` optionally feeds interactive commands (`a`, `f`, `q`).
    pub fn watch(
        &self,
        renderer: &mut dyn Renderer,
        cancel: Arc<AtomicBool>,
        keys: Option<Receiver<KeyCommand>>,
    ) -> Result<(), VigilError> {
        self.scheduler.watch(renderer, cancel, keys)
    }

    /// Cache counters for status output.
    pub fn cache_stats(&self) -> CacheStats {
        self.scheduler.cache().stats()
    }
}

/// Reject configurations that would fail later in a worse place.
fn validate_config(config: &WatchConfig) -> Result<(), VigilError> {
    if config.roots.is_empty() {
        return Err(VigilError::Config {
            operation: "validate".to_string(),
            target: "roots".to_string(),
            message: "no watch roots configured".to_string(),
        });
    }
    for root in &config.roots {
        if !root.is_dir() {
            return Err(VigilError::Config {
                operation: "validate".to_string(),
                target: root.display().to_string(),
                message: "watch root is not a directory".to_string(),
            });
        }
    }
    if config.tool.is_empty() {
        return Err(VigilError::Config {
            operation: "validate".to_string(),
            target: "tool".to_string(),
            message: "empty tool command".to_string(),
        });
    }
    // Compile the pattern sets once now so bad globs fail fast.
    PatternSet::compile(&config.ignore_patterns)?;
    PatternSet::compile(&config.config_patterns)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_root_rejected() {
        let config = WatchConfig {
            roots: vec!["/no/such/dir".into()],
            ..WatchConfig::default()
        };
        let err = Controller::new(config).unwrap_err();
        assert!(matches!(err, VigilError::Config { .. }));
    }

    #[test]
    fn test_empty_roots_rejected() {
        let config = WatchConfig {
            roots: Vec::new(),
            ..WatchConfig::default()
        };
        assert!(Controller::new(config).is_err());
    }

    #[test]
    fn test_bad_glob_rejected() {
        let temp = TempDir::new().unwrap();
        let config = WatchConfig {
            roots: vec![temp.path().to_path_buf()],
            ignore_patterns: vec!["[".to_string()],
            ..WatchConfig::default()
        };
        let err = Controller::new(config).unwrap_err();
        assert_eq!(err.code(), crate::errors::VGL_CFG_002_BAD_PATTERN);
    }

    #[test]
    fn test_empty_tool_rejected() {
        let temp = TempDir::new().unwrap();
        let config = WatchConfig {
            roots: vec![temp.path().to_path_buf()],
            tool: Vec::new(),
            ..WatchConfig::default()
        };
        assert!(Controller::new(config).is_err());
    }

    #[test]
    fn test_valid_config_constructs() {
        let temp = TempDir::new().unwrap();
        let config = WatchConfig {
            roots: vec![temp.path().to_path_buf()],
            ..WatchConfig::default()
        };
        let controller = Controller::new(config).unwrap();
        assert_eq!(controller.cache_stats().entries, 0);
    }
}
