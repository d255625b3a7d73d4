//! Error taxonomy for the watch/run pipeline.
//!
//! Error codes follow the pattern: VGL-{CATEGORY}-{3-digit number}
//!
//! Categories (1-4 uppercase letters):
//! - CFG: Configuration errors (bad patterns, missing roots)
//! - W: Watcher errors (bootstrap failure, backend error channel)
//! - EXEC: Subprocess execution errors (spawn failure, bad exit)
//! - P: Parse errors (malformed event lines)
//! - C: Cache errors
//! - R: Renderer errors
//! - T: Timeout errors
//! - DEP: Dependency resolution errors
//! - V: Validation errors (paths outside roots, bad targets)
//!
//! Each error code is stable and should not be reused.

use std::fmt;

/// Watch root does not exist or is not a directory
pub const VGL_CFG_001_BAD_ROOT: &str = "VGL-CFG-001";

/// Ignore or test pattern failed to compile
pub const VGL_CFG_002_BAD_PATTERN: &str = "VGL-CFG-002";

/// Watcher failed to register a directory at bootstrap
pub const VGL_W_001_BOOTSTRAP: &str = "VGL-W-001";

/// Watcher backend reported a mid-run error
pub const VGL_W_002_BACKEND: &str = "VGL-W-002";

/// Test subprocess failed to spawn
pub const VGL_EXEC_001_SPAWN: &str = "VGL-EXEC-001";

/// Test subprocess exited with a runner-failure code (not 0 or 1)
pub const VGL_EXEC_002_RUNNER_EXIT: &str = "VGL-EXEC-002";

/// Malformed JSON event line
pub const VGL_P_001_MALFORMED_LINE: &str = "VGL-P-001";

/// Cache operation failed
pub const VGL_C_001_CACHE: &str = "VGL-C-001";

/// Renderer callback reported a failure
pub const VGL_R_001_RENDER: &str = "VGL-R-001";

/// Run exceeded the configured per-run timeout
pub const VGL_T_001_RUN_TIMEOUT: &str = "VGL-T-001";

/// Dependency manifest could not be read
pub const VGL_DEP_001_MANIFEST: &str = "VGL-DEP-001";

/// Path failed validation (outside watch roots, unreadable)
pub const VGL_V_001_PATH: &str = "VGL-V-001";

/// Structured error for every failure the pipeline can surface.
///
/// Each variant carries the operation that failed and the target it was
/// operating on, plus an optional underlying cause. Remediation hints are
/// derived from the variant via [`VigilError::hint`].
#[derive(Debug, thiserror::Error)]
pub enum VigilError {
    /// Configuration rejected before the pipeline started
    #[error("config error during {operation} ({target}): {message}")]
    Config {
        operation: String,
        target: String,
        message: String,
    },

    /// Watcher bootstrap or backend failure
    #[error("watch error during {operation} ({target}): {message}")]
    Watch {
        operation: String,
        target: String,
        message: String,
        #[source]
        cause: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Subprocess spawn or exit failure
    #[error("execution error during {operation} ({target}): {message}")]
    Execution {
        operation: String,
        target: String,
        message: String,
        #[source]
        cause: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Malformed event line from the subprocess stream
    #[error("parse error during {operation} (line {line_number}): {message}")]
    Parse {
        operation: String,
        line_number: u64,
        message: String,
    },

    /// Cache bookkeeping failure
    #[error("cache error during {operation} ({target}): {message}")]
    Cache {
        operation: String,
        target: String,
        message: String,
    },

    /// Renderer callback failure
    #[error("render error during {operation}: {message}")]
    Render { operation: String, message: String },

    /// Per-run timeout expired
    #[error("run timed out after {timeout_ms} ms ({target})")]
    Timeout { target: String, timeout_ms: u64 },

    /// Dependency manifest failure
    #[error("dependency error during {operation} ({target}): {message}")]
    Dependency {
        operation: String,
        target: String,
        message: String,
    },

    /// Path or target validation failure
    #[error("validation error during {operation} ({target}): {message}")]
    Validation {
        operation: String,
        target: String,
        message: String,
    },
}

impl VigilError {
    /// Stable error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            VigilError::Config { operation, .. } => {
                if operation == "compile-patterns" {
                    VGL_CFG_002_BAD_PATTERN
                } else {
                    VGL_CFG_001_BAD_ROOT
                }
            }
            VigilError::Watch { operation, .. } => {
                if operation == "bootstrap" {
                    VGL_W_001_BOOTSTRAP
                } else {
                    VGL_W_002_BACKEND
                }
            }
            VigilError::Execution { operation, .. } => {
                if operation == "spawn" {
                    VGL_EXEC_001_SPAWN
                } else {
                    VGL_EXEC_002_RUNNER_EXIT
                }
            }
            VigilError::Parse { .. } => VGL_P_001_MALFORMED_LINE,
            VigilError::Cache { .. } => VGL_C_001_CACHE,
            VigilError::Render { .. } => VGL_R_001_RENDER,
            VigilError::Timeout { .. } => VGL_T_001_RUN_TIMEOUT,
            VigilError::Dependency { .. } => VGL_DEP_001_MANIFEST,
            VigilError::Validation { .. } => VGL_V_001_PATH,
        }
    }

    /// Remediation hint for the user, when one exists.
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            VigilError::Config { .. } => {
                Some("check watch roots and glob patterns in the configuration")
            }
            VigilError::Watch { .. } => {
                Some("verify the watched directories exist and are readable")
            }
            VigilError::Execution { .. } => {
                Some("run the test command manually to inspect its stderr")
            }
            VigilError::Timeout { .. } => {
                Some("raise the per-run timeout or narrow the target set")
            }
            VigilError::Dependency { .. } => {
                Some("verify the dependency manifest parses with the host tool")
            }
            VigilError::Parse { .. } => None,
            VigilError::Cache { .. } => None,
            VigilError::Render { .. } => None,
            VigilError::Validation { .. } => None,
        }
    }

    /// Convenience constructor for watch errors.
    pub fn watch(
        operation: &str,
        target: impl fmt::Display,
        message: impl Into<String>,
    ) -> Self {
        VigilError::Watch {
            operation: operation.to_string(),
            target: target.to_string(),
            message: message.into(),
            cause: None,
        }
    }

    /// Convenience constructor for execution errors.
    pub fn execution(
        operation: &str,
        target: impl fmt::Display,
        message: impl Into<String>,
    ) -> Self {
        VigilError::Execution {
            operation: operation.to_string(),
            target: target.to_string(),
            message: message.into(),
            cause: None,
        }
    }

    /// Convenience constructor for validation errors.
    pub fn validation(
        operation: &str,
        target: impl fmt::Display,
        message: impl Into<String>,
    ) -> Self {
        VigilError::Validation {
            operation: operation.to_string(),
            target: target.to_string(),
            message: message.into(),
        }
    }
}

/// Result alias used across the pipeline.
pub type VigilResult<T> = Result<T, VigilError>;

#[cfg(test)]
mod tests {
    use super::*;

    /// Verify all error codes are unique
    #[test]
    fn test_error_codes_are_unique() {
        let codes = vec![
            VGL_CFG_001_BAD_ROOT,
            VGL_CFG_002_BAD_PATTERN,
            VGL_W_001_BOOTSTRAP,
            VGL_W_002_BACKEND,
            VGL_EXEC_001_SPAWN,
            VGL_EXEC_002_RUNNER_EXIT,
            VGL_P_001_MALFORMED_LINE,
            VGL_C_001_CACHE,
            VGL_R_001_RENDER,
            VGL_T_001_RUN_TIMEOUT,
            VGL_DEP_001_MANIFEST,
            VGL_V_001_PATH,
        ];

        let mut unique = std::collections::HashSet::new();
        for code in codes {
            assert!(
                unique.insert(code),
                "Duplicate error code detected: {}",
                code
            );
        }
    }

    /// Verify error code format
    #[test]
    fn test_error_code_format() {
        let codes = vec![
            VGL_CFG_001_BAD_ROOT,
            VGL_W_001_BOOTSTRAP,
            VGL_EXEC_002_RUNNER_EXIT,
            VGL_P_001_MALFORMED_LINE,
            VGL_T_001_RUN_TIMEOUT,
        ];

        for code in codes {
            assert!(
                code.starts_with("VGL-"),
                "Error code must start with 'VGL-': {}",
                code
            );
            let parts: Vec<&str> = code.split('-').collect();
            assert_eq!(parts.len(), 3, "Error code must have 3 parts: {}", code);
            assert!(parts[1].len() >= 1 && parts[1].len() <= 4);
            assert!(parts[1].chars().all(|c| c.is_ascii_uppercase()));
            assert_eq!(parts[2].len(), 3, "Number must be 3 digits: {}", code);
            assert!(parts[2].chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn test_watch_bootstrap_code() {
        let err = VigilError::watch("bootstrap", "/missing", "no such directory");
        assert_eq!(err.code(), VGL_W_001_BOOTSTRAP);

        let err = VigilError::watch("event-channel", "/root", "backend closed");
        assert_eq!(err.code(), VGL_W_002_BACKEND);
    }

    #[test]
    fn test_execution_hint_present() {
        let err = VigilError::execution("wait", "./pkg", "exit code 2");
        assert!(err.hint().is_some());
        assert_eq!(err.code(), VGL_EXEC_002_RUNNER_EXIT);
    }

    #[test]
    fn test_timeout_display() {
        let err = VigilError::Timeout {
            target: "./pkg".to_string(),
            timeout_ms: 30_000,
        };
        let msg = err.to_string();
        assert!(msg.contains("30000 ms"));
        assert!(msg.contains("./pkg"));
    }
}
