//! Test subprocess launcher.
//!
//! Spawns the configured tool with its structured-output flags, hands the
//! caller stdout as a byte stream, and classifies the exit. Exit code 0
//! means all tests passed, 1 means ordinary test failures; anything else
//! is a runner failure and fatal to the current cycle.

use std::io::Read;
use std::path::Path;
use std::process::{Child, ChildStdout, Command, Stdio};
use std::time::{Duration, Instant};

use crate::errors::VigilError;
use crate::impact::TestTarget;

/// Classified subprocess exit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitClass {
    /// Exit 0: every test passed
    AllPassed,
    /// Exit 1: one or more test failures (normal operation)
    TestFailures,
    /// Any other exit: the runner itself failed
    RunnerFailure {
        code: Option<i32>,
        stderr: String,
    },
}

impl ExitClass {
    /// Whether this exit allows the cycle's results to be cached.
    pub fn is_usable(&self) -> bool {
        !matches!(self, ExitClass::RunnerFailure { .. })
    }
}

/// Builds and spawns test subprocesses.
#[derive(Debug, Clone)]
pub struct Launcher {
    tool: Vec<String>,
}

impl Launcher {
    /// # Arguments
    /// * `tool` - base argument vector, e.g. `["go", "test", "-json"]`
    pub fn new(tool: Vec<String>) -> Self {
        Self { tool }
    }

    /// Full argument vector for a target set, for diagnostics.
    pub fn command_line(&self, targets: &[TestTarget]) -> Vec<String> {
        let mut argv = self.tool.clone();
        for target in targets {
            argv.push(target_argument(&target.path));
        }
        argv
    }

    /// Spawn the tool against the given targets.
    ///
    /// stdout and stderr are piped; stdout carries the event stream.
    pub fn launch(&self, targets: &[TestTarget]) -> Result<TestProcess, VigilError> {
        let argv = self.command_line(targets);
        let (program, args) = argv.split_first().ok_or_else(|| VigilError::Config {
            operation: "launch".to_string(),
            target: "tool".to_string(),
            message: "empty tool command".to_string(),
        })?;

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| VigilError::Execution {
                operation: "spawn".to_string(),
                target: argv.join(" "),
                message: e.to_string(),
                cause: Some(Box::new(e)),
            })?;

        Ok(TestProcess {
            describe: argv.join(" "),
            child,
        })
    }
}

/// A running test subprocess.
#[derive(Debug)]
pub struct TestProcess {
    describe: String,
    child: Child,
}

impl TestProcess {
    /// Take the stdout stream. Can only be taken once.
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    /// Poll for exit until `timeout` elapses.
    ///
    /// Uses try_wait in a sleep loop so a concurrent `kill` is never
    /// blocked out. On timeout the child is killed and a timeout error is
    /// returned.
    pub fn wait_timeout(&mut self, timeout: Duration) -> Result<ExitClass, VigilError> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.child.try_wait() {
                Ok(Some(status)) => return Ok(self.classify(status.code())),
                Ok(None) => {
                    if Instant::now() >= deadline {
                        self.kill();
                        return Err(VigilError::Timeout {
                            target: self.describe.clone(),
                            timeout_ms: timeout.as_millis() as u64,
                        });
                    }
                    std::thread::sleep(Duration::from_millis(20));
                }
                Err(e) => {
                    return Err(VigilError::Execution {
                        operation: "wait".to_string(),
                        target: self.describe.clone(),
                        message: e.to_string(),
                        cause: Some(Box::new(e)),
                    })
                }
            }
        }
    }

    /// Non-blocking exit poll.
    ///
    /// Returns `Ok(None)` while the child is still running. Intended for
    /// callers that must not hold a lock across a blocking wait.
    pub fn poll_exit(&mut self) -> Result<Option<ExitClass>, VigilError> {
        match self.child.try_wait() {
            Ok(Some(status)) => Ok(Some(self.classify(status.code()))),
            Ok(None) => Ok(None),
            Err(e) => Err(VigilError::Execution {
                operation: "wait".to_string(),
                target: self.describe.clone(),
                message: e.to_string(),
                cause: Some(Box::new(e)),
            }),
        }
    }

    /// Best-effort terminate; reaped on the next wait.
    pub fn kill(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }

    fn classify(&mut self, code: Option<i32>) -> ExitClass {
        match code {
            Some(0) => ExitClass::AllPassed,
            Some(1) => ExitClass::TestFailures,
            other => {
                let mut stderr = String::new();
                if let Some(mut pipe) = self.child.stderr.take() {
                    let _ = pipe.read_to_string(&mut stderr);
                }
                ExitClass::RunnerFailure {
                    code: other,
                    stderr: stderr.trim().to_string(),
                }
            }
        }
    }
}

/// Argument form of a target path: relative paths gain a leading `./` so
/// the tool resolves them as packages, not module paths.
fn target_argument(path: &Path) -> String {
    let s = path.to_string_lossy();
    if path.is_absolute() || s.starts_with("./") || s.starts_with("../") {
        s.to_string()
    } else {
        format!("./{}", s)
    }
}
