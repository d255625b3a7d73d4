//! Console renderer for the CLI.
//!
//! Human-readable progress goes to stderr; machine JSON (when requested)
//! goes to stdout, keeping the two streams separable in pipelines.

use vigil::{FileChange, Renderer, TestRun, TestStatus, TestSuite, VigilError, WatchDiagnostic};

use crate::cli::OutputFormat;

/// Renderer writing run progress to the terminal.
pub struct ConsoleRenderer {
    output_format: OutputFormat,
    runs_completed: u64,
}

impl ConsoleRenderer {
    pub fn new(output_format: OutputFormat) -> Self {
        Self {
            output_format,
            runs_completed: 0,
        }
    }

    pub fn runs_completed(&self) -> u64 {
        self.runs_completed
    }

    fn suite_line(suite: &TestSuite) -> String {
        if suite.build_failed {
            return format!("BUILD FAIL {}", suite.package_name);
        }
        let verdict = if suite.num_failed > 0 { "FAIL" } else { "ok  " };
        format!(
            "{} {} {} passed, {} failed, {} skipped ({:.2}s)",
            verdict,
            suite.package_name,
            suite.num_passed,
            suite.num_failed,
            suite.num_skipped,
            suite.duration.as_secs_f64()
        )
    }
}

impl Renderer for ConsoleRenderer {
    fn on_run_start(&mut self, run: &TestRun) {
        if self.output_format == OutputFormat::Human {
            eprintln!("RUN {}", run.run_id);
        }
    }

    fn on_suite_complete(&mut self, suite: &TestSuite) {
        if self.output_format == OutputFormat::Human {
            eprintln!("{}", Self::suite_line(suite));
            for test in &suite.tests {
                if test.status == TestStatus::Failed || test.status == TestStatus::Error {
                    if let Some(error) = &test.error {
                        eprintln!("  --- {} ({:?})", test.name, error.kind);
                        if let Some(location) = &error.location {
                            eprintln!(
                                "      {}:{}{}",
                                location.file,
                                location.line,
                                location
                                    .column
                                    .map(|c| format!(":{}", c))
                                    .unwrap_or_default()
                            );
                        }
                    }
                }
            }
        }
    }

    fn on_run_complete(&mut self, run: &TestRun) {
        self.runs_completed += 1;
        match self.output_format {
            OutputFormat::Human => {
                eprintln!(
                    "DONE {} total, {} passed, {} failed, {} skipped",
                    run.num_total(),
                    run.num_passed(),
                    run.num_failed(),
                    run.num_skipped()
                );
                if run.parse_errors > 0 {
                    eprintln!("WARN {} malformed event lines skipped", run.parse_errors);
                }
            }
            OutputFormat::Json => match serde_json::to_string(run) {
                Ok(json) => println!("{}", json),
                Err(e) => eprintln!("ERROR serializing run: {}", e),
            },
        }
    }

    fn on_file_change(&mut self, changes: &[FileChange]) {
        if self.output_format == OutputFormat::Human {
            for change in changes {
                let marker = if change.is_deleted {
                    "-"
                } else if change.is_new {
                    "+"
                } else {
                    "~"
                };
                eprintln!("{} {} ({})", marker, change.path.display(), change.kind);
            }
        }
    }

    fn on_error(&mut self, error: &VigilError) {
        eprintln!("ERROR [{}] {}", error.code(), error);
        if let Some(hint) = error.hint() {
            eprintln!("  hint: {}", hint);
        }
    }

    fn on_diagnostic(&mut self, diagnostic: &WatchDiagnostic) {
        if self.output_format == OutputFormat::Human {
            eprintln!("{}", diagnostic);
        }
    }
}
