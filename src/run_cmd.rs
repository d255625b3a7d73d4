//! Run command implementation

use anyhow::Result;
use vigil::{Controller, WatchConfig};

use crate::cli::OutputFormat;
use crate::console::ConsoleRenderer;

/// Execute one cycle over every discovered package.
///
/// # Returns
/// `true` when every test passed, `false` when there were failures.
pub fn run_run(config: WatchConfig, output_format: OutputFormat) -> Result<bool> {
    let controller = Controller::new(config)?;
    let mut renderer = ConsoleRenderer::new(output_format);
    let run = controller.run_once(&mut renderer)?;
    Ok(!run.has_failures())
}
