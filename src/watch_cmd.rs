//! Watch command implementation

use anyhow::Result;
use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;

use vigil::{Controller, KeyCommand, WatchConfig};

use crate::cli::OutputFormat;
use crate::console::ConsoleRenderer;

pub fn run_watch(
    config: WatchConfig,
    output_format: OutputFormat,
    interactive: bool,
) -> Result<()> {
    let controller = Controller::new(config)?;
    let mut renderer = ConsoleRenderer::new(output_format);

    // Create cancellation flag
    let cancel = Arc::new(AtomicBool::new(false));
    let cancel_clone = cancel.clone();

    // Register signal handlers for SIGINT and SIGTERM
    #[cfg(unix)]
    {
        use signal_hook::consts::signal;
        use signal_hook::iterator::Signals;

        let mut signals = Signals::new([signal::SIGTERM, signal::SIGINT])?;

        std::thread::spawn(move || {
            for _ in &mut signals {
                cancel_clone.store(true, Ordering::SeqCst);
                break;
            }
        });
    }

    // Key reader: a (run all), f (run failed), q (quit). Line-buffered
    // stdin is fine; the letter takes effect on Enter.
    let keys = if interactive {
        let (key_tx, key_rx) = mpsc::channel();
        let key_cancel = cancel.clone();
        std::thread::spawn(move || {
            for byte in std::io::stdin().bytes() {
                let Ok(byte) = byte else { break };
                let command = match byte {
                    b'a' => Some(KeyCommand::RunAll),
                    b'f' => Some(KeyCommand::RunFailed),
                    b'q' => Some(KeyCommand::Quit),
                    _ => None,
                };
                if let Some(command) = command {
                    let quitting = command == KeyCommand::Quit;
                    if key_tx.send(command).is_err() || quitting {
                        break;
                    }
                }
                if key_cancel.load(Ordering::SeqCst) {
                    break;
                }
            }
        });
        Some(key_rx)
    } else {
        None
    };

    if output_format == OutputFormat::Human {
        eprintln!("watching; a = run all, f = run failed, q = quit");
    }

    controller.watch(&mut renderer, cancel, keys)?;

    let stats = controller.cache_stats();
    if output_format == OutputFormat::Json {
        println!("{}", serde_json::to_string(&stats)?);
    } else {
        eprintln!(
            "cache: {} entries, {} hits, {} misses",
            stats.entries, stats.hits, stats.misses
        );
    }
    println!("SHUTDOWN");
    Ok(())
}
