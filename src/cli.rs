//! CLI argument parsing for Vigil
//!
//! Defines the Command enum and parse_args() function for all CLI commands.

use anyhow::Result;
use std::path::PathBuf;
use std::time::Duration;
use vigil::WatchConfig;

/// Output format for command results
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Human,
    Json,
}

/// Parsed CLI command
#[derive(Debug)]
pub enum Command {
    Run {
        config: WatchConfig,
        output_format: OutputFormat,
    },
    Watch {
        config: WatchConfig,
        output_format: OutputFormat,
        interactive: bool,
    },
    Version,
}

pub fn print_short_usage() {
    eprintln!("Vigil - interactive, cache-aware test watcher");
    eprintln!();
    eprintln!("Usage:");
    eprintln!("  vigil <command> [arguments]");
    eprintln!("  vigil --help");
    eprintln!();
    eprintln!("  vigil run [--root <DIR>]... [--exclude <GLOB>]... [--tool <CMD>] [--output <FORMAT>]");
    eprintln!("  vigil watch [--root <DIR>]... [--exclude <GLOB>]... [--debounce-ms <N>] [--no-interactive]");
    eprintln!("  vigil version");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  run      Run tests once over every discovered package");
    eprintln!("  watch    Watch for changes and re-run affected tests");
    eprintln!("  version  Show version and build information");
    eprintln!();
    eprintln!("Run `vigil --help-full` for all arguments.");
}

pub fn print_full_usage() {
    print_short_usage();
    eprintln!();
    eprintln!("Global arguments:");
    eprintln!("  --root <DIR>         Directory to watch recursively (repeatable; default: .)");
    eprintln!("  --exclude <GLOB>     Ignore pattern, ** supported (repeatable)");
    eprintln!("  --tool <CMD>         Test command producing the JSON event stream");
    eprintln!("                       (default: \"go test -json\")");
    eprintln!("  --test-suffix <S>    Test file suffix (default: _test.go)");
    eprintln!("  --timeout-sec <N>    Per-run timeout in seconds (default: 300)");
    eprintln!("  --context-lines <N>  Source lines shown around error locations (default: 5)");
    eprintln!("  --output <FORMAT>    Output format: human (default) or json");
    eprintln!();
    eprintln!("Watch arguments:");
    eprintln!("  --debounce-ms <N>    Debounce quiet interval in milliseconds (default: 250)");
    eprintln!("  --no-gitignore       Disable .gitignore-aware filtering");
    eprintln!("  --no-interactive     Disable the a/f/q key commands");
}

/// Parse process arguments into a Command.
pub fn parse_args() -> Result<Command> {
    let args: Vec<String> = std::env::args().collect();
    parse_arg_list(&args[1..])
}

/// Parse an argument slice (exposed for tests).
pub fn parse_arg_list(args: &[String]) -> Result<Command> {
    let Some((command, rest)) = args.split_first() else {
        anyhow::bail!("missing command");
    };

    match command.as_str() {
        "version" | "--version" | "-V" => Ok(Command::Version),
        "run" => {
            let (config, output_format, _) = parse_common(rest)?;
            Ok(Command::Run {
                config,
                output_format,
            })
        }
        "watch" => {
            let (config, output_format, interactive) = parse_common(rest)?;
            Ok(Command::Watch {
                config,
                output_format,
                interactive,
            })
        }
        other => anyhow::bail!("unknown command: {}", other),
    }
}

fn parse_common(args: &[String]) -> Result<(WatchConfig, OutputFormat, bool)> {
    let mut config = WatchConfig::default();
    let mut roots: Vec<PathBuf> = Vec::new();
    let mut excludes: Vec<String> = Vec::new();
    let mut output_format = OutputFormat::Human;
    let mut interactive = true;

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--root" => roots.push(PathBuf::from(required(&mut iter, "--root")?)),
            "--exclude" => excludes.push(required(&mut iter, "--exclude")?),
            "--tool" => {
                let tool = required(&mut iter, "--tool")?;
                let parts: Vec<String> = tool.split_whitespace().map(String::from).collect();
                if parts.is_empty() {
                    anyhow::bail!("--tool requires a non-empty command");
                }
                config.tool = parts;
            }
            "--test-suffix" => config.test_suffix = required(&mut iter, "--test-suffix")?,
            "--debounce-ms" => {
                let value: u64 = required(&mut iter, "--debounce-ms")?.parse()?;
                config.debounce_interval = Duration::from_millis(value);
            }
            "--timeout-sec" => {
                let value: u64 = required(&mut iter, "--timeout-sec")?.parse()?;
                config.run_timeout = Duration::from_secs(value);
            }
            "--context-lines" => {
                config.context_lines = required(&mut iter, "--context-lines")?.parse()?;
            }
            "--no-gitignore" => config.gitignore_aware = false,
            "--no-interactive" => interactive = false,
            "--output" => {
                output_format = match required(&mut iter, "--output")?.as_str() {
                    "human" => OutputFormat::Human,
                    "json" => OutputFormat::Json,
                    other => anyhow::bail!("unknown output format: {}", other),
                };
            }
            other => anyhow::bail!("unknown argument: {}", other),
        }
    }

    if !roots.is_empty() {
        config.roots = roots;
    }
    config.ignore_patterns.extend(excludes);
    Ok((config, output_format, interactive))
}

fn required(iter: &mut std::slice::Iter<'_, String>, flag: &str) -> Result<String> {
    iter.next()
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("{} requires a value", flag))
}
