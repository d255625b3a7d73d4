//! Vigil CLI - interactive, cache-aware test watcher
//!
//! Usage: vigil <command> [arguments]

mod cli;
mod console;
mod run_cmd;
mod version;
mod watch_cmd;

use std::process::ExitCode;

use cli::{parse_args, Command};
use run_cmd::run_run;
use watch_cmd::run_watch;

fn print_short_usage() {
    cli::print_short_usage();
}

fn print_full_usage() {
    cli::print_full_usage();
}

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();

    // Handle help flags before parsing
    if args.len() >= 2 {
        match args[1].as_str() {
            "--help" | "-h" => {
                print_short_usage();
                return ExitCode::SUCCESS;
            }
            "--help-full" | "-H" => {
                print_full_usage();
                return ExitCode::SUCCESS;
            }
            _ => {}
        }
    }

    if args.len() < 2 {
        print_short_usage();
        return ExitCode::from(1);
    }

    match parse_args() {
        Ok(Command::Version) => {
            println!("{}", version::version());
            ExitCode::SUCCESS
        }
        Ok(Command::Run {
            config,
            output_format,
        }) => match run_run(config, output_format) {
            Ok(true) => ExitCode::SUCCESS,
            Ok(false) => ExitCode::from(1),
            Err(e) => {
                eprintln!("Error: {}", e);
                ExitCode::from(2)
            }
        },
        Ok(Command::Watch {
            config,
            output_format,
            interactive,
        }) => {
            if let Err(e) = run_watch(config, output_format, interactive) {
                eprintln!("Error: {}", e);
                return ExitCode::from(1);
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            print_short_usage();
            ExitCode::from(1)
        }
    }
}
