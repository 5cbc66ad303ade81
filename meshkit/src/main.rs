mod cli;
mod commands;
mod output;
mod utils;

use clap::Parser;
use meshkit_core::SessionError;
use meshkit_core::settings::{self, ENV_VERBOSE};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::cli::{Cli, DEFAULT_ENV_FILE};
use crate::commands::handle_command;
use crate::utils::print_error;

#[tokio::main]
async fn main() -> ExitCode {
    // The .env file feeds clap's env fallbacks, so it is loaded before parsing
    let args = std::env::args_os().map(|a| a.to_string_lossy().into_owned());
    let env_loaded = settings::load_env_file(&env_file_from_args(args));

    // Parse command line arguments; clap's own exit code 2 would read as a
    // connection failure
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return ExitCode::from(usage_exit_code(&e));
        }
    };

    // Set up logging
    setup_logging(&cli);

    if let Err(e) = env_loaded {
        print_error(&format!("{e:#}"));
        return ExitCode::from(1);
    }

    // Handle the command
    match handle_command(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            print_error(&format!("{e:#}"));
            ExitCode::from(exit_code(&e))
        }
    }
}

fn setup_logging(cli: &Cli) {
    let filter_level = if cli.debug {
        "debug"
    } else if cli.verbose || settings::env_flag(ENV_VERBOSE) {
        "info"
    } else {
        "warn"
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "{filter_level},meshtastic::connections::stream_buffer=warn"
        ))
    });

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();
}

/// Exit code of the first [`SessionError`] in the chain, 1 otherwise
fn exit_code(err: &anyhow::Error) -> u8 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<SessionError>())
        .map(SessionError::exit_code)
        .unwrap_or(1)
}

/// Help and version requests succeed; real usage errors exit with 1
fn usage_exit_code(err: &clap::Error) -> u8 {
    if err.use_stderr() { 1 } else { 0 }
}

/// Find `--env-file` ahead of clap
fn env_file_from_args(args: impl IntoIterator<Item = String>) -> PathBuf {
    let mut args = args.into_iter().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--env-file" {
            if let Some(path) = args.next() {
                return PathBuf::from(path);
            }
        } else if let Some(path) = arg.strip_prefix("--env-file=") {
            return PathBuf::from(path);
        }
    }
    PathBuf::from(DEFAULT_ENV_FILE)
}
