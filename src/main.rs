//! atomicfile: locked, crash-safe edits of shared files.
//!
//! This is the main entry point for the `atomicfile` CLI. It parses
//! arguments, resolves configuration, installs logging, dispatches to the
//! appropriate command handler, and maps errors to exit codes.

mod cli;
mod commands;

use atomicfile::error::AtomicError;
use atomicfile::{exit_codes, telemetry};
use cli::Cli;
use std::process::ExitCode;

fn main() -> ExitCode {
    let cli = Cli::parse_args();

    let config = match commands::resolve_config(&cli.global) {
        Ok(config) => config,
        Err(err) => return report(err),
    };

    if let Err(err) = telemetry::initialise(&config.log_filter, config.log_format) {
        eprintln!("Error: {}", err);
        return ExitCode::from(exit_codes::USER_ERROR as u8);
    }

    match commands::dispatch(cli.command, &config) {
        Ok(code) => ExitCode::from(u8::try_from(code).unwrap_or(exit_codes::USER_ERROR as u8)),
        Err(err) => report(err),
    }
}

/// Print a user-actionable message to stderr and pick the exit code.
fn report(err: AtomicError) -> ExitCode {
    match &err {
        AtomicError::NotChanged(message) => eprintln!("{}", message),
        _ => eprintln!("Error: {}", err),
    }
    ExitCode::from(err.exit_code() as u8)
}
