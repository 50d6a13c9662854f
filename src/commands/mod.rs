//! Command implementations for atomicfile.
//!
//! This module resolves the effective configuration and routes CLI commands
//! to their implementations. Every command returns the process exit code on
//! success; failures are `AtomicError`s mapped by `main`.

mod edit;
mod lock;

use crate::cli::{Command, GlobalArgs, LockAction, LockCommand};
use atomicfile::config::{Config, LogFormat};
use atomicfile::error::{AtomicError, Result};

/// Build the configuration for this invocation.
///
/// Starts from `--config` (or the defaults), applies flag overrides, and
/// validates the result.
pub fn resolve_config(global: &GlobalArgs) -> Result<Config> {
    let mut config = match &global.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    if let Some(timeout) = global.timeout {
        config.lock.timeout = timeout;
    }
    if let Some(retry_interval) = global.retry_interval {
        config.lock.retry_interval = retry_interval;
    }
    if global.autobreak {
        config.lock.autobreak = true;
    }
    if let Some(filter) = &global.log_level {
        config.log_filter = filter.clone();
    }
    if let Some(format) = &global.log_format {
        config.log_format = LogFormat::from_str(format).ok_or_else(|| {
            AtomicError::UserError(format!(
                "invalid log format '{}': expected 'compact' or 'json'",
                format
            ))
        })?;
    }

    config.validate()?;
    Ok(config)
}

/// Dispatch a command to its implementation.
pub fn dispatch(command: Command, config: &Config) -> Result<i32> {
    match command {
        Command::Lock(lock_cmd) => dispatch_lock(lock_cmd, config),
        Command::Append(args) => edit::cmd_append(args, config),
        Command::Remove(args) => edit::cmd_remove(args, config),
        Command::Replace(args) => edit::cmd_replace(args, config),
        Command::Write(args) => edit::cmd_write(args, config),
    }
}

/// Dispatch lock subcommands.
fn dispatch_lock(lock_cmd: LockCommand, config: &Config) -> Result<i32> {
    match lock_cmd.action {
        LockAction::Status(args) => lock::cmd_lock_status(args, config),
        LockAction::Break(args) => lock::cmd_lock_break(args, config),
        LockAction::Run(args) => lock::cmd_lock_run(args, config),
    }
}
