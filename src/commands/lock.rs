//! Implementation of `atomicfile lock` subcommands.

use crate::cli::{LockBreakArgs, LockPathArgs, LockRunArgs};
use atomicfile::config::Config;
use atomicfile::error::{AtomicError, Result};
use atomicfile::exit_codes;
use atomicfile::lock::{self, Lock, LockStatus};
use std::process::{Command, ExitStatus};
use tracing::info;

/// Print who holds a lock directory.
pub fn cmd_lock_status(args: LockPathArgs, config: &Config) -> Result<i32> {
    let status = lock::inspect(&args.lock_dir, &config.lock.marker_prefix)?;

    match &status {
        LockStatus::Unlocked { path } => {
            println!("{}: not locked", path.display());
        }
        LockStatus::Locked { path, entries } => {
            println!("{}: locked", path.display());
            if entries.is_empty() {
                println!("  (no marker: holder is mid-acquire or died before writing one)");
            }
            for entry in entries {
                println!("  {}", entry);
            }
            if status.has_foreign_entries() {
                println!();
                println!("Contains entries that are not lock markers; only 'lock break --force' will remove it.");
            }
        }
    }

    Ok(exit_codes::SUCCESS)
}

/// Break a lock left behind by a dead holder.
pub fn cmd_lock_break(args: LockBreakArgs, config: &Config) -> Result<i32> {
    lock::break_lock(&args.lock_dir, &config.lock.marker_prefix, args.force)?;
    println!("Broke lock '{}'", args.lock_dir.display());
    Ok(exit_codes::SUCCESS)
}

/// Run a command with the lock held and return its exit status.
pub fn cmd_lock_run(args: LockRunArgs, config: &Config) -> Result<i32> {
    let Some((program, rest)) = args.command.split_first() else {
        return Err(AtomicError::UserError("no command given".to_string()));
    };

    let lock = Lock::new(&args.lock_dir, config.lock.clone());
    lock.hold(|| {
        info!(lock = %lock.path().display(), command = %program, "running command under lock");
        let status = Command::new(program)
            .args(rest)
            .status()
            .map_err(|e| AtomicError::io("run command", program, e))?;
        Ok(status_code(status))
    })
}

#[cfg(unix)]
fn status_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(signal)) => 128 + signal,
        (None, None) => exit_codes::USER_ERROR,
    }
}

#[cfg(not(unix))]
fn status_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(exit_codes::USER_ERROR)
}
