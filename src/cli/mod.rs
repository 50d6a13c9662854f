//! CLI argument parsing for atomicfile.
//!
//! Uses clap derive macros for declarative argument definitions.
//! This module defines the command structure; actual implementations
//! are in the `commands` module.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// atomicfile: locked, all-or-nothing edits of shared files.
///
/// Every edit takes a directory lock next to the file (`<file>.lock`),
/// stages the new content in `<file>.tmp`, and renames it into place only
/// when the edit succeeds.
#[derive(Parser, Debug)]
#[command(name = "atomicfile")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Options shared by every command. Flags override the config file.
#[derive(Parser, Debug, Default)]
pub struct GlobalArgs {
    /// YAML config file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Seconds to wait for a lock before giving up.
    #[arg(long, global = true)]
    pub timeout: Option<f64>,

    /// Seconds between lock attempts.
    #[arg(long, global = true)]
    pub retry_interval: Option<f64>,

    /// Break a lock still held after the timeout (unsafe if its holder is alive).
    #[arg(long, global = true)]
    pub autobreak: bool,

    /// Log filter directive (e.g. `info`, `atomicfile=debug`).
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Log format: compact or json.
    #[arg(long, global = true)]
    pub log_format: Option<String>,
}

/// Available commands for atomicfile.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Lock management commands.
    ///
    /// Inspect, break, or hold a lock directory.
    Lock(LockCommand),

    /// Append a line to a file.
    Append(AppendArgs),

    /// Remove every line matching a regular expression.
    ///
    /// Exits with status 2 and leaves the file untouched if nothing matched.
    Remove(RemoveArgs),

    /// Replace regular expression matches on every line.
    ///
    /// Exits with status 2 and leaves the file untouched if nothing changed.
    Replace(ReplaceArgs),

    /// Replace the whole file with standard input.
    Write(WriteArgs),
}

/// Arguments for the `lock` command.
#[derive(Parser, Debug)]
pub struct LockCommand {
    #[command(subcommand)]
    pub action: LockAction,
}

/// Lock subcommands.
#[derive(Subcommand, Debug)]
pub enum LockAction {
    /// Show who holds a lock.
    Status(LockPathArgs),

    /// Remove a lock left behind by a dead holder.
    Break(LockBreakArgs),

    /// Run a command while holding a lock.
    Run(LockRunArgs),
}

/// A lock directory argument.
#[derive(Parser, Debug)]
pub struct LockPathArgs {
    /// Lock directory (commonly `<file>.lock`).
    pub lock_dir: PathBuf,
}

/// Arguments for `lock break`.
#[derive(Parser, Debug)]
pub struct LockBreakArgs {
    /// Lock directory to remove.
    pub lock_dir: PathBuf,

    /// Delete the directory even if it contains files that are not lock markers.
    #[arg(long)]
    pub force: bool,
}

/// Arguments for `lock run`.
#[derive(Parser, Debug)]
pub struct LockRunArgs {
    /// Lock directory to hold.
    pub lock_dir: PathBuf,

    /// Command and arguments to run.
    #[arg(last = true, required = true)]
    pub command: Vec<String>,
}

/// Arguments for the `append` command.
#[derive(Parser, Debug)]
pub struct AppendArgs {
    /// File to edit.
    pub file: PathBuf,

    /// Line to append (without trailing newline).
    pub line: String,

    /// Do nothing (exit 2) if an identical line already exists.
    #[arg(long)]
    pub unique: bool,
}

/// Arguments for the `remove` command.
#[derive(Parser, Debug)]
pub struct RemoveArgs {
    /// File to edit.
    pub file: PathBuf,

    /// Regular expression selecting lines to drop.
    pub pattern: String,
}

/// Arguments for the `replace` command.
#[derive(Parser, Debug)]
pub struct ReplaceArgs {
    /// File to edit.
    pub file: PathBuf,

    /// Regular expression to search for on each line.
    pub pattern: String,

    /// Replacement text; `$1`, `${name}` expand capture groups.
    pub replacement: String,
}

/// Arguments for the `write` command.
#[derive(Parser, Debug)]
pub struct WriteArgs {
    /// File to replace.
    pub file: PathBuf,
}

impl Cli {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
