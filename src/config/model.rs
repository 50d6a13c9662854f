//! Config struct definition and default implementation.

use super::types::*;
use serde::{Deserialize, Serialize};

/// Configuration for locks, transactions and logging.
///
/// Unknown fields in the YAML are ignored for forward compatibility.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Suffix appended to a target path to name its lock directory.
    #[serde(default = "default_lock_ext")]
    pub lock_ext: String,

    /// Lock acquisition settings.
    pub lock: LockOptions,

    /// Transaction settings.
    pub transaction: TransactionOptions,

    // =========================================================================
    // Logging settings
    // =========================================================================
    /// `tracing` filter directive for the CLI (e.g. `info`, `atomicfile=debug`).
    #[serde(default = "default_log_filter")]
    pub log_filter: String,

    /// Format of log lines written to stderr.
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            lock_ext: default_lock_ext(),
            lock: LockOptions::default(),
            transaction: TransactionOptions::default(),
            log_filter: default_log_filter(),
            log_format: LogFormat::default(),
        }
    }
}
