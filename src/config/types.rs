//! Option groups and defaults used by the Config struct.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Output format for log lines written to stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable single line output.
    #[default]
    Compact,
    /// Structured JSON suitable for ingestion by logging stacks.
    Json,
}

impl LogFormat {
    /// Parse a log format from a string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "compact" => Some(Self::Compact),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// Options controlling lock acquisition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockOptions {
    /// Seconds `acquire()` waits before failing (or breaking, with `autobreak`).
    pub timeout: f64,

    /// Seconds slept between acquisition attempts.
    pub retry_interval: f64,

    /// Break a lock that is still held after `timeout` instead of failing.
    ///
    /// This trades safety for liveness: if the original holder is still
    /// alive it keeps running without the lock, and two processes may write
    /// concurrently. Only enable it when holders are known to die rather
    /// than stall.
    pub autobreak: bool,

    /// Prefix of marker file names inside the lock directory.
    pub marker_prefix: String,
}

impl LockOptions {
    /// The acquisition timeout as a `Duration`.
    pub fn timeout(&self) -> Duration {
        seconds(self.timeout)
    }

    /// The retry interval as a `Duration`.
    pub fn retry_interval(&self) -> Duration {
        seconds(self.retry_interval)
    }
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            retry_interval: default_retry_interval(),
            autobreak: false,
            marker_prefix: default_marker_prefix(),
        }
    }
}

/// Options controlling a file transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionOptions {
    /// Suffix appended to the target path to name the staging file.
    pub tmp_ext: String,

    /// Binary mode skips the UTF-8 check on the original content.
    pub binary: bool,

    /// Commit decision used when `close` is called without an explicit one.
    pub autocommit: bool,
}

impl Default for TransactionOptions {
    fn default() -> Self {
        Self {
            tmp_ext: default_tmp_ext(),
            binary: false,
            autocommit: false,
        }
    }
}

/// Convert non-negative finite seconds into a `Duration`.
///
/// Values that `validate` would reject collapse to zero.
fn seconds(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}

pub fn default_timeout() -> f64 {
    5.0
}

pub fn default_retry_interval() -> f64 {
    0.1
}

pub fn default_marker_prefix() -> String {
    "lock".to_string()
}

pub fn default_tmp_ext() -> String {
    ".tmp".to_string()
}

pub fn default_lock_ext() -> String {
    ".lock".to_string()
}

pub fn default_log_filter() -> String {
    "warn".to_string()
}
