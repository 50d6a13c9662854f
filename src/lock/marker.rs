//! Marker files: the proof of lock ownership.
//!
//! A marker is named `<prefix>_<hostname>_<pid>_<nonce>`. The nonce is 8
//! random alphanumeric characters, so two holders in the same process (or on
//! hosts with the same name and a recycled pid) still get distinct names.
//!
//! The marker body is JSON metadata for operators. Nothing in the locking
//! protocol reads it.

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use rand::distr::Alphanumeric;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;

/// Length of the random nonce in a marker name.
pub const NONCE_LEN: usize = 8;

/// The name of this holder's marker file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerName {
    name: String,
}

impl MarkerName {
    /// Generate a fresh marker name for this process.
    pub fn generate(prefix: &str) -> Self {
        let nonce: String = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(NONCE_LEN)
            .map(char::from)
            .collect();
        Self::from_parts(prefix, &hostname_component(), std::process::id(), &nonce)
    }

    fn from_parts(prefix: &str, host: &str, pid: u32, nonce: &str) -> Self {
        Self {
            name: format!("{}_{}_{}_{}", prefix, host, pid, nonce),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.name
    }

    /// Whether `entry` follows the marker naming convention for `prefix`.
    ///
    /// Only the name is checked; see `Lock::break_lock`.
    pub fn is_marker(entry: &str, prefix: &str) -> bool {
        entry
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('_'))
    }

    /// Split a marker name into host, pid and nonce.
    ///
    /// Host names may contain underscores, so the name is split from the
    /// right. Returns `None` for names that do not have all three parts.
    pub fn parse<'a>(entry: &'a str, prefix: &str) -> Option<MarkerParts<'a>> {
        let rest = entry.strip_prefix(prefix)?.strip_prefix('_')?;
        let mut parts = rest.rsplitn(3, '_');
        let nonce = parts.next()?;
        let pid = parts.next()?.parse().ok()?;
        let host = parts.next()?;
        Some(MarkerParts { host, pid, nonce })
    }
}

impl fmt::Display for MarkerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// The components of a parsed marker name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarkerParts<'a> {
    pub host: &'a str,
    pub pid: u32,
    pub nonce: &'a str,
}

/// Host name made safe for use inside a file name.
fn hostname_component() -> String {
    let host = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    let cleaned: String = host
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '\0' => '-',
            c => c,
        })
        .collect();

    if cleaned.is_empty() {
        "unknown".to_string()
    } else {
        cleaned
    }
}

/// Metadata written into a marker file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkerMetadata {
    /// Owner of the lock (e.g., `user@HOST`).
    pub owner: String,

    /// Process ID of the lock holder.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,

    /// Timestamp when the lock was acquired (RFC3339).
    pub created_at: DateTime<Utc>,
}

impl MarkerMetadata {
    /// Create new marker metadata with the current timestamp.
    pub fn new() -> Self {
        Self {
            owner: get_owner_string(),
            pid: Some(std::process::id()),
            created_at: Utc::now(),
        }
    }

    /// Parse marker metadata from a file.
    ///
    /// Returns `None` when the file is missing, empty or not valid metadata;
    /// an unreadable body never makes a marker invalid.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Option<Self> {
        let content = fs::read_to_string(path).ok()?;
        serde_json::from_str(&content).ok()
    }

    /// Serialize marker metadata to a JSON string.
    pub fn to_json(&self) -> String {
        // Plain strings, an integer and a timestamp always serialize.
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    /// Calculate the age of the lock.
    pub fn age(&self) -> Duration {
        Utc::now().signed_duration_since(self.created_at)
    }

    /// Format the age as a human-readable string.
    pub fn age_string(&self) -> String {
        let age = self.age();
        let seconds = age.num_seconds();
        let minutes = age.num_minutes();
        let hours = age.num_hours();
        let days = age.num_days();

        if days > 0 {
            format!("{}d {}h", days, hours % 24)
        } else if hours > 0 {
            format!("{}h {}m", hours, minutes % 60)
        } else if minutes > 0 {
            format!("{}m {}s", minutes, seconds % 60)
        } else {
            format!("{}s", seconds.max(0))
        }
    }
}

impl Default for MarkerMetadata {
    fn default() -> Self {
        Self::new()
    }
}

/// Get the owner string for marker metadata.
fn get_owner_string() -> String {
    let user = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string());

    let host = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    format!("{}@{}", user, host)
}
