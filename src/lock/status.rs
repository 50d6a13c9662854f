//! Read-only inspection of a lock directory.

use super::marker::{MarkerMetadata, MarkerName};
use crate::error::{AtomicError, Result};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// One entry found inside a lock directory.
#[derive(Debug, Clone)]
pub enum LockEntry {
    /// A file following the marker naming convention.
    Marker {
        name: String,
        host: Option<String>,
        pid: Option<u32>,
        metadata: Option<MarkerMetadata>,
    },
    /// Anything else. Its presence blocks a non-forced break.
    Foreign { name: String },
}

impl LockEntry {
    pub fn name(&self) -> &str {
        match self {
            LockEntry::Marker { name, .. } | LockEntry::Foreign { name } => name,
        }
    }

    pub fn is_marker(&self) -> bool {
        matches!(self, LockEntry::Marker { .. })
    }
}

impl fmt::Display for LockEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockEntry::Marker {
                name,
                host,
                pid,
                metadata,
            } => {
                write!(f, "{}", name)?;
                match metadata {
                    Some(meta) => write!(f, " (owner: {}, age: {}", meta.owner, meta.age_string())?,
                    None => write!(f, " (host: {}", host.as_deref().unwrap_or("?"))?,
                }
                if let Some(pid) = pid.or(metadata.as_ref().and_then(|m| m.pid)) {
                    write!(f, ", pid: {}", pid)?;
                }
                write!(f, ")")
            }
            LockEntry::Foreign { name } => write!(f, "{} (NOT A LOCK MARKER)", name),
        }
    }
}

/// The observed state of a lock directory.
#[derive(Debug, Clone)]
pub enum LockStatus {
    /// The lock directory does not exist.
    Unlocked { path: PathBuf },
    /// The lock directory exists; `entries` lists its contents sorted by name.
    Locked { path: PathBuf, entries: Vec<LockEntry> },
}

impl LockStatus {
    pub fn is_locked(&self) -> bool {
        matches!(self, LockStatus::Locked { .. })
    }

    pub fn entries(&self) -> &[LockEntry] {
        match self {
            LockStatus::Unlocked { .. } => &[],
            LockStatus::Locked { entries, .. } => entries,
        }
    }

    /// Whether the lock directory contains entries that are not markers.
    pub fn has_foreign_entries(&self) -> bool {
        self.entries().iter().any(|e| !e.is_marker())
    }
}

/// List what is inside `lock_path` without changing anything.
pub fn inspect(lock_path: &Path, prefix: &str) -> Result<LockStatus> {
    let dir = match fs::read_dir(lock_path) {
        Ok(dir) => dir,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Ok(LockStatus::Unlocked {
                path: lock_path.to_path_buf(),
            });
        }
        Err(e) => return Err(AtomicError::io("read lock directory", lock_path, e)),
    };

    let mut entries = Vec::new();
    for entry in dir {
        let entry = entry.map_err(|e| AtomicError::io("read lock directory", lock_path, e))?;
        let name = entry.file_name().to_string_lossy().to_string();
        let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);

        if is_file && MarkerName::is_marker(&name, prefix) {
            let parts = MarkerName::parse(&name, prefix);
            entries.push(LockEntry::Marker {
                host: parts.map(|p| p.host.to_string()),
                pid: parts.map(|p| p.pid),
                metadata: MarkerMetadata::from_file(entry.path()),
                name,
            });
        } else {
            entries.push(LockEntry::Foreign { name });
        }
    }

    // Sort by name for consistent output
    entries.sort_by(|a, b| a.name().cmp(b.name()));

    Ok(LockStatus::Locked {
        path: lock_path.to_path_buf(),
        entries,
    })
}
