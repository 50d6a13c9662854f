//! Atomic replace of a file by its staged sibling.
//!
//! A commit writes to a staging file, syncs it to disk, then renames it over
//! the target. Readers that open the target see either the old or the new
//! content, never a mix, because the rename is a single metadata operation.
//!
//! # Important Notes
//!
//! - Source and destination must be on the same filesystem/volume. A
//!   cross-device rename is refused by the OS and reported as such; there is
//!   no copy fallback because a copy is not atomic.
//! - A failed rename leaves the staging file in place. It holds the only copy
//!   of the new content, so it is never deleted automatically.

use crate::error::{AtomicError, Result};
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Append `suffix` to the final component of `path`.
///
/// `with_suffix("keys", ".tmp")` is `keys.tmp`; the extension of `path`, if
/// any, is kept.
pub fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// Atomically replace `target` with `source`.
///
/// On success `source` no longer exists. On failure both paths are left as
/// they were and the error is `AtomicError::CommitStranded`.
pub fn atomic_replace(source: &Path, target: &Path) -> Result<()> {
    // On POSIX, rename() replaces the destination in one step. On Windows the
    // standard library uses MoveFileExW with MOVEFILE_REPLACE_EXISTING.
    if let Err(e) = fs::rename(source, target) {
        if is_cross_device_rename(&e) {
            warn!(
                source = %source.display(),
                target = %target.display(),
                "staging file and target are on different filesystems"
            );
        }
        return Err(AtomicError::CommitStranded {
            target: target.to_path_buf(),
            temp: source.to_path_buf(),
            source: e,
        });
    }

    sync_parent_dir(target);
    Ok(())
}

/// Persist the directory entry created by the rename.
///
/// Best effort: some filesystems refuse to fsync a directory, and the rename
/// itself has already happened.
#[cfg(unix)]
fn sync_parent_dir(target: &Path) {
    let parent = match target.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    if let Ok(dir) = fs::File::open(parent)
        && let Err(e) = dir.sync_all()
    {
        warn!(dir = %parent.display(), error = %e, "failed to sync directory after rename");
    }
}

#[cfg(not(unix))]
fn sync_parent_dir(_target: &Path) {}

fn is_cross_device_rename(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::CrossesDevices || err.raw_os_error() == Some(18)
}
