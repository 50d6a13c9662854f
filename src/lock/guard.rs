//! RAII guard for a held lock.

use super::Lock;
use crate::error::Result;
use std::path::Path;
use tracing::warn;

/// Releases its lock when dropped.
///
/// If release fails during drop, a warning is logged but no panic occurs.
/// Call [`LockGuard::release`] to handle the error instead.
#[derive(Debug)]
pub struct LockGuard<'a> {
    lock: &'a Lock,
    released: bool,
}

impl<'a> LockGuard<'a> {
    pub(super) fn new(lock: &'a Lock) -> Self {
        Self {
            lock,
            released: false,
        }
    }

    /// Get the path to the lock directory.
    pub fn path(&self) -> &Path {
        self.lock.path()
    }

    /// Manually release the lock, reporting failures.
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.lock.release()
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        if !self.released
            && let Err(e) = self.lock.release()
        {
            warn!(lock = %self.lock.path().display(), error = %e, "failed to release lock");
        }
    }
}
