//! Directory-based advisory locks.
//!
//! A lock is a directory. Creating a directory is atomic on every POSIX
//! filesystem and over NFS, where byte-range and `flock` locks are not
//! reliable. The directory alone says nothing about who owns it, so the
//! holder also creates a uniquely named marker file inside it.
//!
//! # Protocol
//!
//! - **acquire**: `mkdir lock_path`, then create `lock_path/<marker>`. If the
//!   directory exists, the holder owns the lock only if its own marker is
//!   inside; otherwise it sleeps `retry_interval` and tries again until
//!   `timeout` expires.
//! - **release**: remove the marker, then the (now empty) directory.
//! - **break**: remove the directory of a holder that never released it.
//!
//! The lock is advisory: only processes that follow this protocol are
//! excluded. There is no fairness among waiters.
//!
//! # Scoped use
//!
//! `Lock::guard` returns a `LockGuard` that releases when dropped, and
//! `Lock::hold` runs a closure with the lock held.

mod guard;
mod marker;
mod status;


pub use guard::LockGuard;
pub use marker::{MarkerMetadata, MarkerName, MarkerParts, NONCE_LEN};
pub use status::{LockEntry, LockStatus, inspect};

use crate::config::LockOptions;
use crate::error::{AtomicError, Result};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{LazyLock, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Serializes the check-and-create step of acquisition within this process.
///
/// Threads sharing one `Lock` would otherwise both observe "not acquired"
/// and race on the marker. Never held while sleeping.
static ACQUIRE_GATE: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

/// Per-call overrides for `Lock::acquire_with`.
///
/// `None` fields fall back to the lock's `LockOptions`.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcquireOptions {
    pub timeout: Option<Duration>,
    pub retry_interval: Option<Duration>,
    pub autobreak: Option<bool>,
}

/// Outcome of a single acquisition attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attempt {
    Acquired,
    AlreadyHeld,
    Busy,
}

/// A directory lock held by this process.
///
/// Constructing a `Lock` touches nothing on disk.
#[derive(Debug)]
pub struct Lock {
    lock_path: PathBuf,
    marker: MarkerName,
    options: LockOptions,
}

impl Lock {
    /// Create a lock on `lock_path` with a fresh marker name.
    pub fn new<P: Into<PathBuf>>(lock_path: P, options: LockOptions) -> Self {
        let marker = MarkerName::generate(&options.marker_prefix);
        Self {
            lock_path: lock_path.into(),
            marker,
            options,
        }
    }

    pub fn path(&self) -> &Path {
        &self.lock_path
    }

    pub fn marker(&self) -> &MarkerName {
        &self.marker
    }

    pub fn options(&self) -> &LockOptions {
        &self.options
    }

    /// Path of this holder's marker file.
    pub fn marker_path(&self) -> PathBuf {
        self.lock_path.join(self.marker.as_str())
    }

    /// Whether this holder's marker currently exists.
    pub fn acquired(&self) -> bool {
        fs::symlink_metadata(self.marker_path()).is_ok()
    }

    /// Acquire with the configured options.
    pub fn acquire(&self) -> Result<()> {
        self.acquire_with(AcquireOptions::default())
    }

    /// Acquire the lock, waiting up to the timeout.
    ///
    /// Returns immediately if this holder already owns the lock. When the
    /// timeout passes and `autobreak` is set, the lock is broken with
    /// `break_lock(false)` and the timeout starts again.
    ///
    /// # Errors
    ///
    /// * `AtomicError::LockTimeout` - still held by someone else after the timeout
    /// * `AtomicError::LockIntegrity` - autobreak found a non-marker entry
    /// * `AtomicError::Io` - any other filesystem failure
    pub fn acquire_with(&self, overrides: AcquireOptions) -> Result<()> {
        let timeout = overrides.timeout.unwrap_or_else(|| self.options.timeout());
        let retry_interval = overrides
            .retry_interval
            .unwrap_or_else(|| self.options.retry_interval());
        let autobreak = overrides.autobreak.unwrap_or(self.options.autobreak);

        let started = Instant::now();
        let mut deadline = started + timeout;

        loop {
            match self.try_acquire()? {
                Attempt::Acquired => {
                    info!(
                        lock = %self.lock_path.display(),
                        marker = %self.marker,
                        waited_ms = millis(started.elapsed()),
                        "acquired lock"
                    );
                    return Ok(());
                }
                Attempt::AlreadyHeld => {
                    debug!(lock = %self.lock_path.display(), "lock already held by this holder");
                    return Ok(());
                }
                Attempt::Busy => {}
            }

            let now = Instant::now();
            if now > deadline {
                if autobreak {
                    warn!(
                        lock = %self.lock_path.display(),
                        timeout_ms = millis(timeout),
                        "breaking lock held past timeout"
                    );
                    self.break_lock(false)?;
                    deadline = Instant::now() + timeout;
                    continue;
                }
                return Err(AtomicError::LockTimeout {
                    path: self.lock_path.clone(),
                    waited: now.duration_since(started),
                });
            }

            debug!(lock = %self.lock_path.display(), "lock busy, retrying");
            thread::sleep(retry_interval);
        }
    }

    /// One mkdir-then-marker attempt.
    fn try_acquire(&self) -> Result<Attempt> {
        let _gate = ACQUIRE_GATE.lock().unwrap_or_else(PoisonError::into_inner);

        match fs::create_dir(&self.lock_path) {
            Ok(()) => match self.write_marker() {
                Ok(()) => Ok(Attempt::Acquired),
                // The directory was broken between mkdir and marker creation.
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Attempt::Busy),
                Err(e) => {
                    let _ = fs::remove_file(self.marker_path());
                    let _ = fs::remove_dir(&self.lock_path);
                    Err(AtomicError::io("create lock marker", self.marker_path(), e))
                }
            },
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                if self.acquired() {
                    Ok(Attempt::AlreadyHeld)
                } else {
                    Ok(Attempt::Busy)
                }
            }
            Err(e) => Err(AtomicError::io("create lock directory", &self.lock_path, e)),
        }
    }

    fn write_marker(&self) -> io::Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(self.marker_path())?;
        file.write_all(MarkerMetadata::new().to_json().as_bytes())?;
        file.sync_all()
    }

    /// Release the lock if this holder owns it.
    ///
    /// A no-op when the marker is absent: never acquired, already released,
    /// or broken by another process.
    pub fn release(&self) -> Result<()> {
        if !self.acquired() {
            return Ok(());
        }

        let marker_path = self.marker_path();
        fs::remove_file(&marker_path)
            .or_else(ignore_not_found)
            .map_err(|e| AtomicError::io("remove lock marker", &marker_path, e))?;
        fs::remove_dir(&self.lock_path)
            .or_else(ignore_not_found)
            .map_err(|e| AtomicError::io("remove lock directory", &self.lock_path, e))?;

        info!(lock = %self.lock_path.display(), "released lock");
        Ok(())
    }

    /// List the markers (and any foreign entries) in this lock's directory.
    pub fn holders(&self) -> Result<LockStatus> {
        inspect(&self.lock_path, &self.options.marker_prefix)
    }

    /// Break this lock's directory regardless of who holds it.
    ///
    /// See [`break_lock`].
    pub fn break_lock(&self, force: bool) -> Result<()> {
        break_lock(&self.lock_path, &self.options.marker_prefix, force)
    }

    /// Acquire and return a guard that releases on drop.
    pub fn guard(&self) -> Result<LockGuard<'_>> {
        self.acquire()?;
        Ok(LockGuard::new(self))
    }

    /// Run `f` with the lock held.
    ///
    /// The lock is released on every exit path. A release failure is
    /// reported when `f` succeeded; when `f` failed its error wins.
    pub fn hold<T, E, F>(&self, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce() -> std::result::Result<T, E>,
        E: From<AtomicError>,
    {
        let guard = self.guard()?;
        let outcome = f();
        let released = guard.release();
        let value = outcome?;
        released?;
        Ok(value)
    }
}

/// Remove a lock directory that may belong to another holder.
///
/// With `force`, the directory and everything in it is deleted. Without it,
/// the directory is deleted only if every entry is a file whose name matches
/// the marker convention for `prefix`; otherwise nothing is touched and
/// `AtomicError::LockIntegrity` names the first offending entry.
///
/// A missing lock directory is not an error.
///
/// Breaking a lock whose holder is still running lets two processes into the
/// critical section. Use it for holders known to be dead.
pub fn break_lock(lock_path: &Path, prefix: &str, force: bool) -> Result<()> {
    if force {
        fs::remove_dir_all(lock_path)
            .or_else(ignore_not_found)
            .map_err(|e| AtomicError::io("remove lock directory", lock_path, e))?;
        warn!(lock = %lock_path.display(), "force-broke lock");
        return Ok(());
    }

    let entries = match fs::read_dir(lock_path) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(AtomicError::io("read lock directory", lock_path, e)),
    };

    let mut markers = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| AtomicError::io("read lock directory", lock_path, e))?;
        let name = entry.file_name().to_string_lossy().to_string();
        let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
        if !is_file || !MarkerName::is_marker(&name, prefix) {
            return Err(AtomicError::LockIntegrity {
                path: lock_path.to_path_buf(),
                entry: name,
            });
        }
        markers.push(entry.path());
    }

    for marker in &markers {
        fs::remove_file(marker)
            .or_else(ignore_not_found)
            .map_err(|e| AtomicError::io("remove lock marker", marker, e))?;
    }
    fs::remove_dir(lock_path)
        .or_else(ignore_not_found)
        .map_err(|e| AtomicError::io("remove lock directory", lock_path, e))?;

    warn!(lock = %lock_path.display(), markers = markers.len(), "broke lock");
    Ok(())
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn ignore_not_found(e: io::Error) -> io::Result<()> {
    if e.kind() == io::ErrorKind::NotFound {
        Ok(())
    } else {
        Err(e)
    }
}
