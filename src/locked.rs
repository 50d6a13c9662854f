//! A transaction guarded by a lock for its whole lifetime.
//!
//! `LockedTransaction` acquires the lock before the transaction opens and
//! releases it after the transaction closes, on every path:
//!
//! - opening the transaction fails: the lock is released before the error
//!   is returned
//! - `close`/`commit`/`cancel`: the transaction closes, then the lock is
//!   released even if closing failed
//! - dropped while open: cancel, then release
//!
//! ```text
//! Unopened -> Locked+Open -> Locked+Closed -> Unlocked
//! ```
//!
//! # Example
//!
//! ```no_run
//! use atomicfile::config::Config;
//! use atomicfile::locked::LockedTransaction;
//! use std::io::{BufRead, Write};
//!
//! let config = Config::default();
//! let mut tx = LockedTransaction::open("authorized_keys", &config)?;
//! let (input, output) = tx.split()?;
//! for line in input.lines() {
//!     writeln!(output, "{}", line?)?;
//! }
//! writeln!(output, "ssh-ed25519 AAAAC3Nz... alice")?;
//! tx.commit()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use crate::config::Config;
use crate::error::{AtomicError, Result};
use crate::fs::{InputView, OutputView, Transaction, TransactionState};
use crate::lock::Lock;
use std::path::{Path, PathBuf};
use tracing::warn;

/// A lock plus the transaction it protects.
#[derive(Debug)]
pub struct LockedTransaction {
    transaction: Transaction,
    lock: Lock,
}

impl LockedTransaction {
    /// Lock `<target><lock_ext>` and open a transaction on `target`.
    pub fn open<P: AsRef<Path>>(target: P, config: &Config) -> Result<Self> {
        let target = target.as_ref();
        Self::open_at(target, config.lock_path_for(target), config)
    }

    /// Lock `lock_path` and open a transaction on `target`.
    pub fn open_at<P: AsRef<Path>, L: Into<PathBuf>>(
        target: P,
        lock_path: L,
        config: &Config,
    ) -> Result<Self> {
        let lock = Lock::new(lock_path, config.lock.clone());
        lock.acquire()?;

        match Transaction::open(target.as_ref(), &config.transaction) {
            Ok(transaction) => Ok(Self { transaction, lock }),
            Err(e) => {
                if let Err(release_err) = lock.release() {
                    warn!(
                        lock = %lock.path().display(),
                        error = %release_err,
                        "failed to release lock after open failure"
                    );
                }
                Err(e)
            }
        }
    }

    /// Run `f` inside a locked transaction on `target`.
    ///
    /// On `Ok`, closes with the configured `autocommit` unless `f` already
    /// closed. On `Err`, cancels. The lock is released either way.
    pub fn run<T, E, F>(
        target: impl AsRef<Path>,
        config: &Config,
        f: F,
    ) -> std::result::Result<T, E>
    where
        F: FnOnce(&mut LockedTransaction) -> std::result::Result<T, E>,
        E: From<AtomicError>,
    {
        let mut tx = LockedTransaction::open(target, config)?;
        match f(&mut tx) {
            Ok(value) => {
                tx.close(None)?;
                Ok(value)
            }
            Err(e) => {
                if let Err(cancel_err) = tx.cancel() {
                    warn!(error = %cancel_err, "failed to cancel locked transaction after error");
                }
                Err(e)
            }
        }
    }

    pub fn transaction(&self) -> &Transaction {
        &self.transaction
    }

    pub fn lock(&self) -> &Lock {
        &self.lock
    }

    pub fn state(&self) -> TransactionState {
        self.transaction.state()
    }

    /// Whether this holder still owns the lock.
    pub fn is_locked(&self) -> bool {
        self.lock.acquired()
    }

    pub fn input(&mut self) -> Result<&mut InputView> {
        self.transaction.input()
    }

    pub fn output(&mut self) -> Result<&mut OutputView> {
        self.transaction.output()
    }

    pub fn split(&mut self) -> Result<(&mut InputView, &mut OutputView)> {
        self.transaction.split()
    }

    pub fn commit(&mut self) -> Result<()> {
        self.close(Some(true))
    }

    pub fn cancel(&mut self) -> Result<()> {
        self.close(Some(false))
    }

    /// Close the transaction, then release the lock.
    ///
    /// Release is attempted even when the transaction was already closed or
    /// failed to close. The transaction's error takes precedence.
    pub fn close(&mut self, commit: Option<bool>) -> Result<()> {
        let closed = self.transaction.close(commit);
        let released = self.lock.release();
        closed?;
        released
    }
}

impl Drop for LockedTransaction {
    fn drop(&mut self) {
        if (self.transaction.is_open() || self.lock.acquired())
            && let Err(e) = self.cancel()
        {
            warn!(
                target = %self.transaction.target_path().display(),
                error = %e,
                "failed to clean up abandoned locked transaction"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;
    use std::io::{BufRead, Read, Write};
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    fn setup(content: &str) -> (TempDir, PathBuf, Config) {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("authorized_keys");
        fs::write(&path, content).unwrap();
        let mut config = Config::default();
        config.lock.timeout = 2.0;
        config.lock.retry_interval = 0.01;
        (temp_dir, path, config)
    }

    #[test]
    fn test_lock_held_while_open() {
        let (_dir, path, config) = setup("A\n");
        let lock_path = config.lock_path_for(&path);

        let mut tx = LockedTransaction::open(&path, &config).unwrap();
        assert!(lock_path.is_dir());
        assert!(tx.is_locked());
        assert_eq!(tx.state(), TransactionState::Open);
        assert_eq!(tx.lock().path(), lock_path);

        tx.commit().unwrap();
        assert!(!lock_path.exists());
        assert!(!tx.is_locked());
    }

    #[test]
    fn test_commit_scenario() {
        let (_dir, path, config) = setup("A\nB\n");

        let mut tx = LockedTransaction::open(&path, &config).unwrap();
        let mut original = String::new();
        tx.input().unwrap().read_to_string(&mut original).unwrap();
        assert_eq!(original, "A\nB\n");
        tx.output().unwrap().write_all(b"A\nX\n").unwrap();
        tx.commit().unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "A\nX\n");
        assert!(!config.temp_path_for(&path).exists());
        assert!(!config.lock_path_for(&path).exists());
    }

    #[test]
    fn test_cancel_releases_lock() {
        let (_dir, path, config) = setup("A\n");

        let mut tx = LockedTransaction::open(&path, &config).unwrap();
        tx.output().unwrap().write_all(b"B\n").unwrap();
        tx.cancel().unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "A\n");
        assert!(!config.lock_path_for(&path).exists());
        assert!(!config.temp_path_for(&path).exists());
    }

    #[test]
    fn test_close_twice_is_noop() {
        let (_dir, path, config) = setup("A\n");

        let mut tx = LockedTransaction::open(&path, &config).unwrap();
        tx.output().unwrap().write_all(b"B\n").unwrap();
        tx.commit().unwrap();
        tx.commit().unwrap();
        tx.cancel().unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "B\n");
        assert_eq!(tx.state(), TransactionState::Committed);
    }

    #[test]
    fn test_drop_cancels_and_releases() {
        let (_dir, path, config) = setup("A\n");

        {
            let mut tx = LockedTransaction::open(&path, &config).unwrap();
            tx.output().unwrap().write_all(b"B\n").unwrap();
        }

        assert_eq!(fs::read_to_string(&path).unwrap(), "A\n");
        assert!(!config.lock_path_for(&path).exists());
        assert!(!config.temp_path_for(&path).exists());
    }

    #[test]
    fn test_failed_open_releases_lock() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("missing");
        let config = Config::default();

        let err = LockedTransaction::open(&path, &config).unwrap_err();

        assert!(err.to_string().contains("open target"));
        assert!(!config.lock_path_for(&path).exists());
    }

    #[test]
    fn test_open_times_out_when_locked() {
        let (_dir, path, mut config) = setup("A\n");
        config.lock.timeout = 0.1;

        let first = LockedTransaction::open(&path, &config).unwrap();
        let err = LockedTransaction::open(&path, &config).unwrap_err();

        assert!(matches!(err, AtomicError::LockTimeout { .. }));
        // The failed opener must not have touched the staging file.
        assert!(config.temp_path_for(&path).exists());
        drop(first);
        assert!(!config.temp_path_for(&path).exists());
    }

    #[test]
    fn test_custom_lock_path() {
        let (dir, path, config) = setup("A\n");
        let lock_path = dir.path().join("shared.lock");

        let mut tx = LockedTransaction::open_at(&path, &lock_path, &config).unwrap();
        assert!(lock_path.is_dir());
        assert!(!config.lock_path_for(&path).exists());
        tx.cancel().unwrap();
        assert!(!lock_path.exists());
    }

    #[test]
    fn test_release_attempted_after_broken_lock() {
        let (_dir, path, config) = setup("A\n");

        let mut tx = LockedTransaction::open(&path, &config).unwrap();
        crate::lock::break_lock(tx.lock().path(), "lock", false).unwrap();
        assert!(!tx.is_locked());

        tx.output().unwrap().write_all(b"B\n").unwrap();
        tx.commit().unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "B\n");
    }

    #[test]
    fn test_run_cancels_on_error_and_releases() {
        let (_dir, path, mut config) = setup("A\n");
        config.transaction.autocommit = true;

        let result = LockedTransaction::run(&path, &config, |tx| -> Result<()> {
            tx.output()?
                .write_all(b"B\n")
                .map_err(|e| AtomicError::io("write", "staging", e))?;
            Err(AtomicError::NotChanged("abort".to_string()))
        });

        assert!(matches!(result, Err(AtomicError::NotChanged(_))));
        assert_eq!(fs::read_to_string(&path).unwrap(), "A\n");
        assert!(!config.lock_path_for(&path).exists());
    }

    #[test]
    fn test_run_autocommits() {
        let (_dir, path, mut config) = setup("A\n");
        config.transaction.autocommit = true;

        LockedTransaction::run(&path, &config, |tx| -> Result<()> {
            let (input, output) = tx.split()?;
            for line in input.lines() {
                let line = line.map_err(|e| AtomicError::io("read", "target", e))?;
                writeln!(output, "{}", line.to_lowercase())
                    .map_err(|e| AtomicError::io("write", "staging", e))?;
            }
            Ok(())
        })
        .unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "a\n");
        assert!(!config.lock_path_for(&path).exists());
    }

    #[test]
    #[serial]
    fn test_concurrent_increments_are_serialized() {
        let (_dir, path, mut config) = setup("0\n");
        config.lock.timeout = 20.0;
        config.lock.retry_interval = 0.002;
        let path = Arc::new(path);
        let config = Arc::new(config);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let path = Arc::clone(&path);
                let config = Arc::clone(&config);
                std::thread::spawn(move || {
                    for _ in 0..5 {
                        let mut tx = LockedTransaction::open(path.as_path(), &config).unwrap();
                        let mut current = String::new();
                        tx.input().unwrap().read_to_string(&mut current).unwrap();
                        let value: u32 = current.trim().parse().unwrap();
                        std::thread::sleep(Duration::from_millis(1));
                        writeln!(tx.output().unwrap(), "{}", value + 1).unwrap();
                        tx.commit().unwrap();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(fs::read_to_string(path.as_path()).unwrap(), "40\n");
    }
}
