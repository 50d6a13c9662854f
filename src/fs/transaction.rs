//! Copy-on-write file transactions.
//!
//! A `Transaction` stages a new version of a target file in a sibling
//! staging file and either commits it with fsync + rename or discards it.
//! The target is never written before a successful commit.
//!
//! # Lifecycle
//!
//! 1. `open` snapshots the target: the input view reads the original bytes,
//!    and the staging file starts as a copy of them (with the same permissions)
//! 2. The caller reads through `input()` and writes through `output()`
//! 3. `commit()` flushes, fsyncs, closes both handles and renames the staging
//!    file over the target; `cancel()` closes both handles and deletes it
//!
//! Closing is idempotent. Dropping an open transaction cancels it.
//!
//! # Example
//!
//! ```no_run
//! use atomicfile::config::TransactionOptions;
//! use atomicfile::fs::Transaction;
//! use std::io::{BufRead, Write};
//!
//! let mut tx = Transaction::open("hosts.allow", &TransactionOptions::default())?;
//! let (input, output) = tx.split()?;
//! for line in input.lines() {
//!     let line = line?;
//!     if !line.contains("10.0.0.7") {
//!         writeln!(output, "{}", line)?;
//!     }
//! }
//! tx.commit()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use super::atomic::{atomic_replace, with_suffix};
use super::views::{InputView, OutputView};
use crate::config::TransactionOptions;
use crate::error::{AtomicError, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// State of a transaction. `Committed` and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Open,
    Committed,
    Cancelled,
}

#[derive(Debug)]
struct Handles {
    input: InputView,
    output: OutputView,
}

/// An atomic read-modify-replace update of one file.
#[derive(Debug)]
pub struct Transaction {
    target_path: PathBuf,
    temp_path: PathBuf,
    autocommit: bool,
    state: TransactionState,
    handles: Option<Handles>,
}

impl Transaction {
    /// Open a transaction on `target`, staging in `<target><tmp_ext>`.
    pub fn open<P: AsRef<Path>>(target: P, options: &TransactionOptions) -> Result<Self> {
        if options.tmp_ext.is_empty() {
            return Err(AtomicError::UserError(
                "transaction tmp_ext must be non-empty".to_string(),
            ));
        }
        let target = target.as_ref();
        let temp = with_suffix(target, &options.tmp_ext);
        Self::open_with_temp(target, temp, options)
    }

    /// Open a transaction on `target`, staging in `temp`.
    ///
    /// `temp` must be on the same filesystem as `target` for the commit to be
    /// atomic. An existing file at `temp` (left by a crashed writer) is
    /// removed and recreated, whatever its permissions. `temp` must not name
    /// the target itself.
    pub fn open_with_temp<P: AsRef<Path>, Q: Into<PathBuf>>(
        target: P,
        temp: Q,
        options: &TransactionOptions,
    ) -> Result<Self> {
        let target_path = target.as_ref().to_path_buf();
        let temp_path = temp.into();

        if same_file(&target_path, &temp_path) {
            return Err(AtomicError::UserError(format!(
                "staging path '{}' is the target itself",
                temp_path.display()
            )));
        }

        let mut original = File::open(&target_path)
            .map_err(|e| AtomicError::io("open target", &target_path, e))?;

        if !options.binary {
            ensure_utf8(&mut original, &target_path)?;
        }

        // A leftover may carry a read-only mode copied from the target.
        match fs::remove_file(&temp_path) {
            Ok(()) => debug!(temp = %temp_path.display(), "removed leftover staging file"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(AtomicError::io("remove leftover staging file", &temp_path, e)),
        }

        let staging = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp_path)
            .map_err(|e| AtomicError::io("create staging file", &temp_path, e))?;

        // From here on the staging file exists and must not outlive a failure.
        let staging = match copy_snapshot(&mut original, staging) {
            Ok(staging) => staging,
            Err(e) => {
                remove_staging(&temp_path);
                return Err(AtomicError::io("copy target into", &temp_path, e));
            }
        };

        debug!(
            target = %target_path.display(),
            temp = %temp_path.display(),
            "opened transaction"
        );

        Ok(Self {
            handles: Some(Handles {
                input: InputView::new(original, target_path.clone()),
                output: OutputView::new(staging, temp_path.clone()),
            }),
            target_path,
            temp_path,
            autocommit: options.autocommit,
            state: TransactionState::Open,
        })
    }

    /// Run `f` inside a transaction on `target`.
    ///
    /// When `f` returns `Ok` and has not closed the transaction itself, the
    /// transaction is closed with the configured `autocommit` decision. When
    /// `f` returns `Err` (or panics) the transaction is cancelled.
    pub fn run<T, E, F>(
        target: impl AsRef<Path>,
        options: &TransactionOptions,
        f: F,
    ) -> std::result::Result<T, E>
    where
        F: FnOnce(&mut Transaction) -> std::result::Result<T, E>,
        E: From<AtomicError>,
    {
        let mut tx = Transaction::open(target, options)?;
        match f(&mut tx) {
            Ok(value) => {
                tx.close(None)?;
                Ok(value)
            }
            Err(e) => {
                if let Err(cancel_err) = tx.cancel() {
                    warn!(error = %cancel_err, "failed to cancel transaction after error");
                }
                Err(e)
            }
        }
    }

    /// The file being updated.
    pub fn target_path(&self) -> &Path {
        &self.target_path
    }

    /// The staging file.
    pub fn temp_path(&self) -> &Path {
        &self.temp_path
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == TransactionState::Open
    }

    /// Read-only view of the original content.
    pub fn input(&mut self) -> Result<&mut InputView> {
        self.split().map(|(input, _)| input)
    }

    /// Write-only view of the staging file.
    pub fn output(&mut self) -> Result<&mut OutputView> {
        self.split().map(|(_, output)| output)
    }

    /// Both views at once, for read-one-write-one loops.
    pub fn split(&mut self) -> Result<(&mut InputView, &mut OutputView)> {
        match self.handles.as_mut() {
            Some(handles) => Ok((&mut handles.input, &mut handles.output)),
            None => Err(AtomicError::Closed(self.target_path.clone())),
        }
    }

    /// Equivalent to `close(Some(true))`.
    pub fn commit(&mut self) -> Result<()> {
        self.close(Some(true))
    }

    /// Equivalent to `close(Some(false))`.
    pub fn cancel(&mut self) -> Result<()> {
        self.close(Some(false))
    }

    /// Finish the transaction.
    ///
    /// `None` uses the configured `autocommit`. Calling `close` on a
    /// transaction that is already committed or cancelled does nothing.
    ///
    /// If the commit fails before the rename, the staging file is removed and
    /// the transaction ends cancelled. If the rename itself fails the staging
    /// file is kept (see `AtomicError::CommitStranded`).
    pub fn close(&mut self, commit: Option<bool>) -> Result<()> {
        let Some(Handles { input, output }) = self.handles.take() else {
            return Ok(());
        };
        let commit = commit.unwrap_or(self.autocommit);
        drop(input);

        if !commit {
            drop(output);
            self.state = TransactionState::Cancelled;
            fs::remove_file(&self.temp_path).or_else(ignore_not_found).map_err(|e| {
                AtomicError::io("remove staging file", &self.temp_path, e)
            })?;
            info!(target = %self.target_path.display(), "cancelled transaction");
            return Ok(());
        }

        if let Err(e) = sync_output(output) {
            self.state = TransactionState::Cancelled;
            remove_staging(&self.temp_path);
            return Err(AtomicError::io("sync staging file", &self.temp_path, e));
        }

        // The staging file stays in place on a failed rename; the state is
        // terminal either way so a later close does not retry or delete it.
        self.state = TransactionState::Committed;
        atomic_replace(&self.temp_path, &self.target_path)?;
        info!(target = %self.target_path.display(), "committed transaction");
        Ok(())
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.is_open()
            && let Err(e) = self.cancel()
        {
            warn!(
                target = %self.target_path.display(),
                error = %e,
                "failed to cancel abandoned transaction"
            );
        }
    }
}

/// Reject content that is not valid UTF-8, then rewind.
fn ensure_utf8(file: &mut File, path: &Path) -> Result<()> {
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)
        .map_err(|e| AtomicError::io("read target", path, e))?;
    if let Err(e) = std::str::from_utf8(&bytes) {
        return Err(AtomicError::io(
            "decode target as text",
            path,
            io::Error::new(io::ErrorKind::InvalidData, e),
        ));
    }
    file.rewind()
        .map_err(|e| AtomicError::io("rewind target", path, e))
}

/// Copy the original bytes and permissions into the staging file and rewind
/// both handles.
fn copy_snapshot(original: &mut File, mut staging: File) -> io::Result<File> {
    original.rewind()?;
    io::copy(original, &mut staging)?;
    staging.set_permissions(original.metadata()?.permissions())?;
    original.rewind()?;
    staging.rewind()?;
    Ok(staging)
}

/// Whether two paths name the same file, lexically or after resolving links.
fn same_file(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

fn sync_output(output: OutputView) -> io::Result<()> {
    let file = output.finish()?;
    file.sync_all()
}

fn remove_staging(path: &Path) {
    if let Err(e) = fs::remove_file(path).or_else(ignore_not_found) {
        warn!(temp = %path.display(), error = %e, "failed to remove staging file");
    }
}

fn ignore_not_found(e: io::Error) -> io::Result<()> {
    if e.kind() == io::ErrorKind::NotFound {
        Ok(())
    } else {
        Err(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, Seek, SeekFrom, Write};
    use tempfile::TempDir;

    fn setup(content: &[u8]) -> (TempDir, PathBuf) {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("authorized_keys");
        fs::write(&path, content).unwrap();
        (temp_dir, path)
    }

    fn text() -> TransactionOptions {
        TransactionOptions::default()
    }

    #[test]
    fn test_commit_replaces_line() {
        let (_dir, path) = setup(b"A\nB\n");

        let mut tx = Transaction::open(&path, &text()).unwrap();
        let mut original = String::new();
        tx.input().unwrap().read_to_string(&mut original).unwrap();
        assert_eq!(original, "A\nB\n");

        tx.output().unwrap().write_all(b"A\nX\n").unwrap();
        tx.commit().unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "A\nX\n");
        assert!(!with_suffix(&path, ".tmp").exists());
        assert_eq!(tx.state(), TransactionState::Committed);
    }

    #[test]
    fn test_cancel_leaves_target_untouched() {
        let (_dir, path) = setup(b"A\nB\n");

        let mut tx = Transaction::open(&path, &text()).unwrap();
        tx.output().unwrap().write_all(b"garbage").unwrap();
        tx.cancel().unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"A\nB\n");
        assert!(!tx.temp_path().exists());
        assert_eq!(tx.state(), TransactionState::Cancelled);
    }

    #[test]
    fn test_target_untouched_until_commit() {
        let (_dir, path) = setup(b"old\n");

        let mut tx = Transaction::open(&path, &text()).unwrap();
        let output = tx.output().unwrap();
        output.write_all(b"new\n").unwrap();
        output.flush().unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"old\n");
        tx.commit().unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"new\n");
    }

    #[test]
    fn test_close_is_idempotent() {
        let (_dir, path) = setup(b"A\n");

        let mut tx = Transaction::open(&path, &text()).unwrap();
        tx.output().unwrap().write_all(b"B\n").unwrap();
        tx.commit().unwrap();

        tx.commit().unwrap();
        tx.cancel().unwrap();
        tx.close(None).unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"B\n");
        assert_eq!(tx.state(), TransactionState::Committed);
    }

    #[test]
    fn test_cancel_then_commit_is_noop() {
        let (_dir, path) = setup(b"A\n");

        let mut tx = Transaction::open(&path, &text()).unwrap();
        tx.output().unwrap().write_all(b"B\n").unwrap();
        tx.cancel().unwrap();
        tx.commit().unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"A\n");
    }

    #[test]
    fn test_drop_cancels() {
        let (_dir, path) = setup(b"keep me\n");
        let temp = with_suffix(&path, ".tmp");

        {
            let mut tx = Transaction::open(&path, &text()).unwrap();
            tx.output().unwrap().write_all(b"discard me\n").unwrap();
            assert!(temp.exists());
        }

        assert_eq!(fs::read(&path).unwrap(), b"keep me\n");
        assert!(!temp.exists());
    }

    #[test]
    fn test_autocommit_decides_close_none() {
        let (_dir, path) = setup(b"A\n");

        let mut options = text();
        options.autocommit = true;
        let mut tx = Transaction::open(&path, &options).unwrap();
        tx.output().unwrap().write_all(b"B\n").unwrap();
        tx.close(None).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"B\n");

        let mut tx = Transaction::open(&path, &text()).unwrap();
        tx.output().unwrap().write_all(b"C\n").unwrap();
        tx.close(None).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"B\n");
    }

    #[test]
    fn test_views_after_close_fail() {
        let (_dir, path) = setup(b"A\n");

        let mut tx = Transaction::open(&path, &text()).unwrap();
        tx.cancel().unwrap();

        assert!(matches!(tx.input(), Err(AtomicError::Closed(_))));
        assert!(matches!(tx.output(), Err(AtomicError::Closed(_))));
    }

    #[test]
    fn test_missing_target_fails_without_leftovers() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("missing");

        let err = Transaction::open(&path, &text()).unwrap_err();

        assert_eq!(err.io_kind(), Some(io::ErrorKind::NotFound));
        assert!(err.to_string().contains("open target"));
        assert!(!with_suffix(&path, ".tmp").exists());
    }

    #[test]
    fn test_uncreatable_staging_file_fails() {
        let (dir, path) = setup(b"A\n");
        let temp = dir.path().join("no-such-dir").join("staging");

        let err = Transaction::open_with_temp(&path, temp, &text()).unwrap_err();

        assert!(err.to_string().contains("create staging file"));
        assert_eq!(fs::read(&path).unwrap(), b"A\n");
    }

    #[test]
    fn test_custom_temp_path() {
        let (dir, path) = setup(b"A\n");
        let temp = dir.path().join(".keys.staging");

        let mut tx = Transaction::open_with_temp(&path, &temp, &text()).unwrap();
        assert!(temp.exists());
        tx.output().unwrap().write_all(b"Z\n").unwrap();
        tx.commit().unwrap();

        assert!(!temp.exists());
        assert_eq!(fs::read(&path).unwrap(), b"Z\n");
    }

    #[test]
    fn test_text_mode_rejects_invalid_utf8() {
        let (_dir, path) = setup(&[0x66, 0x6f, 0xff, 0x0a]);

        let err = Transaction::open(&path, &text()).unwrap_err();
        assert_eq!(err.io_kind(), Some(io::ErrorKind::InvalidData));
        assert!(!with_suffix(&path, ".tmp").exists());

        let mut options = text();
        options.binary = true;
        let mut tx = Transaction::open(&path, &options).unwrap();
        let mut bytes = Vec::new();
        tx.input().unwrap().read_to_end(&mut bytes).unwrap();
        assert_eq!(bytes, [0x66, 0x6f, 0xff, 0x0a]);
        tx.cancel().unwrap();
    }

    #[test]
    fn test_shorter_rewrite_truncates() {
        let (_dir, path) = setup(b"line one\nline two\nline three\n");

        let mut tx = Transaction::open(&path, &text()).unwrap();
        let (input, output) = tx.split().unwrap();
        for line in input.lines() {
            let line = line.unwrap();
            if line != "line two" {
                writeln!(output, "{}", line).unwrap();
            }
        }
        tx.commit().unwrap();

        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "line one\nline three\n"
        );
    }

    #[test]
    fn test_in_place_edit_keeps_tail() {
        let (_dir, path) = setup(b"version=1\nname=repo\n");

        let mut tx = Transaction::open(&path, &text()).unwrap();
        let output = tx.output().unwrap();
        output.seek(SeekFrom::Start(8)).unwrap();
        output.write_all(b"2").unwrap();
        tx.commit().unwrap();

        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "version=2\nname=repo\n"
        );
    }

    #[test]
    fn test_commit_without_writes_empties_target() {
        let (_dir, path) = setup(b"A\nB\n");

        let mut tx = Transaction::open(&path, &text()).unwrap();
        tx.commit().unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"");
    }

    #[test]
    fn test_input_reads_original_snapshot() {
        let (_dir, path) = setup(b"A\nB\n");

        let mut tx = Transaction::open(&path, &text()).unwrap();
        let (input, output) = tx.split().unwrap();
        output.write_all(b"overwritten\n").unwrap();
        output.flush().unwrap();

        let mut original = String::new();
        input.read_to_string(&mut original).unwrap();
        assert_eq!(original, "A\nB\n");
    }

    #[test]
    fn test_leftover_staging_file_is_replaced() {
        let (_dir, path) = setup(b"A\n");
        let temp = with_suffix(&path, ".tmp");
        fs::write(&temp, b"stale from a crash").unwrap();

        let mut tx = Transaction::open(&path, &text()).unwrap();
        tx.output().unwrap().write_all(b"fresh\n").unwrap();
        tx.commit().unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"fresh\n");
        assert!(!temp.exists());
    }

    #[test]
    fn test_empty_tmp_ext_is_rejected() {
        let (_dir, path) = setup(b"A\n");
        let options = TransactionOptions {
            tmp_ext: String::new(),
            ..TransactionOptions::default()
        };

        let err = Transaction::open(&path, &options).unwrap_err();

        assert!(matches!(err, AtomicError::UserError(_)));
        assert_eq!(fs::read(&path).unwrap(), b"A\n");
    }

    #[test]
    fn test_staging_on_target_is_rejected() {
        let (dir, path) = setup(b"A\n");

        let err = Transaction::open_with_temp(&path, &path, &text()).unwrap_err();
        assert!(matches!(err, AtomicError::UserError(_)));
        assert_eq!(fs::read(&path).unwrap(), b"A\n");

        // Same file reached through a different spelling.
        let dotted = dir.path().join(".").join("authorized_keys");
        let err = Transaction::open_with_temp(&path, dotted, &text()).unwrap_err();
        assert!(matches!(err, AtomicError::UserError(_)));
        assert_eq!(fs::read(&path).unwrap(), b"A\n");
    }

    #[cfg(unix)]
    #[test]
    fn test_read_only_leftover_staging_file_is_replaced() {
        use std::os::unix::fs::PermissionsExt;

        let (_dir, path) = setup(b"A\n");
        fs::set_permissions(&path, fs::Permissions::from_mode(0o444)).unwrap();
        let temp = with_suffix(&path, ".tmp");
        fs::write(&temp, b"stale from a crash").unwrap();
        fs::set_permissions(&temp, fs::Permissions::from_mode(0o444)).unwrap();

        let mut tx = Transaction::open(&path, &text()).unwrap();
        tx.output().unwrap().write_all(b"fresh\n").unwrap();
        tx.commit().unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"fresh\n");
        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o444);
        assert!(!temp.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_commit_preserves_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let (_dir, path) = setup(b"ssh-ed25519 AAAA\n");
        fs::set_permissions(&path, fs::Permissions::from_mode(0o600)).unwrap();

        let mut tx = Transaction::open(&path, &text()).unwrap();
        tx.output().unwrap().write_all(b"ssh-ed25519 BBBB\n").unwrap();
        tx.commit().unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }

    #[test]
    fn test_stranded_commit_keeps_staging_file() {
        let (_dir, path) = setup(b"A\n");

        let mut tx = Transaction::open(&path, &text()).unwrap();
        tx.output().unwrap().write_all(b"B\n").unwrap();

        // rename(file, non-empty dir) fails on every platform.
        fs::remove_file(&path).unwrap();
        fs::create_dir_all(path.join("blocker")).unwrap();

        let err = tx.commit().unwrap_err();
        assert!(matches!(err, AtomicError::CommitStranded { .. }));
        assert_eq!(fs::read(tx.temp_path()).unwrap(), b"B\n");

        // A second close neither retries nor deletes the staged content.
        tx.cancel().unwrap();
        assert!(tx.temp_path().exists());
    }

    #[test]
    fn test_run_commits_on_ok_with_autocommit() {
        let (_dir, path) = setup(b"A\n");
        let mut options = text();
        options.autocommit = true;

        let lines = Transaction::run(&path, &options, |tx| -> Result<usize> {
            let (input, output) = tx.split()?;
            let mut count = 0;
            for line in input.lines() {
                let line = line.map_err(|e| AtomicError::io("read", "authorized_keys", e))?;
                writeln!(output, "{}!", line).map_err(|e| AtomicError::io("write", "staging", e))?;
                count += 1;
            }
            Ok(count)
        })
        .unwrap();

        assert_eq!(lines, 1);
        assert_eq!(fs::read(&path).unwrap(), b"A!\n");
    }

    #[test]
    fn test_run_respects_explicit_close() {
        let (_dir, path) = setup(b"A\n");
        let mut options = text();
        options.autocommit = true;

        Transaction::run(&path, &options, |tx| -> Result<()> {
            tx.output()?.write_all(b"B\n").map_err(|e| AtomicError::io("write", "staging", e))?;
            tx.cancel()
        })
        .unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"A\n");
    }

    #[test]
    fn test_run_cancels_on_error() {
        let (_dir, path) = setup(b"A\n");
        let mut options = text();
        options.autocommit = true;

        let result = Transaction::run(&path, &options, |tx| -> Result<()> {
            tx.output()?.write_all(b"B\n").map_err(|e| AtomicError::io("write", "staging", e))?;
            Err(AtomicError::UserError("key already present".to_string()))
        });

        assert!(matches!(result, Err(AtomicError::UserError(_))));
        assert_eq!(fs::read(&path).unwrap(), b"A\n");
        assert!(!with_suffix(&path, ".tmp").exists());
    }
}
