//! Exit code constants for the atomicfile CLI.
//!
//! - 0: Success
//! - 1: User error (bad args, invalid config)
//! - 2: Nothing changed (edit matched nothing, transaction cancelled)
//! - 3: Filesystem failure (open/copy/fsync/rename/delete)
//! - 4: Lock acquisition timed out
//! - 5: Lock integrity failure (refused to break a non-lock directory)

/// Successful execution.
pub const SUCCESS: i32 = 0;

/// User error: bad arguments or invalid configuration.
pub const USER_ERROR: i32 = 1;

/// The requested edit changed nothing and was cancelled.
pub const NOT_CHANGED: i32 = 2;

/// Filesystem failure while opening, committing or cancelling.
pub const IO_FAILURE: i32 = 3;

/// Lock acquisition failure: the lock was held past the timeout.
pub const LOCK_FAILURE: i32 = 4;

/// Lock directory contained entries that are not lock markers.
pub const INTEGRITY_FAILURE: i32 = 5;
