//! atomicfile: crash-safe, mutually exclusive updates of shared files.
//!
//! Two primitives, usable on local disks and over NFS:
//!
//! - [`lock::Lock`]: an advisory lock built on atomic directory creation,
//!   with a per-holder marker file proving ownership
//! - [`fs::Transaction`]: a read-modify-replace update staged in a sibling
//!   file and committed with fsync + rename
//!
//! [`locked::LockedTransaction`] combines them so the lock is held for
//! exactly the lifetime of the transaction.

pub mod config;
pub mod error;
pub mod exit_codes;
pub mod fs;
pub mod lock;
pub mod locked;
pub mod telemetry;

pub use config::Config;
pub use error::{AtomicError, Result};
pub use fs::Transaction;
pub use lock::Lock;
pub use locked::LockedTransaction;
