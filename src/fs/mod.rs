//! Filesystem primitives for atomicfile.
//!
//! This module provides the copy-on-write file transaction and the atomic
//! replace it commits with.

pub mod atomic;
mod transaction;
mod views;

pub use atomic::{atomic_replace, with_suffix};
pub use transaction::{Transaction, TransactionState};
pub use views::{InputView, OutputView};
