//! Configuration for atomicfile.
//!
//! A `Config` value carries every tunable of the lock and the transaction.
//! It is passed explicitly to constructors; there are no process-wide
//! defaults to mutate. YAML parsing is forward-compatible (unknown fields are
//! ignored) and every field has a default.

mod model;
mod operations;
pub mod types;


pub use model::Config;
pub use types::{LockOptions, LogFormat, TransactionOptions};
