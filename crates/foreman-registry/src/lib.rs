//! # foreman-registry
//!
//! Persistent state for the Foreman control plane: goals, sessions,
//! cascades, and file locks, stored in SQLite via `sqlx`.
//!
//! The registry is the transactional substrate for every engine
//! invariant. The two that matter most:
//!
//! - **Lock exclusivity**: `file_locks.file_path` is the primary key, so
//!   at no observable time do two sessions hold the same path. The
//!   [`LockManager`] is the only code that mutates the table.
//! - **Terminal cleanup**: sessions release their locks in the same
//!   transaction that makes them terminal, and `ON DELETE CASCADE`
//!   covers row deletion.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]

mod cascades;
mod error;
mod goals;
mod lock;
mod sessions;
mod store;

pub use error::{RegistryError, Result};
pub use lock::{AcquireOutcome, LockConflict, LockManager, LockStatus};
pub use store::{RegistryStore, Tx};
