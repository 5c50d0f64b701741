//! Callback identifiers and sharded-path utilities.
//!
//! Every submitted payload is correlated by a *callback id*: the value returned to the caller at
//! submission time and used afterwards for polling, updating and deleting.
//!
//! ## Canonical form
//! - Length: 32
//! - Characters: `0-9` and `a-f` only
//! - Example: `550e8400e29b41d4a716446655440000`
//!
//! Fresh ids are drawn from a v4 UUID, so the identifier space is large enough that collisions
//! are negligible. Allocation still reserves each candidate atomically in the store (see
//! `ssv-core`), which makes the uniqueness guarantee independent of the probability argument.
//!
//! ## Sharded directory layout
//! For a canonical id `c`, batch-scoped files live under:
//! `parent_dir/<c[0..2]>/<c[2..4]>/<c>/`
//!
//! Example:
//! `work/55/0e/550e8400e29b41d4a716446655440000/`

mod service;

pub use service::CallbackId;

/// Error type for callback id operations.
#[derive(Debug, thiserror::Error)]
pub enum CallbackIdError {
    /// Invalid input provided
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Result type for callback id operations.
pub type CallbackIdResult<T> = Result<T, CallbackIdError>;
