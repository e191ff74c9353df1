//! Typed failures that callers branch on.
//!
//! They are raised inside `anyhow::Error`; use `is_stale(&err)` or
//! `err.downcast_ref::<TableError>()` to react.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TableError {
    /// `no_of_entries == -1` was observed; re-attach before any further access.
    #[error("mapping of {0} is stale, re-attach required")]
    Stale(String),

    #[error("incorrect struct version in {name}: found {found}, expected {expected}")]
    IncorrectVersion { name: String, found: u8, expected: u8 },

    #[error("{what} position {pos} out of range (0..{len})")]
    OutOfRange { what: &'static str, pos: usize, len: usize },

    #[error("{what} '{key}' not found")]
    NotFound { what: &'static str, key: String },

    #[error("mapping of {0} is read-only")]
    ReadOnly(String),
}

pub fn is_stale(err: &anyhow::Error) -> bool {
    matches!(err.downcast_ref::<TableError>(), Some(TableError::Stale(_)))
}
