//! Error types for cache tables
//!
//! Provides unified error handling using thiserror.

use thiserror::Error;

// == Cache Error Enum ==
/// Failures reported by table lookups and deletions.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheError {
    /// Key is not present in the table
    #[error("Key not found in cache")]
    KeyNotFound,

    /// Key is not present and the configured loader produced nothing
    #[error("Key not found in cache and could not be loaded")]
    KeyNotFoundOrLoadable,
}

// == Result Type Alias ==
/// Convenience Result type for table operations.
pub type Result<T> = std::result::Result<T, CacheError>;
