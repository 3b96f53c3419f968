//! TTL Table - an in-process key-value cache
//!
//! Named tables with per-entry idle TTL, lazy loading on misses, and
//! add/delete/expire callbacks. Expired entries are removed by a sweep that
//! reschedules itself for the next known deadline.

pub mod cache;
pub mod config;
pub mod error;
pub mod tasks;

pub use cache::{CacheEntry, CacheTable, EntryRef, TableRegistry, TableStats};
pub use config::Config;
pub use error::{CacheError, Result};
