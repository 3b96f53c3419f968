//! Cache Module
//!
//! Provides named in-memory tables with idle-based TTL expiration, lazy
//! loading on misses, and add/delete/expire callbacks.

mod entry;
mod registry;
mod stats;
mod table;


// Re-export public types
pub use entry::{CacheEntry, ExpireCallback};
pub use registry::TableRegistry;
pub use stats::TableStats;
pub use table::{CacheTable, EntryCallback, EntryRef, Loader};
