//! Table Statistics Module
//!
//! Tracks lookup and removal counters for a cache table.

use serde::Serialize;

// == Table Stats ==
/// Counters describing how a table has been used.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TableStats {
    /// Lookups answered from the table
    pub hits: u64,
    /// Lookups that found no entry (including ones the loader then filled)
    pub misses: u64,
    /// Misses filled by the loader
    pub loads: u64,
    /// Entries removed by the expiration sweep
    pub expirations: u64,
    /// Entries removed by explicit delete
    pub deletions: u64,
    /// Current number of entries in the table
    pub total_entries: usize,
}

impl TableStats {
    // == Constructor ==
    pub fn new() -> Self {
        Self::default()
    }

    // == Hit Rate ==
    /// Calculates the lookup hit rate.
    ///
    /// Returns hits / (hits + misses), or 0.0 if no lookups have been made.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    pub fn record_hit(&mut self) {
        self.hits += 1;
    }

    pub fn record_miss(&mut self) {
        self.misses += 1;
    }

    pub fn record_load(&mut self) {
        self.loads += 1;
    }

    pub fn record_expiration(&mut self) {
        self.expirations += 1;
    }

    pub fn record_deletion(&mut self) {
        self.deletions += 1;
    }

    pub fn set_total_entries(&mut self, count: usize) {
        self.total_entries = count;
    }
}
