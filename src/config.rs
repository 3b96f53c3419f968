//! Configuration Module
//!
//! Handles loading the demo binary's configuration from environment variables.

use std::env;
use std::time::Duration;

/// Demo configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Name of the table the demo creates in the registry
    pub table_name: String,
    /// Number of entries the demo inserts
    pub entries: usize,
    /// TTL in milliseconds given to the short-lived entries
    pub ttl_ms: u64,
    /// How many entries the most-accessed report lists
    pub top_n: usize,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `TABLE_NAME` - Table name (default: "demo")
    /// - `DEMO_ENTRIES` - Entries to insert (default: 10)
    /// - `DEMO_TTL_MS` - TTL of short-lived entries in ms (default: 200)
    /// - `DEMO_TOP_N` - Length of the most-accessed report (default: 3)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            table_name: env::var("TABLE_NAME").unwrap_or(defaults.table_name),
            entries: env::var("DEMO_ENTRIES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.entries),
            ttl_ms: env::var("DEMO_TTL_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.ttl_ms),
            top_n: env::var("DEMO_TOP_N")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.top_n),
        }
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            table_name: "demo".to_string(),
            entries: 10,
            ttl_ms: 200,
            top_n: 3,
        }
    }
}
