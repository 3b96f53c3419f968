//! Table Registry Module
//!
//! Maps table names to table instances, creating tables on first use.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

use parking_lot::RwLock;
use tokio::runtime::Handle;
use tracing::info;

use crate::cache::CacheTable;

// == Table Registry ==
/// Named collection of tables sharing one key and value type.
pub struct TableRegistry<K, V> {
    tables: RwLock<HashMap<String, CacheTable<K, V>>>,
    runtime: Option<Handle>,
}

impl<K, V> TableRegistry<K, V>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Creates a registry whose tables run their timers on the runtime that is
    /// current when each table is created.
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            runtime: None,
        }
    }

    /// Creates a registry whose tables run their timers on `runtime`.
    pub fn with_runtime(runtime: Handle) -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            runtime: Some(runtime),
        }
    }

    // == Get Or Create ==
    /// Returns the table called `name`, creating it if it does not exist.
    ///
    /// # Panics
    /// Panics if the table has to be created, the registry has no runtime
    /// handle, and the caller is outside a Tokio runtime.
    pub fn get_or_create(&self, name: &str) -> CacheTable<K, V> {
        if let Some(table) = self.tables.read().get(name) {
            return table.clone();
        }

        let mut tables = self.tables.write();
        // Another caller may have created it between the two locks
        if let Some(table) = tables.get(name) {
            return table.clone();
        }

        info!(table = %name, "creating cache table");
        let table = match &self.runtime {
            Some(runtime) => CacheTable::with_runtime(name, runtime.clone()),
            None => CacheTable::new(name),
        };
        tables.insert(name.to_string(), table.clone());
        table
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tables.read().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tables.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.read().is_empty()
    }
}

impl<K, V> Default for TableRegistry<K, V>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
