//! Cache Table Module
//!
//! The table owns the key/entry map, the single outstanding expiration timer,
//! the loader and the lifecycle callbacks.
//!
//! # Locking
//! One `RwLock` guards all table state. User callbacks (add, about-to-delete,
//! expire) never run while it is held, so they may call back into the table.
//! Every internal mutating operation (`add_internal`, `remove_internal`,
//! `expiration_check_locked`) takes the write guard by `&mut`: the lock is
//! held when they are called and held again when they return, and any window
//! where it is released for callbacks stays inside the operation.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock, RwLockWriteGuard};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::cache::{CacheEntry, TableStats};
use crate::error::{CacheError, Result};
use crate::tasks::spawn_expiration_timer;

/// Shared handle to an entry stored in a table.
pub type EntryRef<K, V> = Arc<CacheEntry<K, V>>;

/// Produces an entry for a key that missed, or `None` if it cannot.
pub type Loader<K, V> = Arc<dyn Fn(&K, &[&dyn Any]) -> Option<CacheEntry<K, V>> + Send + Sync>;

/// Table-level callback receiving the entry being added or deleted.
pub type EntryCallback<K, V> = Arc<dyn Fn(&EntryRef<K, V>) + Send + Sync>;

type StateGuard<'a, K, V> = RwLockWriteGuard<'a, TableState<K, V>>;

/// Floor for re-arming after a sweep whose callbacks panicked, so a callback
/// that always panics cannot spin the timer.
const PANIC_RETRY_DELAY: Duration = Duration::from_millis(100);

struct TableState<K, V> {
    items: HashMap<K, EntryRef<K, V>>,
    /// Pending one-shot expiration timer, if armed
    cleanup_timer: Option<JoinHandle<()>>,
    /// Wait the armed timer was scheduled with; `None` while idle
    next_check_in: Option<Duration>,
    loader: Option<Loader<K, V>>,
    on_added: Vec<EntryCallback<K, V>>,
    on_about_to_delete: Vec<EntryCallback<K, V>>,
}

struct TableInner<K, V> {
    name: String,
    runtime: Handle,
    state: RwLock<TableState<K, V>>,
    stats: Mutex<TableStats>,
}

// == Cache Table ==
/// A named, thread-safe key/value table with idle-based TTL expiration.
///
/// Cloning is cheap and yields another handle to the same table.
pub struct CacheTable<K, V> {
    inner: Arc<TableInner<K, V>>,
}

impl<K, V> Clone for CacheTable<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<K, V> CacheTable<K, V>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    // == Constructor ==
    /// Creates an empty table whose expiration timer runs on the current
    /// Tokio runtime.
    ///
    /// # Panics
    /// Panics if called outside the context of a Tokio runtime.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_runtime(name, Handle::current())
    }

    /// Creates an empty table whose expiration timer runs on `runtime`.
    pub fn with_runtime(name: impl Into<String>, runtime: Handle) -> Self {
        Self {
            inner: Arc::new(TableInner {
                name: name.into(),
                runtime,
                state: RwLock::new(TableState {
                    items: HashMap::new(),
                    cleanup_timer: None,
                    next_check_in: None,
                    loader: None,
                    on_added: Vec::new(),
                    on_about_to_delete: Vec::new(),
                }),
                stats: Mutex::new(TableStats::new()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    // == Count ==
    pub fn count(&self) -> usize {
        self.inner.state.read().items.len()
    }

    // == Exists ==
    pub fn exists(&self, key: &K) -> bool {
        self.inner.state.read().items.contains_key(key)
    }

    // == For Each ==
    /// Visits every entry present at the moment of the call.
    ///
    /// The snapshot is taken under the read lock and visited after it is
    /// released, so `visit` may use the table.
    pub fn for_each<F>(&self, mut visit: F)
    where
        F: FnMut(&K, &EntryRef<K, V>),
    {
        let snapshot: Vec<EntryRef<K, V>> =
            self.inner.state.read().items.values().cloned().collect();
        for entry in &snapshot {
            visit(entry.key(), entry);
        }
    }

    // == Add ==
    /// Stores a new entry under `key`, replacing any existing entry.
    ///
    /// A finite `ttl` shorter than the currently scheduled wait triggers a
    /// full expiration pass before this returns, which can add latency to
    /// bulk inserts of short-lived entries.
    pub fn add(&self, key: K, ttl: Duration, value: V) -> EntryRef<K, V> {
        let entry = Arc::new(CacheEntry::new(key, ttl, value));
        let mut state = self.inner.state.write();
        self.add_internal(&mut state, entry.clone());
        entry
    }

    // == Add If Absent ==
    /// Stores a new entry only if `key` is not present.
    ///
    /// Returns `false` and leaves the table untouched if the key exists.
    pub fn add_if_absent(&self, key: K, ttl: Duration, value: V) -> bool {
        let mut state = self.inner.state.write();
        if state.items.contains_key(&key) {
            return false;
        }
        let entry = Arc::new(CacheEntry::new(key, ttl, value));
        self.add_internal(&mut state, entry);
        true
    }

    // == Get ==
    /// Looks up `key`, refreshing its idle deadline on a hit.
    ///
    /// See [`get_with`](Self::get_with).
    pub fn get(&self, key: &K) -> Result<EntryRef<K, V>> {
        self.get_with(key, &[])
    }

    /// Looks up `key`, passing `args` to the loader on a miss.
    ///
    /// # Errors
    /// - `KeyNotFound` if the key is absent and no loader is set
    /// - `KeyNotFoundOrLoadable` if the loader produced nothing
    pub fn get_with(&self, key: &K, args: &[&dyn Any]) -> Result<EntryRef<K, V>> {
        let (found, loader) = {
            let state = self.inner.state.read();
            (state.items.get(key).cloned(), state.loader.clone())
        };

        if let Some(entry) = found {
            entry.keep_alive();
            self.inner.stats.lock().record_hit();
            return Ok(entry);
        }
        self.inner.stats.lock().record_miss();

        let loader = loader.ok_or(CacheError::KeyNotFound)?;
        let loaded = loader(key, args).ok_or(CacheError::KeyNotFoundOrLoadable)?;
        let (ttl, value) = loaded.into_parts();
        trace!(table = %self.inner.name, ?key, "loader filled missing key");
        self.inner.stats.lock().record_load();
        Ok(self.add(key.clone(), ttl, value))
    }

    // == Delete ==
    /// Removes `key`, running the about-to-delete callbacks and then the
    /// entry's own expire callbacks before the removal completes.
    pub fn delete(&self, key: &K) -> Result<EntryRef<K, V>> {
        let mut state = self.inner.state.write();
        let entry = state
            .items
            .get(key)
            .cloned()
            .ok_or(CacheError::KeyNotFound)?;

        if self.remove_internal(&mut state, &entry) {
            self.inner.stats.lock().record_deletion();
            Ok(entry)
        } else {
            Err(CacheError::KeyNotFound)
        }
    }

    // == Flush ==
    /// Drops every entry and cancels the pending expiration timer.
    ///
    /// No delete or expire callbacks run.
    pub fn flush(&self) {
        let mut state = self.inner.state.write();
        debug!(table = %self.inner.name, "flushing table");
        state.items = HashMap::new();
        state.next_check_in = None;
        state.cancel_timer();
    }

    // == Top By Access Count ==
    /// Returns up to `count` entries, most accessed first.
    ///
    /// Ties are returned in no particular order.
    pub fn top_by_access_count(&self, count: usize) -> Vec<EntryRef<K, V>> {
        let mut entries: Vec<EntryRef<K, V>> =
            self.inner.state.read().items.values().cloned().collect();
        entries.sort_by_cached_key(|entry| std::cmp::Reverse(entry.access_count()));
        entries.truncate(count);
        entries
    }

    // == Stats ==
    pub fn stats(&self) -> TableStats {
        let mut stats = self.inner.stats.lock().clone();
        stats.set_total_entries(self.count());
        stats
    }

    /// Wait the pending expiration timer was armed with, or `None` when idle.
    pub fn next_check_in(&self) -> Option<Duration> {
        self.inner.state.read().next_check_in
    }

    // == Configuration ==
    /// Sets the function used to fill lookup misses.
    pub fn set_loader<F>(&self, loader: F)
    where
        F: Fn(&K, &[&dyn Any]) -> Option<CacheEntry<K, V>> + Send + Sync + 'static,
    {
        self.inner.state.write().loader = Some(Arc::new(loader));
    }

    /// Replaces all add callbacks with `callback`.
    pub fn set_added_callback<F>(&self, callback: F)
    where
        F: Fn(&EntryRef<K, V>) + Send + Sync + 'static,
    {
        let mut state = self.inner.state.write();
        state.on_added.clear();
        state.on_added.push(Arc::new(callback));
    }

    pub fn add_added_callback<F>(&self, callback: F)
    where
        F: Fn(&EntryRef<K, V>) + Send + Sync + 'static,
    {
        self.inner.state.write().on_added.push(Arc::new(callback));
    }

    pub fn clear_added_callbacks(&self) {
        self.inner.state.write().on_added.clear();
    }

    /// Replaces all about-to-delete callbacks with `callback`.
    pub fn set_about_to_delete_callback<F>(&self, callback: F)
    where
        F: Fn(&EntryRef<K, V>) + Send + Sync + 'static,
    {
        let mut state = self.inner.state.write();
        state.on_about_to_delete.clear();
        state.on_about_to_delete.push(Arc::new(callback));
    }

    pub fn add_about_to_delete_callback<F>(&self, callback: F)
    where
        F: Fn(&EntryRef<K, V>) + Send + Sync + 'static,
    {
        self.inner.state.write().on_about_to_delete.push(Arc::new(callback));
    }

    pub fn clear_about_to_delete_callbacks(&self) {
        self.inner.state.write().on_about_to_delete.clear();
    }

    // == Internal: Add ==
    /// Inserts `entry`, runs the add callbacks unlocked, and reschedules the
    /// sweep if the new entry's TTL is sooner than the pending wait.
    fn add_internal(&self, state: &mut StateGuard<'_, K, V>, entry: EntryRef<K, V>) {
        debug!(
            table = %self.inner.name,
            key = ?entry.key(),
            ttl = ?entry.ttl(),
            "adding entry"
        );
        state.items.insert(entry.key().clone(), entry.clone());

        let callbacks = state.on_added.clone();
        if !callbacks.is_empty() {
            RwLockWriteGuard::unlocked(state, || {
                for callback in &callbacks {
                    callback(&entry);
                }
            });
        }

        // Read after the callbacks: a concurrent add may have armed a sooner check
        let ttl = entry.ttl();
        if !ttl.is_zero() && state.next_check_in.map_or(true, |wait| ttl < wait) {
            self.expiration_check_locked(state);
        }
    }

    // == Internal: Remove ==
    /// Removes `entry` if it is still the one stored under its key.
    ///
    /// Runs about-to-delete callbacks, then the entry's expire callbacks, with
    /// the lock released; the map slot is cleared after they return. Returns
    /// `false` if the entry was replaced or another removal already claimed it.
    ///
    /// If a callback panics the claim is released and the entry stays in the
    /// table, then the panic continues with the lock held again.
    fn remove_internal(&self, state: &mut StateGuard<'_, K, V>, entry: &EntryRef<K, V>) -> bool {
        let key = entry.key();
        let is_current = state
            .items
            .get(key)
            .is_some_and(|current| Arc::ptr_eq(current, entry));
        if !is_current || !entry.begin_removal() {
            return false;
        }

        let callbacks = state.on_about_to_delete.clone();
        let outcome = RwLockWriteGuard::unlocked(state, || {
            panic::catch_unwind(AssertUnwindSafe(|| {
                for callback in &callbacks {
                    callback(entry);
                }
                entry.fire_expire_callbacks();
            }))
        });
        if let Err(payload) = outcome {
            entry.abort_removal();
            panic::resume_unwind(payload);
        }

        debug!(table = %self.inner.name, ?key, "deleting entry");
        if state
            .items
            .get(key)
            .is_some_and(|current| Arc::ptr_eq(current, entry))
        {
            state.items.remove(key);
        }
        true
    }

    // == Internal: Expiration Check ==
    fn expiration_check(&self) {
        let mut state = self.inner.state.write();
        self.expiration_check_locked(&mut state);
    }

    /// Removes every elapsed entry, then arms the timer for the soonest
    /// remaining deadline or goes idle.
    ///
    /// A panicking callback still leaves the next check armed before the
    /// panic continues.
    fn expiration_check_locked(&self, state: &mut StateGuard<'_, K, V>) {
        state.cancel_timer();
        match state.next_check_in.take() {
            Some(wait) => debug!(table = %self.inner.name, ?wait, "expiration check triggered"),
            None => debug!(table = %self.inner.name, "expiration check installed"),
        }

        let now = Instant::now();
        let expired: Vec<EntryRef<K, V>> = state
            .items
            .values()
            .filter(|entry| !entry.is_removing() && entry.expires_in(now) == Some(Duration::ZERO))
            .cloned()
            .collect();

        let removal = panic::catch_unwind(AssertUnwindSafe(|| {
            for entry in &expired {
                if self.remove_internal(state, entry) {
                    self.inner.stats.lock().record_expiration();
                } else {
                    trace!(table = %self.inner.name, key = ?entry.key(), "entry already removed");
                }
            }
        }));

        // Callbacks above ran unlocked; other adds may have armed a timer.
        // Entries another removal is still finishing do not need a deadline.
        state.cancel_timer();
        let now = Instant::now();
        let mut next = state
            .items
            .values()
            .filter(|entry| !entry.is_removing())
            .filter_map(|entry| entry.expires_in(now))
            .min();
        if removal.is_err() {
            next = next.map(|delay| delay.max(PANIC_RETRY_DELAY));
        }
        state.next_check_in = next;

        if let Some(delay) = next {
            let table = Arc::downgrade(&self.inner);
            state.cleanup_timer = Some(spawn_expiration_timer(
                &self.inner.runtime,
                delay,
                move || {
                    if let Some(inner) = table.upgrade() {
                        CacheTable { inner }.expiration_check();
                    }
                },
            ));
        }

        if let Err(payload) = removal {
            panic::resume_unwind(payload);
        }
    }
}

impl<K, V> TableState<K, V> {
    fn cancel_timer(&mut self) {
        if let Some(timer) = self.cleanup_timer.take() {
            timer.abort();
        }
    }
}

impl<K, V> fmt::Debug for CacheTable<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.read();
        f.debug_struct("CacheTable")
            .field("name", &self.inner.name)
            .field("entries", &state.items.len())
            .field("next_check_in", &state.next_check_in)
            .finish()
    }
}
