//! Cache Entry Module
//!
//! Defines a single table entry: immutable key/value/TTL plus access metadata
//! guarded by the entry's own lock.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

/// Callback invoked with the entry's key right before the entry is removed.
pub type ExpireCallback<K> = Arc<dyn Fn(&K) + Send + Sync>;

/// Mutable access metadata, only touched through the entry's lock.
struct AccessMeta<K> {
    last_access_at: Instant,
    access_count: u64,
    on_expire: Vec<ExpireCallback<K>>,
}

// == Cache Entry ==
/// A single stored key/value pair.
///
/// The value is never mutated. Updating a key in a table replaces the whole
/// entry, so a previously obtained entry keeps observing the old value.
pub struct CacheEntry<K, V> {
    key: K,
    value: V,
    /// Idle lifetime; zero means the entry never expires
    ttl: Duration,
    created_at: Instant,
    meta: RwLock<AccessMeta<K>>,
    /// Set once by whichever removal path claims this entry first
    removing: AtomicBool,
}

impl<K, V> CacheEntry<K, V> {
    // == Constructor ==
    /// Creates a new entry. A zero `ttl` means the entry never expires.
    pub fn new(key: K, ttl: Duration, value: V) -> Self {
        let now = Instant::now();
        Self {
            key,
            value,
            ttl,
            created_at: now,
            meta: RwLock::new(AccessMeta {
                last_access_at: now,
                access_count: 0,
                on_expire: Vec::new(),
            }),
            removing: AtomicBool::new(false),
        }
    }

    // == Immutable Accessors ==
    pub fn key(&self) -> &K {
        &self.key
    }

    pub fn value(&self) -> &V {
        &self.value
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    // == Keep Alive ==
    /// Refreshes the last access time and bumps the access counter.
    ///
    /// This pushes back the deadline the expiration sweep checks against.
    pub fn keep_alive(&self) {
        let mut meta = self.meta.write();
        meta.last_access_at = Instant::now();
        meta.access_count += 1;
    }

    pub fn last_access_at(&self) -> Instant {
        self.meta.read().last_access_at
    }

    pub fn access_count(&self) -> u64 {
        self.meta.read().access_count
    }

    // == Expires In ==
    /// Returns the remaining idle life at `now`.
    ///
    /// # Returns
    /// - `None` if the entry never expires
    /// - `Some(Duration::ZERO)` if the TTL has fully elapsed
    /// - `Some(remaining)` otherwise
    pub fn expires_in(&self, now: Instant) -> Option<Duration> {
        if self.ttl.is_zero() {
            return None;
        }
        let idle = now.saturating_duration_since(self.last_access_at());
        Some(self.ttl.saturating_sub(idle))
    }

    // == Expire Callbacks ==
    /// Replaces all expire callbacks with `callback`.
    pub fn set_expire_callback<F>(&self, callback: F)
    where
        F: Fn(&K) + Send + Sync + 'static,
    {
        let mut meta = self.meta.write();
        meta.on_expire.clear();
        meta.on_expire.push(Arc::new(callback));
    }

    /// Appends an expire callback.
    pub fn add_expire_callback<F>(&self, callback: F)
    where
        F: Fn(&K) + Send + Sync + 'static,
    {
        self.meta.write().on_expire.push(Arc::new(callback));
    }

    pub fn clear_expire_callbacks(&self) {
        self.meta.write().on_expire.clear();
    }

    /// Runs the expire callbacks in registration order.
    ///
    /// The list is copied out first so callbacks may re-register on this entry.
    pub(crate) fn fire_expire_callbacks(&self) {
        let callbacks = self.meta.read().on_expire.clone();
        for callback in &callbacks {
            callback(&self.key);
        }
    }

    /// Claims this entry for removal. Only the first caller gets `true`.
    pub(crate) fn begin_removal(&self) -> bool {
        !self.removing.swap(true, Ordering::AcqRel)
    }

    /// Releases a claim whose removal did not complete.
    pub(crate) fn abort_removal(&self) {
        self.removing.store(false, Ordering::Release);
    }

    pub(crate) fn is_removing(&self) -> bool {
        self.removing.load(Ordering::Acquire)
    }

    pub(crate) fn into_parts(self) -> (Duration, V) {
        (self.ttl, self.value)
    }
}

impl<K: fmt::Debug, V: fmt::Debug> fmt::Debug for CacheEntry<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let meta = self.meta.read();
        f.debug_struct("CacheEntry")
            .field("key", &self.key)
            .field("value", &self.value)
            .field("ttl", &self.ttl)
            .field("access_count", &meta.access_count)
            .field("expire_callbacks", &meta.on_expire.len())
            .finish()
    }
}
