//! Integration Tests for Cache Tables
//!
//! Exercises expiry timing, loading, callbacks and concurrent use through the
//! public API.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::sleep;
use tokio_test::{assert_err, assert_ok};
use ttl_table::{CacheEntry, CacheError, CacheTable, TableRegistry};

// == Helper Functions ==

fn create_test_table() -> CacheTable<String, String> {
    CacheTable::new("integration")
}

fn key(name: &str) -> String {
    name.to_string()
}

// == Expiration ==

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_never_expiring_entry_survives() {
    let table = create_test_table();
    table.add(key("K1"), Duration::ZERO, key("v"));

    // A short-lived neighbour keeps the sweep running meanwhile
    table.add(key("short"), Duration::from_millis(20), key("v"));
    sleep(Duration::from_millis(150)).await;

    assert!(table.exists(&key("K1")));
    assert!(!table.exists(&key("short")));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_passive_expiry() {
    let table = create_test_table();
    table.add(key("K2"), Duration::from_millis(50), key("v"));
    assert!(table.exists(&key("K2")));

    sleep(Duration::from_millis(150)).await;

    assert!(!table.exists(&key("K2")));
    assert_eq!(table.count(), 0);
    assert!(table.next_check_in().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_keep_alive_extends_life() {
    let table = create_test_table();
    table.add(key("K3"), Duration::from_millis(200), key("v"));

    for _ in 0..8 {
        sleep(Duration::from_millis(50)).await;
        assert_ok!(table.get(&key("K3")));
    }
    // 400ms after insertion, well past the original deadline
    assert!(table.exists(&key("K3")));

    sleep(Duration::from_millis(400)).await;
    assert!(!table.exists(&key("K3")));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_expiry_runs_callbacks_in_order() {
    let table = create_test_table();
    let events = Arc::new(Mutex::new(Vec::new()));

    let log = events.clone();
    table.set_about_to_delete_callback(move |entry| {
        log.lock().unwrap().push(format!("table:{}", entry.key()));
    });
    let entry = table.add(key("K"), Duration::from_millis(30), key("v"));
    let log = events.clone();
    entry.set_expire_callback(move |k| log.lock().unwrap().push(format!("entry:{k}")));

    sleep(Duration::from_millis(200)).await;

    assert_eq!(*events.lock().unwrap(), vec!["table:K", "entry:K"]);
    assert_eq!(table.stats().expirations, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_flush_cancels_pending_sweep() {
    let table = create_test_table();
    let deleted = Arc::new(AtomicUsize::new(0));
    let counter = deleted.clone();
    table.set_about_to_delete_callback(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    table.add(key("a"), Duration::from_millis(50), key("v"));
    table.flush();
    assert!(table.next_check_in().is_none());

    sleep(Duration::from_millis(150)).await;
    assert_eq!(deleted.load(Ordering::SeqCst), 0);
}

// == Loader ==

#[tokio::test]
async fn test_loader_fill() {
    let table = create_test_table();
    table.set_loader(|k, _args| {
        (k == "K4").then(|| CacheEntry::new(k.clone(), Duration::ZERO, key("V")))
    });

    let entry = assert_ok!(table.get(&key("K4")));
    assert_eq!(entry.value(), "V");
    assert!(table.exists(&key("K4")));
    assert_eq!(table.stats().loads, 1);
}

#[tokio::test]
async fn test_loader_receives_extra_args() {
    let table: CacheTable<String, usize> = CacheTable::new("args");
    table.set_loader(|k, args| {
        let scale = args.first()?.downcast_ref::<usize>()?;
        Some(CacheEntry::new(k.clone(), Duration::ZERO, k.len() * scale))
    });

    let entry = assert_ok!(table.get_with(&key("abc"), &[&10usize]));
    assert_eq!(*entry.value(), 30);

    let result = table.get(&key("xyz"));
    assert_eq!(result.unwrap_err(), CacheError::KeyNotFoundOrLoadable);
}

#[tokio::test]
async fn test_loader_miss() {
    let table = create_test_table();
    table.set_loader(|_, _| None);

    let result = table.get(&key("K5"));
    assert!(matches!(result, Err(CacheError::KeyNotFoundOrLoadable)));
    assert!(!table.exists(&key("K5")));
}

#[tokio::test]
async fn test_no_loader() {
    let table = create_test_table();
    let result = table.get(&key("K6"));
    assert!(matches!(result, Err(CacheError::KeyNotFound)));
}

// == Table Operations ==

#[tokio::test]
async fn test_flush_idempotent() {
    let table = create_test_table();
    for i in 0..5 {
        table.add(format!("k{i}"), Duration::from_secs(60), key("v"));
    }

    table.flush();
    assert_eq!(table.count(), 0);
    table.flush();
    assert_eq!(table.count(), 0);
}

#[tokio::test]
async fn test_top_by_access_count() {
    let table = create_test_table();
    for (name, accesses) in [("one", 1), ("five", 5), ("three", 3)] {
        table.add(key(name), Duration::ZERO, key("v"));
        for _ in 0..accesses {
            table.get(&key(name)).unwrap();
        }
    }

    let top = table.top_by_access_count(2);
    let keys: Vec<&str> = top.iter().map(|e| e.key().as_str()).collect();
    assert_eq!(keys, vec!["five", "three"]);

    assert_eq!(table.top_by_access_count(10).len(), 3);
}

#[tokio::test]
async fn test_delete_callback_ordering() {
    let table = create_test_table();
    let events = Arc::new(Mutex::new(Vec::new()));

    let log = events.clone();
    table.set_about_to_delete_callback(move |_| log.lock().unwrap().push("table"));
    let entry = table.add(key("K"), Duration::ZERO, key("v"));
    let log = events.clone();
    entry.add_expire_callback(move |_| log.lock().unwrap().push("entry"));

    let deleted = assert_ok!(table.delete(&key("K")));
    assert!(Arc::ptr_eq(&deleted, &entry));
    assert_eq!(*events.lock().unwrap(), vec!["table", "entry"]);

    assert_err!(table.delete(&key("K")));
    assert_eq!(events.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn test_old_entry_is_frozen_snapshot() {
    let table = create_test_table();
    let old = table.add(key("K"), Duration::ZERO, key("first"));
    table.add(key("K"), Duration::ZERO, key("second"));

    assert_eq!(old.value(), "first");
    assert_eq!(table.get(&key("K")).unwrap().value(), "second");
}

// == Concurrency ==

#[test]
fn test_concurrent_adds_distinct_keys() {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let table: CacheTable<usize, usize> =
        CacheTable::with_runtime("concurrent", runtime.handle().clone());
    let n = 64;

    let handles: Vec<_> = (0..n)
        .map(|i| {
            let table = table.clone();
            std::thread::spawn(move || {
                table.add(i, Duration::ZERO, i * 2);
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(table.count(), n);
}

#[test]
fn test_concurrent_deletes_fire_callbacks_once() {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let table: CacheTable<usize, ()> = CacheTable::with_runtime("race", runtime.handle().clone());
    let fired = Arc::new(AtomicUsize::new(0));
    let counter = fired.clone();
    table.set_about_to_delete_callback(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(5));
    });
    table.add(1, Duration::ZERO, ());

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let table = table.clone();
            std::thread::spawn(move || table.delete(&1).is_ok())
        })
        .collect();
    let successes = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|ok| *ok)
        .count();

    assert_eq!(successes, 1);
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert!(!table.exists(&1));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_delete_racing_sweep_fires_callbacks_once() {
    let table: CacheTable<usize, ()> = CacheTable::new("sweep-race");
    let fired = Arc::new(AtomicUsize::new(0));
    let counter = fired.clone();
    table.set_about_to_delete_callback(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(5));
    });

    let rounds = 30;
    for i in 0..rounds {
        table.add(i, Duration::from_millis(10), ());
        sleep(Duration::from_millis(10)).await;

        let racer = table.clone();
        let result = tokio::task::spawn_blocking(move || racer.delete(&i))
            .await
            .unwrap();
        if let Err(err) = result {
            assert_eq!(err, CacheError::KeyNotFound);
        }

        // Let a sweep that won the race finish its removal
        sleep(Duration::from_millis(30)).await;
        assert!(!table.exists(&i), "round {i}: key should be gone");
        assert_eq!(fired.load(Ordering::SeqCst), i + 1, "round {i}: one callback");
    }

    let stats = table.stats();
    assert_eq!(stats.expirations + stats.deletions, rounds as u64);
    assert_eq!(stats.total_entries, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_expire_callback_can_reenter_table() {
    let table = create_test_table();
    let inner = table.clone();
    let entry = table.add(key("old"), Duration::from_millis(30), key("v"));
    entry.set_expire_callback(move |k| {
        inner.add(format!("{k}-tombstone"), Duration::ZERO, key("gone"));
    });

    sleep(Duration::from_millis(200)).await;

    assert!(!table.exists(&key("old")));
    assert!(table.exists(&key("old-tombstone")));
}

#[tokio::test]
async fn test_registry_shares_tables() {
    let registry: TableRegistry<String, String> = TableRegistry::new();
    registry
        .get_or_create("sessions")
        .add(key("id"), Duration::ZERO, key("v"));

    assert!(registry.get_or_create("sessions").exists(&key("id")));
    assert_eq!(registry.len(), 1);
}
