//! TTL Table demo
//!
//! Exercises a registry-owned table end to end: callbacks, a miss loader,
//! keep-alive reads, the most-accessed ranking and passive expiry.

use std::time::Duration;

use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ttl_table::{CacheEntry, Config, TableRegistry};

/// Main entry point for the demo.
///
/// # Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Create the table through a registry and install callbacks and loader
/// 4. Insert a mix of expiring and permanent entries, then read some of them
/// 5. Wait past the TTL and report what the sweep left behind
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ttl_table=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    info!(
        "Configuration loaded: table={}, entries={}, ttl={}ms, top_n={}",
        config.table_name, config.entries, config.ttl_ms, config.top_n
    );

    let registry: TableRegistry<String, String> = TableRegistry::new();
    let table = registry.get_or_create(&config.table_name);

    table.set_added_callback(|entry| {
        info!(key = %entry.key(), ttl = ?entry.ttl(), "entry added");
    });
    table.set_about_to_delete_callback(|entry| {
        info!(
            key = %entry.key(),
            accesses = entry.access_count(),
            "entry about to be deleted"
        );
    });
    table.set_loader(|key, _args| {
        key.starts_with("lazy-")
            .then(|| CacheEntry::new(key.clone(), Duration::ZERO, format!("loaded {key}")))
    });

    // Even keys expire, odd keys live until flushed
    for i in 0..config.entries {
        let ttl = if i % 2 == 0 { config.ttl() } else { Duration::ZERO };
        table.add(format!("key-{i}"), ttl, format!("value-{i}"));
    }
    for i in 0..config.entries {
        for _ in 0..(i % 4) {
            table.get(&format!("key-{i}"))?;
        }
    }

    let lazy = table.get(&"lazy-1".to_string())?;
    info!(value = %lazy.value(), "filled by loader");
    if let Err(err) = table.get(&"missing".to_string()) {
        warn!(%err, "lookup failed");
    }

    for entry in table.top_by_access_count(config.top_n) {
        info!(
            key = %entry.key(),
            accesses = entry.access_count(),
            "most accessed"
        );
    }

    tokio::time::sleep(config.ttl() * 2).await;
    info!(remaining = table.count(), "expired entries swept");

    println!("{}", serde_json::to_string_pretty(&table.stats())?);

    table.flush();
    info!("Demo complete");
    Ok(())
}
