//! kvttl demo entry point.
//!
//! Wires a delay entry to a store, starts the writer, and runs the reader
//! until Ctrl-C.

use std::sync::Arc;

use kvttl_demo::{
    init_tracing, open_store, spawn_event_consumers, DemoConfig, DemoResult, Reader, Writer,
};
use kvttl_storage::KvCache;

#[tokio::main]
async fn main() -> DemoResult<()> {
    init_tracing()?;
    let config = DemoConfig::load()?;
    let store = open_store(&config)?;

    let cache = KvCache::with_options(
        Arc::clone(&store),
        config.entry.kv_key(),
        config.fallback(),
        config.entry.options(),
    );
    let consumers = spawn_event_consumers(&cache);

    store.delete(cache.key()).await?;
    tracing::info!(key = %cache.key(), "Cleared key");

    let writer = Writer::new(
        cache.clone(),
        Arc::clone(&store),
        config.writer_mode,
        config.max_value_ms,
    )
    .spawn(config.writer_interval());

    let mut reader = Reader::new(cache.clone());
    tokio::select! {
        _ = reader.run() => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    writer.abort();
    for consumer in consumers {
        consumer.abort();
    }

    let stats = cache.stats();
    tracing::info!(
        iterations = reader.iterations(),
        fresh_reads = stats.fresh_reads,
        stale_reads = stats.stale_reads,
        refreshes_started = stats.refreshes_started,
        refreshes_applied = stats.refreshes_applied,
        refreshes_discarded = stats.refreshes_discarded,
        fetch_failures = stats.fetch_failures,
        writes_started = stats.writes_started,
        persist_failures = stats.persist_failures,
        hit_rate = stats.hit_rate(),
        "Shutting down"
    );
    Ok(())
}
