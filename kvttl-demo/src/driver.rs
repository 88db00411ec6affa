//! The moving parts of the demo: store selection, the writer that keeps
//! changing the delay, the reader that sleeps on it, and the consumers that
//! log the entry's events.

use std::sync::Arc;
use std::time::Duration;

use kvttl_core::{CacheRecord, PartialRecord, StoreResult};
use kvttl_storage::{BackingStore, BackingStoreExt, InMemoryStore, KvCache, LmdbStore};
use rand::Rng;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_stream::StreamExt;

use crate::config::{DemoConfig, WriterMode};
use crate::error::DemoResult;

/// Open the configured store: LMDB when a path is set, in-memory otherwise.
pub fn open_store(config: &DemoConfig) -> DemoResult<Arc<dyn BackingStore>> {
    match &config.store {
        Some(store) => {
            let lmdb = LmdbStore::new(&store.path, store.max_size_mb)?;
            tracing::info!(
                path = %store.path.display(),
                max_size_mb = store.max_size_mb,
                "Opened LMDB store"
            );
            Ok(Arc::new(lmdb))
        }
        None => {
            tracing::info!("Using in-memory store");
            Ok(Arc::new(InMemoryStore::new()))
        }
    }
}

/// Drain the entry's info and error streams into the log.
///
/// Streams already taken elsewhere are skipped.
pub fn spawn_event_consumers<S>(cache: &KvCache<f64, S>) -> Vec<JoinHandle<()>>
where
    S: BackingStore + ?Sized + 'static,
{
    let mut handles = Vec::with_capacity(2);

    if let Some(mut info) = cache.info_stream() {
        handles.push(tokio::spawn(async move {
            while let Some(message) = info.next().await {
                tracing::info!(target: "kvttl_demo::events", "{}", message);
            }
        }));
    }

    if let Some(mut errors) = cache.error_stream() {
        handles.push(tokio::spawn(async move {
            while let Some(error) = errors.next().await {
                let cause = std::error::Error::source(&error).map(ToString::to_string);
                tracing::error!(error = %error, cause = ?cause, "some cache failure");
            }
        }));
    }

    handles
}

/// Periodically replaces the delay with a random one.
pub struct Writer<S: ?Sized> {
    cache: KvCache<f64, S>,
    store: Arc<S>,
    mode: WriterMode,
    max_value_ms: f64,
}

impl<S> Writer<S>
where
    S: BackingStore + ?Sized + 'static,
{
    pub fn new(cache: KvCache<f64, S>, store: Arc<S>, mode: WriterMode, max_value_ms: f64) -> Self {
        Self {
            cache,
            store,
            mode,
            max_value_ms,
        }
    }

    /// Draw a delay in `[0, max_value_ms)` and write it.
    ///
    /// In store mode the record carries the fallback TTL, and the entry
    /// only notices it on its next refresh.
    pub async fn write_once(&self) -> StoreResult<f64> {
        let value = if self.max_value_ms > 0.0 {
            rand::rng().random_range(0.0..self.max_value_ms)
        } else {
            0.0
        };

        match self.mode {
            WriterMode::Store => {
                let record = CacheRecord::new(value, self.cache.fallback().expire_in);
                let ack = self.store.write_record(self.cache.key(), &record).await?;
                tracing::debug!(value, versionstamp = ack.versionstamp, "Wrote delay to store");
            }
            WriterMode::Cache => {
                self.cache.set(PartialRecord::value(value));
                tracing::debug!(value, "Set delay through the entry");
            }
        }
        Ok(value)
    }

    /// Write every `every`, starting one period from now.
    pub fn spawn(self, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
            loop {
                ticker.tick().await;
                if let Err(e) = self.write_once().await {
                    tracing::warn!(error = %e, "Writer failed");
                }
            }
        })
    }
}

/// Reads the delay and sleeps on it, forever.
pub struct Reader<S: ?Sized> {
    cache: KvCache<f64, S>,
    iterations: u64,
}

impl<S> Reader<S>
where
    S: BackingStore + ?Sized + 'static,
{
    pub fn new(cache: KvCache<f64, S>) -> Self {
        Self {
            cache,
            iterations: 0,
        }
    }

    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    /// One iteration: read the delay, then sleep for it.
    ///
    /// Negative or non-finite delays sleep for zero.
    pub async fn step(&mut self) -> Duration {
        self.iterations += 1;
        let delay_ms = self.cache.get().await;
        tracing::info!(iteration = self.iterations, delay_ms, "Sleeping");

        let delay = Duration::try_from_secs_f64(delay_ms / 1000.0).unwrap_or(Duration::ZERO);
        tokio::time::sleep(delay).await;
        delay
    }

    pub async fn run(&mut self) {
        loop {
            self.step().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use kvttl_core::Fallback;

    const TTL: Duration = Duration::from_millis(2500);

    fn entry(store: &Arc<dyn BackingStore>) -> KvCache<f64, dyn BackingStore> {
        KvCache::new(
            Arc::clone(store),
            DemoConfig::default().entry.kv_key(),
            Fallback::new(250.0, TTL),
        )
    }

    #[tokio::test]
    async fn test_open_store_defaults_to_memory() {
        let store = open_store(&DemoConfig::default()).unwrap();
        let key = DemoConfig::default().entry.kv_key();
        store.set(&key, b"{}".to_vec()).await.unwrap();
        assert_eq!(store.get(&key).await.unwrap(), Some(b"{}".to_vec()));
    }

    #[tokio::test]
    async fn test_open_store_uses_lmdb_when_configured() {
        let dir = tempfile::tempdir().unwrap();
        let config = DemoConfig {
            store: Some(StoreConfig {
                path: dir.path().join("db"),
                max_size_mb: 8,
            }),
            ..DemoConfig::default()
        };
        let store = open_store(&config).unwrap();
        let key = config.entry.kv_key();
        store.set(&key, b"1".to_vec()).await.unwrap();
        assert!(dir.path().join("db").exists());
        assert_eq!(store.get(&key).await.unwrap(), Some(b"1".to_vec()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_mode_bypasses_entry() {
        let store = open_store(&DemoConfig::default()).unwrap();
        let cache = entry(&store);
        let writer = Writer::new(cache.clone(), Arc::clone(&store), WriterMode::Store, 1000.0);

        let value = writer.write_once().await.unwrap();
        assert!((0.0..1000.0).contains(&value));

        let stored = store.read_record::<f64>(cache.key()).await.unwrap().unwrap();
        assert_eq!(stored.value, Some(value));
        assert_eq!(stored.expire_in, Some(TTL));

        // still fresh on the fallback until the TTL lapses
        assert_eq!(cache.get().await, 250.0);
        tokio::time::advance(TTL).await;
        assert_eq!(cache.get().await, value);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_mode_is_visible_immediately() {
        let store = open_store(&DemoConfig::default()).unwrap();
        let cache = entry(&store);
        let writer = Writer::new(cache.clone(), Arc::clone(&store), WriterMode::Cache, 10.0);

        let value = writer.write_once().await.unwrap();
        assert!((0.0..10.0).contains(&value));
        assert_eq!(cache.get().await, value);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_writer_waits_one_period() {
        let store = open_store(&DemoConfig::default()).unwrap();
        let cache = entry(&store);
        let handle = Writer::new(cache.clone(), Arc::clone(&store), WriterMode::Cache, 10.0)
            .spawn(Duration::from_millis(1000));

        tokio::time::sleep(Duration::from_millis(999)).await;
        assert_eq!(cache.stats().writes_started, 0);
        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(cache.stats().writes_started, 1);

        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_reader_sleeps_for_the_delay() {
        let store = open_store(&DemoConfig::default()).unwrap();
        let mut reader = Reader::new(entry(&store));

        let start = Instant::now();
        let slept = reader.step().await;
        assert_eq!(slept, Duration::from_millis(250));
        assert!(start.elapsed() >= Duration::from_millis(250));
        assert_eq!(reader.iterations(), 1);
    }

    #[tokio::test]
    async fn test_consumers_take_both_streams() {
        let store = open_store(&DemoConfig::default()).unwrap();
        let cache = entry(&store);

        let handles = spawn_event_consumers(&cache);
        assert_eq!(handles.len(), 2);
        assert!(cache.info_stream().is_none());
        assert!(cache.error_stream().is_none());
        assert!(spawn_event_consumers(&cache).is_empty());

        for handle in handles {
            handle.abort();
        }
    }
}
