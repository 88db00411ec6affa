//! kvttl Test Utilities
//!
//! Shared test infrastructure for the kvttl workspace:
//! - A scripted backing store that can fail or hold calls on demand
//! - Proptest generators for keys and records
//! - Fixtures for the reference cache entry
//! - Assertions on reported cache errors

// Re-export core types for convenience
pub use kvttl_core::{
    CacheRecord, CommitAck, EntryOptions, Fallback, KeyPart, KvCacheError, KvKey, PartialRecord,
    StoreError, StoreResult,
};
pub use kvttl_storage::{BackingStore, BackingStoreExt, Gate, InMemoryStore, KvCache};

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use kvttl_core::CacheValue;
use tokio::sync::watch;

// ============================================================================
// SCRIPTED STORE
// ============================================================================

/// In-memory store whose behaviour tests can steer.
///
/// Every call through [`BackingStore`] is counted. Reads and writes can be
/// made to fail, or held open until the test releases them. A held read
/// captures the stored bytes *before* it blocks, so it hands back whatever
/// was stored when it started, like a slow round trip would.
#[derive(Debug)]
pub struct ScriptedStore {
    inner: InMemoryStore,
    reads: watch::Sender<usize>,
    writes: watch::Sender<usize>,
    script: Mutex<Script>,
}

#[derive(Debug, Default)]
struct Script {
    fail_reads: bool,
    fail_writes: bool,
    read_hold: Option<Gate>,
    write_hold: Option<Gate>,
}

impl Default for ScriptedStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedStore {
    pub fn new() -> Self {
        Self {
            inner: InMemoryStore::new(),
            reads: watch::channel(0).0,
            writes: watch::channel(0).0,
            script: Mutex::new(Script::default()),
        }
    }

    fn script(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of `get` calls seen so far.
    pub fn reads(&self) -> usize {
        *self.reads.borrow()
    }

    /// Number of `set` calls seen so far.
    pub fn writes(&self) -> usize {
        *self.writes.borrow()
    }

    /// Wait until at least `count` reads have taken their snapshot.
    pub async fn reads_reached(&self, count: usize) {
        let mut rx = self.reads.subscribe();
        let _ = rx.wait_for(|seen| *seen >= count).await;
    }

    /// Wait until at least `count` writes have started.
    pub async fn writes_reached(&self, count: usize) {
        let mut rx = self.writes.subscribe();
        let _ = rx.wait_for(|seen| *seen >= count).await;
    }

    pub fn fail_reads(&self, fail: bool) {
        self.script().fail_reads = fail;
    }

    pub fn fail_writes(&self, fail: bool) {
        self.script().fail_writes = fail;
    }

    /// Block every read that starts from now on until [`release_reads`].
    ///
    /// [`release_reads`]: ScriptedStore::release_reads
    pub fn hold_reads(&self) {
        self.script().read_hold.get_or_insert_with(Gate::new);
    }

    pub fn release_reads(&self) {
        if let Some(gate) = self.script().read_hold.take() {
            gate.resolve();
        }
    }

    /// Block every write that starts from now on until [`release_writes`].
    ///
    /// [`release_writes`]: ScriptedStore::release_writes
    pub fn hold_writes(&self) {
        self.script().write_hold.get_or_insert_with(Gate::new);
    }

    pub fn release_writes(&self) {
        if let Some(gate) = self.script().write_hold.take() {
            gate.resolve();
        }
    }

    /// Put a record in place without going through the counters.
    pub async fn seed<T: CacheValue>(&self, key: &KvKey, record: &CacheRecord<T>) {
        let _ = self.inner.write_record(key, record).await;
    }

    /// Put raw bytes in place without going through the counters.
    pub async fn seed_raw(&self, key: &KvKey, bytes: &[u8]) {
        let _ = self.inner.set(key, bytes.to_vec()).await;
    }

    /// Read what is stored without going through the counters.
    pub async fn stored<T: CacheValue>(&self, key: &KvKey) -> Option<PartialRecord<T>> {
        self.inner.read_record(key).await.ok().flatten()
    }
}

#[async_trait]
impl BackingStore for ScriptedStore {
    async fn get(&self, key: &KvKey) -> StoreResult<Option<Vec<u8>>> {
        let (fail, hold) = {
            let script = self.script();
            (script.fail_reads, script.read_hold.clone())
        };

        let snapshot = self.inner.get(key).await;
        self.reads.send_modify(|seen| *seen += 1);
        if let Some(gate) = hold {
            gate.wait().await;
        }
        if fail {
            return Err(StoreError::Unavailable {
                reason: "scripted read failure".to_string(),
            });
        }
        snapshot
    }

    async fn set(&self, key: &KvKey, value: Vec<u8>) -> StoreResult<CommitAck> {
        self.writes.send_modify(|seen| *seen += 1);
        let (fail, hold) = {
            let script = self.script();
            (script.fail_writes, script.write_hold.clone())
        };

        if let Some(gate) = hold {
            gate.wait().await;
        }
        if fail {
            return Err(StoreError::Transaction("scripted write failure".to_string()));
        }
        self.inner.set(key, value).await
    }

    async fn delete(&self, key: &KvKey) -> StoreResult<()> {
        self.inner.delete(key).await
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    use super::*;
    use proptest::prelude::*;
    use std::time::Duration;

    /// Generate a single key part of any kind.
    pub fn arb_key_part() -> impl Strategy<Value = KeyPart> {
        prop_oneof![
            any::<bool>().prop_map(KeyPart::Bool),
            any::<i64>().prop_map(KeyPart::Int),
            "[a-z0-9_]{0,12}".prop_map(KeyPart::Str),
            proptest::collection::vec(any::<u8>(), 0..12).prop_map(KeyPart::Bytes),
        ]
    }

    /// Generate a non-empty key.
    pub fn arb_kv_key() -> impl Strategy<Value = KvKey> {
        proptest::collection::vec(arb_key_part(), 1..5).prop_map(KvKey::new)
    }

    /// Generate a TTL between 1ms and 10s.
    pub fn arb_ttl() -> impl Strategy<Value = Duration> {
        (1u64..10_000).prop_map(Duration::from_millis)
    }

    pub fn arb_cache_record() -> impl Strategy<Value = CacheRecord<u32>> {
        (any::<u32>(), arb_ttl()).prop_map(|(value, ttl)| CacheRecord::new(value, ttl))
    }

    /// Generate a record with each field independently present or absent.
    pub fn arb_partial_record() -> impl Strategy<Value = PartialRecord<u32>> {
        (proptest::option::of(any::<u32>()), proptest::option::of(arb_ttl())).prop_map(
            |(value, expire_in)| {
                let mut record = PartialRecord::empty();
                if let Some(value) = value {
                    record = record.with_value(value);
                }
                if let Some(expire_in) = expire_in {
                    record = record.with_expire_in(expire_in);
                }
                record
            },
        )
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    /// Fallback TTL of the reference entry.
    pub const REFERENCE_TTL: Duration = Duration::from_millis(2500);

    /// Key of the reference entry.
    pub fn reference_key() -> KvKey {
        KvKey::new(["path0", "path1"])
    }

    /// 250ms of delay, valid for 2.5s.
    pub fn reference_fallback() -> Fallback<f64> {
        Fallback::new(250.0, REFERENCE_TTL)
    }

    /// The reference entry over `store`.
    pub fn reference_entry<S: BackingStore + 'static>(store: &Arc<S>) -> KvCache<f64, S> {
        KvCache::new(Arc::clone(store), reference_key(), reference_fallback())
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    use super::*;

    /// Assert that `error` is a failed read of `key`.
    pub fn assert_fetch_error(error: &KvCacheError, key: &KvKey) {
        assert!(error.is_fetch(), "Expected fetch error, got: {:?}", error);
        assert_eq!(error.key(), key);
    }

    /// Assert that `error` is a failed write of `key`.
    pub fn assert_persist_error(error: &KvCacheError, key: &KvKey) {
        assert!(error.is_persist(), "Expected persist error, got: {:?}", error);
        assert_eq!(error.key(), key);
    }

    /// Assert that `error` was caused by a store timeout.
    pub fn assert_timed_out(error: &KvCacheError) {
        assert!(
            matches!(error.store_error(), StoreError::Timeout { .. }),
            "Expected timeout, got: {:?}",
            error.store_error()
        );
    }
}
