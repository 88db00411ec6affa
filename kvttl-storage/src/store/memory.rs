//! In-memory backing store.

use std::collections::BTreeMap;

use async_trait::async_trait;
use kvttl_core::{CommitAck, KvKey, StoreResult};

use super::key_codec::encode_key;
use super::traits::BackingStore;

/// Process-local backing store.
///
/// Uses tokio::sync::RwLock for safe async access. Keys are kept in their
/// encoded form so iteration order matches the LMDB store.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    inner: tokio::sync::RwLock<MemoryInner>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    records: BTreeMap<Vec<u8>, Vec<u8>>,
    versionstamp: u64,
}

impl InMemoryStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records currently stored.
    pub async fn len(&self) -> usize {
        self.inner.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl BackingStore for InMemoryStore {
    async fn get(&self, key: &KvKey) -> StoreResult<Option<Vec<u8>>> {
        let inner = self.inner.read().await;
        Ok(inner.records.get(&encode_key(key)).cloned())
    }

    async fn set(&self, key: &KvKey, value: Vec<u8>) -> StoreResult<CommitAck> {
        let mut inner = self.inner.write().await;
        inner.records.insert(encode_key(key), value);
        inner.versionstamp += 1;
        Ok(CommitAck {
            versionstamp: inner.versionstamp,
        })
    }

    async fn delete(&self, key: &KvKey) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        inner.records.remove(&encode_key(key));
        Ok(())
    }
}
