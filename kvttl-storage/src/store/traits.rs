//! Backing store traits.
//!
//! This module defines the trait implemented by durable stores and the typed
//! record layer every store gets on top of it.

use async_trait::async_trait;
use kvttl_core::{CacheRecord, CacheValue, CommitAck, KvKey, PartialRecord, StoreError, StoreResult};

/// Durable, shared key-value store backing a cache entry.
///
/// Implementations must be safe to share between tasks. Values are opaque
/// bytes at this level; the record encoding is handled by
/// [`BackingStoreExt`].
#[async_trait]
pub trait BackingStore: Send + Sync {
    /// Read the bytes stored under `key`, or `None` if there is no record.
    async fn get(&self, key: &KvKey) -> StoreResult<Option<Vec<u8>>>;

    /// Store `value` under `key`, replacing any previous record.
    async fn set(&self, key: &KvKey, value: Vec<u8>) -> StoreResult<CommitAck>;

    /// Remove the record under `key`. Removing a missing record is not an
    /// error.
    async fn delete(&self, key: &KvKey) -> StoreResult<()>;
}

/// Typed record access for every [`BackingStore`].
///
/// Records are stored as JSON objects of the form
/// `{"value": <T>, "expireIn": <millis>}`.
#[async_trait]
pub trait BackingStoreExt: BackingStore {
    /// Read and decode the record under `key`.
    ///
    /// A stored record may omit either field; malformed bytes fail with
    /// [`StoreError::Deserialization`].
    async fn read_record<T: CacheValue>(&self, key: &KvKey) -> StoreResult<Option<PartialRecord<T>>> {
        match self.get(key).await? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| StoreError::Deserialization(e.to_string())),
            None => Ok(None),
        }
    }

    /// Encode and write a complete record under `key`.
    async fn write_record<T: CacheValue>(
        &self,
        key: &KvKey,
        record: &CacheRecord<T>,
    ) -> StoreResult<CommitAck> {
        let bytes =
            serde_json::to_vec(record).map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.set(key, bytes).await
    }
}

impl<S: BackingStore + ?Sized> BackingStoreExt for S {}

