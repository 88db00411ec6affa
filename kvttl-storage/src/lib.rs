//! kvttl Storage - Backing Stores and the Cache Entry
//!
//! Defines the backing store abstraction (with in-memory and LMDB
//! implementations) and the [`KvCache`] entry that fronts one key of such a
//! store with a TTL, single-flight refresh and write-through semantics.

pub mod cache;
pub mod store;

pub use cache::{
    deferred, effective_ttl, CacheEvents, EntryStats, EventQueue, EventStream, Freshness, Gate,
    KvCache,
};
pub use store::{
    decode_key, encode_key, BackingStore, BackingStoreExt, InMemoryStore, LmdbStore,
    LmdbStoreError,
};

// Re-export core types for convenience
pub use kvttl_core::{
    CacheRecord, CacheValue, CommitAck, EntryOptions, Fallback, FetchError, KeyPart, KvCacheError,
    KvKey, PartialRecord, PersistError, StoreError, StoreResult,
};
