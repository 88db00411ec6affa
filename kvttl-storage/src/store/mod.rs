//! Backing stores.
//!
//! A backing store is the durable, shared home of a cache entry's record.
//! Stores are byte-oriented and keyed by [`KvKey`](kvttl_core::KvKey); the
//! typed record layer lives in [`BackingStoreExt`], so any store gets JSON
//! record handling for free.

pub mod key_codec;
pub mod lmdb_backend;
pub mod memory;
pub mod traits;

pub use key_codec::{decode_key, encode_key};
pub use lmdb_backend::{LmdbStore, LmdbStoreError};
pub use memory::InMemoryStore;
pub use traits::{BackingStore, BackingStoreExt};
