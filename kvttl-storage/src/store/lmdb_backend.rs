//! LMDB-backed store.
//!
//! Uses the heed crate (Rust bindings for LMDB) to provide a durable,
//! memory-mapped key-value store that several processes on one host can
//! share.
//!
//! # Thread Safety
//!
//! LMDB provides ACID transactions. The store uses:
//! - Read transactions for `get`
//! - Write transactions for `set` and `delete`
//! - An atomic counter for commit versionstamps

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};
use kvttl_core::{CommitAck, KvKey, StoreError, StoreResult};

use super::key_codec::encode_key;
use super::traits::BackingStore;

/// Error type for LMDB store setup and operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbStoreError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbStoreError> for StoreError {
    fn from(e: LmdbStoreError) -> Self {
        match e {
            LmdbStoreError::Transaction(reason) => StoreError::Transaction(reason),
            other => StoreError::Unavailable {
                reason: other.to_string(),
            },
        }
    }
}

/// LMDB-backed store.
///
/// # Example
///
/// ```ignore
/// use kvttl_storage::{BackingStoreExt, LmdbStore};
///
/// let store = LmdbStore::new("/tmp/kvttl", 16)?;
/// store.write_record(&key, &CacheRecord::new(250.0, Duration::from_millis(2500))).await?;
/// let record = store.read_record::<f64>(&key).await?;
/// ```
pub struct LmdbStore {
    /// The LMDB environment.
    env: Env,
    /// The main database (single unnamed database).
    db: Database<Bytes, Bytes>,
    /// Last versionstamp handed out by this instance.
    versionstamp: AtomicU64,
}

impl LmdbStore {
    /// Open (or create) an LMDB store.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the database in megabytes
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory cannot be created
    /// - LMDB environment cannot be opened
    /// - Database cannot be created
    pub fn new<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbStoreError> {
        let map_size = max_size_mb
            .checked_mul(1024 * 1024)
            .ok_or_else(|| {
                LmdbStoreError::EnvOpen(format!("map size of {} MB overflows usize", max_size_mb))
            })?;

        std::fs::create_dir_all(&path)?;

        // SAFETY: the environment is opened once per store instance and the
        // directory is not opened twice within this process.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(map_size)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbStoreError::EnvOpen(e.to_string()))?;

        let mut wtxn = env
            .write_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbStoreError::DbOpen(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        Ok(Self {
            env,
            db,
            versionstamp: AtomicU64::new(0),
        })
    }

    /// Number of records in the database.
    pub fn len(&self) -> Result<u64, LmdbStoreError> {
        let rtxn = self
            .env
            .read_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;
        self.db
            .len(&rtxn)
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))
    }

    pub fn is_empty(&self) -> Result<bool, LmdbStoreError> {
        Ok(self.len()? == 0)
    }
}

#[async_trait]
impl BackingStore for LmdbStore {
    async fn get(&self, key: &KvKey) -> StoreResult<Option<Vec<u8>>> {
        let encoded_key = encode_key(key);

        let rtxn = self
            .env
            .read_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        let value = self
            .db
            .get(&rtxn, &encoded_key)
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        Ok(value.map(<[u8]>::to_vec))
    }

    async fn set(&self, key: &KvKey, value: Vec<u8>) -> StoreResult<CommitAck> {
        let encoded_key = encode_key(key);

        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        self.db
            .put(&mut wtxn, &encoded_key, &value)
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        Ok(CommitAck {
            versionstamp: self.versionstamp.fetch_add(1, Ordering::SeqCst) + 1,
        })
    }

    async fn delete(&self, key: &KvKey) -> StoreResult<()> {
        let encoded_key = encode_key(key);

        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        self.db
            .delete(&mut wtxn, &encoded_key)
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        Ok(())
    }
}
