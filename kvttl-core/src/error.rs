//! Error types for kvttl operations

use crate::{KvKey, Timestamp};
use std::time::Duration;
use thiserror::Error;

/// Backing store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Store unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Transaction failed: {0}")]
    Transaction(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Store call timed out after {after:?}")]
    Timeout { after: Duration },

    #[error("Store lock poisoned")]
    LockPoisoned,
}

/// Result type alias for backing store calls.
pub type StoreResult<T> = Result<T, StoreError>;

/// A refresh read failed or returned malformed data.
///
/// Never returned to the caller of `get`; only reported on the error stream.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{} failed to retrieve key {key}", .at.timestamp_millis())]
pub struct FetchError {
    pub at: Timestamp,
    pub key: KvKey,
    #[source]
    pub source: StoreError,
}

/// A write issued by `set` failed.
///
/// The in-memory state committed by `set` is unaffected.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{} failed setting key {key} to record {record}", .at.timestamp_millis())]
pub struct PersistError {
    pub at: Timestamp,
    pub key: KvKey,
    /// JSON rendering of the record that could not be written.
    pub record: String,
    #[source]
    pub source: StoreError,
}

/// Item type of a cache entry's error stream.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KvCacheError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Persist(#[from] PersistError),
}

impl KvCacheError {
    /// Key of the entry that reported this error.
    pub fn key(&self) -> &KvKey {
        match self {
            Self::Fetch(e) => &e.key,
            Self::Persist(e) => &e.key,
        }
    }

    /// The store failure underneath.
    pub fn store_error(&self) -> &StoreError {
        match self {
            Self::Fetch(e) => &e.source,
            Self::Persist(e) => &e.source,
        }
    }

    pub fn is_fetch(&self) -> bool {
        matches!(self, Self::Fetch(_))
    }

    pub fn is_persist(&self) -> bool {
        matches!(self, Self::Persist(_))
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(String),
}

/// Result type alias for kvttl configuration and setup.
pub type ConfigResult<T> = Result<T, ConfigError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::error::Error as _;

    fn at() -> Timestamp {
        Utc.timestamp_millis_opt(1_700_000_000_123).unwrap()
    }

    #[test]
    fn test_fetch_error_display_and_source() {
        let err = FetchError {
            at: at(),
            key: KvKey::new(["path0", "path1"]),
            source: StoreError::Unavailable {
                reason: "connection reset".to_string(),
            },
        };
        assert_eq!(
            err.to_string(),
            "1700000000123 failed to retrieve key [path0,path1]"
        );
        let source = err.source().expect("cause should be chained");
        assert!(source.to_string().contains("connection reset"));
    }

    #[test]
    fn test_persist_error_display_includes_record() {
        let err = PersistError {
            at: at(),
            key: KvKey::new(["k"]),
            record: r#"{"value":1,"expireIn":10}"#.to_string(),
            source: StoreError::Transaction("disk full".to_string()),
        };
        let msg = err.to_string();
        assert!(msg.contains("failed setting key [k]"));
        assert!(msg.contains(r#"{"value":1,"expireIn":10}"#));
    }

    #[test]
    fn test_kv_cache_error_keeps_chain() {
        let err: KvCacheError = FetchError {
            at: at(),
            key: KvKey::new(["k"]),
            source: StoreError::Timeout {
                after: Duration::from_millis(50),
            },
        }
        .into();

        assert!(err.is_fetch());
        assert!(!err.is_persist());
        assert_eq!(err.key(), &KvKey::new(["k"]));
        assert!(matches!(err.store_error(), StoreError::Timeout { .. }));

        // transparent: the outer error's source is the store error
        let source = err.source().expect("source");
        assert!(source.to_string().contains("timed out"));
    }

    #[test]
    fn test_config_error_display_invalid_value() {
        let err = ConfigError::InvalidValue {
            field: "fetch_timeout_ms".to_string(),
            value: "0".to_string(),
            reason: "must be > 0".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("fetch_timeout_ms"));
        assert!(msg.contains("must be > 0"));
    }
}
