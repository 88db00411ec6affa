//! kvttl Core - Data Types
//!
//! Pure data structures shared by the storage layer, the cache entry and the
//! host program. This crate contains no async code and no store access.

pub mod config;
pub mod error;
pub mod key;
pub mod record;

pub use config::{EntryConfig, EntryOptions};
pub use error::{
    ConfigError, ConfigResult, FetchError, KvCacheError, PersistError, StoreError, StoreResult,
};
pub use key::{KeyPart, KvKey};
pub use record::{CacheRecord, CacheValue, CommitAck, Fallback, PartialRecord};

use chrono::{DateTime, Utc};

/// Wall-clock timestamp attached to events and errors.
pub type Timestamp = DateTime<Utc>;

/// Current wall-clock time in milliseconds since the Unix epoch.
///
/// Used as the prefix of every human-readable lifecycle message.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Serde helpers for durations stored as integer milliseconds.
pub mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }

    /// Same encoding, for optional fields.
    pub mod option {
        use serde::{Deserialize, Deserializer, Serializer};
        use std::time::Duration;

        pub fn serialize<S: Serializer>(
            duration: &Option<Duration>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match duration {
                Some(d) => super::serialize(d, serializer),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Duration>, D::Error> {
            let millis = Option::<u64>::deserialize(deserializer)?;
            Ok(millis.map(Duration::from_millis))
        }
    }
}
