//! Records exchanged between the cache entry and its backing store.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;

/// Marker trait for values that can live in a cache entry.
///
/// Values are cloned out of the entry on every read and serialized as JSON
/// for the backing store, so they must be cheap to clone and `'static`.
pub trait CacheValue: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> CacheValue for T where T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

/// Default value and TTL used whenever nothing better is known.
///
/// Supplied once at construction and never changed afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fallback<T> {
    pub value: T,
    #[serde(rename = "expireIn", with = "crate::duration_ms")]
    pub expire_in: Duration,
}

impl<T> Fallback<T> {
    pub fn new(value: T, expire_in: Duration) -> Self {
        Self { value, expire_in }
    }
}

/// A complete record, as written to the backing store by `set`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheRecord<T> {
    pub value: T,
    #[serde(rename = "expireIn", with = "crate::duration_ms")]
    pub expire_in: Duration,
}

impl<T> CacheRecord<T> {
    pub fn new(value: T, expire_in: Duration) -> Self {
        Self { value, expire_in }
    }
}

impl<T> From<Fallback<T>> for CacheRecord<T> {
    fn from(fallback: Fallback<T>) -> Self {
        Self {
            value: fallback.value,
            expire_in: fallback.expire_in,
        }
    }
}

/// A record with either field possibly missing.
///
/// This is both the argument to `set` and the shape a stored record is
/// decoded into, since records written by other parties may omit fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialRecord<T> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<T>,
    #[serde(
        rename = "expireIn",
        default,
        skip_serializing_if = "Option::is_none",
        with = "crate::duration_ms::option"
    )]
    pub expire_in: Option<Duration>,
}

impl<T> Default for PartialRecord<T> {
    fn default() -> Self {
        Self {
            value: None,
            expire_in: None,
        }
    }
}

impl<T> PartialRecord<T> {
    /// An empty record; resolving it keeps the current state.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A record carrying only a value.
    pub fn value(value: T) -> Self {
        Self {
            value: Some(value),
            expire_in: None,
        }
    }

    /// A record carrying only a TTL.
    pub fn expire_in(expire_in: Duration) -> Self {
        Self {
            value: None,
            expire_in: Some(expire_in),
        }
    }

    pub fn with_value(mut self, value: T) -> Self {
        self.value = Some(value);
        self
    }

    pub fn with_expire_in(mut self, expire_in: Duration) -> Self {
        self.expire_in = Some(expire_in);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_none() && self.expire_in.is_none()
    }
}

impl<T: Clone> PartialRecord<T> {
    /// Fill the missing fields, first from the current state and then from
    /// the fallback.
    ///
    /// The same rule applies to a `set` argument and to a freshly fetched
    /// record: a present field wins, then the current field, then the
    /// fallback.
    pub fn resolve(
        self,
        current_value: Option<&T>,
        current_expire_in: Option<Duration>,
        fallback: &Fallback<T>,
    ) -> CacheRecord<T> {
        let value = match self.value {
            Some(value) => value,
            None => current_value.unwrap_or(&fallback.value).clone(),
        };
        let expire_in = self
            .expire_in
            .or(current_expire_in)
            .unwrap_or(fallback.expire_in);
        CacheRecord { value, expire_in }
    }
}

impl<T> From<CacheRecord<T>> for PartialRecord<T> {
    fn from(record: CacheRecord<T>) -> Self {
        Self {
            value: Some(record.value),
            expire_in: Some(record.expire_in),
        }
    }
}

/// Acknowledgement returned by a successful store write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CommitAck {
    /// Monotonically increasing per store instance.
    pub versionstamp: u64,
}
