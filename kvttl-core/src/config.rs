//! Configuration types

use crate::{ConfigError, ConfigResult, KvKey};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Per-entry tuning that does not change the entry's semantics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntryOptions {
    /// Upper bound on a refresh read. `None` waits for the store forever.
    pub fetch_timeout: Option<Duration>,
    /// Upper bound on a persistence write. `None` waits for the store forever.
    pub persist_timeout: Option<Duration>,
}

impl EntryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the refresh read timeout.
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = Some(timeout);
        self
    }

    /// Set the persistence write timeout.
    pub fn with_persist_timeout(mut self, timeout: Duration) -> Self {
        self.persist_timeout = Some(timeout);
        self
    }
}

/// Serializable description of a cache entry.
///
/// The fallback value is not part of this struct because its type belongs
/// to the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EntryConfig {
    pub key: Vec<String>,
    pub fallback_expire_in_ms: u64,
    #[serde(default)]
    pub fetch_timeout_ms: Option<u64>,
    #[serde(default)]
    pub persist_timeout_ms: Option<u64>,
}

impl EntryConfig {
    /// Validate the configuration.
    ///
    /// Validates:
    /// - key has at least one part and no part is blank
    /// - timeouts, when given, are positive
    pub fn validate(&self) -> ConfigResult<()> {
        if self.key.is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "key".to_string(),
            });
        }
        if let Some(idx) = self.key.iter().position(|part| part.trim().is_empty()) {
            return Err(ConfigError::InvalidValue {
                field: format!("key[{}]", idx),
                value: format!("{:?}", self.key[idx]),
                reason: "key parts must not be blank".to_string(),
            });
        }
        for (field, value) in [
            ("fetch_timeout_ms", self.fetch_timeout_ms),
            ("persist_timeout_ms", self.persist_timeout_ms),
        ] {
            if value == Some(0) {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    value: "0".to_string(),
                    reason: "must be > 0 (omit the field to disable the timeout)".to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn kv_key(&self) -> KvKey {
        KvKey::new(self.key.iter().map(String::as_str))
    }

    pub fn fallback_expire_in(&self) -> Duration {
        Duration::from_millis(self.fallback_expire_in_ms)
    }

    pub fn options(&self) -> EntryOptions {
        EntryOptions {
            fetch_timeout: self.fetch_timeout_ms.map(Duration::from_millis),
            persist_timeout: self.persist_timeout_ms.map(Duration::from_millis),
        }
    }
}
