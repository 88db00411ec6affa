//! Configuration loading for the demo host.
//!
//! The file is optional: without `--config` or `KVTTL_DEMO_CONFIG` the
//! built-in defaults below are used. When a file is given, every field in it
//! is required unless marked optional.

use std::path::{Path, PathBuf};
use std::time::Duration;

use kvttl_core::{ConfigError, ConfigResult, EntryConfig, Fallback};
use serde::Deserialize;

/// Environment variable naming the config file.
pub const CONFIG_PATH_ENV: &str = "KVTTL_DEMO_CONFIG";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DemoConfig {
    pub entry: EntryConfig,
    /// Delay served while nothing better is known.
    pub fallback_value_ms: f64,
    pub writer_interval_ms: u64,
    pub writer_mode: WriterMode,
    /// Written delays are drawn from `[0, max_value_ms)`.
    pub max_value_ms: f64,
    /// LMDB store; in-memory when absent.
    #[serde(default)]
    pub store: Option<StoreConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    pub path: PathBuf,
    pub max_size_mb: usize,
}

/// How the writer changes the delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriterMode {
    /// Write straight to the store; readers see it once their TTL lapses.
    Store,
    /// Go through the entry's `set`; readers see it immediately.
    Cache,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            entry: EntryConfig {
                key: vec!["path0".to_string(), "path1".to_string()],
                fallback_expire_in_ms: 2500,
                fetch_timeout_ms: None,
                persist_timeout_ms: None,
            },
            fallback_value_ms: 250.0,
            writer_interval_ms: 1000,
            writer_mode: WriterMode::Store,
            max_value_ms: 1000.0,
            store: None,
        }
    }
}

impl DemoConfig {
    /// Load from `--config <path>` or `KVTTL_DEMO_CONFIG`, falling back to
    /// the defaults when neither is set.
    pub fn load() -> ConfigResult<Self> {
        let config = match config_path_from_args().or_else(config_path_from_env) {
            Some(path) => {
                tracing::info!(path = %path.display(), "Loading config");
                Self::from_path(&path)?
            }
            None => {
                tracing::info!("No config given, using defaults");
                Self::default()
            }
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> ConfigResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> ConfigResult<Self> {
        toml::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn validate(&self) -> ConfigResult<()> {
        self.entry.validate()?;

        if !self.fallback_value_ms.is_finite() || self.fallback_value_ms < 0.0 {
            return Err(invalid(
                "fallback_value_ms",
                self.fallback_value_ms,
                "must be a finite, non-negative number of milliseconds",
            ));
        }
        if self.writer_interval_ms == 0 {
            return Err(invalid("writer_interval_ms", 0, "must be > 0"));
        }
        if !self.max_value_ms.is_finite() || self.max_value_ms <= 0.0 {
            return Err(invalid(
                "max_value_ms",
                self.max_value_ms,
                "must be a finite number > 0",
            ));
        }
        if let Some(store) = &self.store {
            if store.path.as_os_str().is_empty() {
                return Err(invalid("store.path", "\"\"", "must not be empty"));
            }
            if store.max_size_mb == 0 {
                return Err(invalid("store.max_size_mb", 0, "must be > 0"));
            }
        }
        Ok(())
    }

    pub fn fallback(&self) -> Fallback<f64> {
        Fallback::new(self.fallback_value_ms, self.entry.fallback_expire_in())
    }

    pub fn writer_interval(&self) -> Duration {
        Duration::from_millis(self.writer_interval_ms)
    }
}

fn invalid(field: &str, value: impl ToString, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn config_path_from_env() -> Option<PathBuf> {
    std::env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from)
}

fn config_path_from_args() -> Option<PathBuf> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next().map(PathBuf::from);
        }
    }
    None
}
