//! Error types for the demo host.

use kvttl_core::{ConfigError, StoreError};
use kvttl_storage::LmdbStoreError;
use thiserror::Error;

/// Everything that can stop the demo from starting.
#[derive(Debug, Error)]
pub enum DemoError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to open store: {0}")]
    Lmdb(#[from] LmdbStoreError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Failed to initialize telemetry: {0}")]
    Telemetry(String),
}

pub type DemoResult<T> = Result<T, DemoError>;
