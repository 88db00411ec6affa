//! Tracing subscriber setup.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::error::{DemoError, DemoResult};

/// Filter used when `RUST_LOG` is not set.
pub const DEFAULT_FILTER: &str = "kvttl=debug,info";

/// Environment variable selecting the output format.
pub const LOG_FORMAT_ENV: &str = "KVTTL_LOG_FORMAT";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    /// Anything but `json` (case-insensitive) means plain text.
    pub fn from_env_value(value: Option<&str>) -> Self {
        match value {
            Some(v) if v.trim().eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Text,
        }
    }
}

/// Install the global tracing subscriber.
///
/// Must be called once, before anything logs.
pub fn init_tracing() -> DemoResult<()> {
    let format = LogFormat::from_env_value(std::env::var(LOG_FORMAT_ENV).ok().as_deref());
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let registry = tracing_subscriber::registry().with(env_filter);
    let installed = match format {
        LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
        LogFormat::Text => registry.with(fmt::layer()).try_init(),
    };
    installed.map_err(|e| DemoError::Telemetry(format!("Failed to init subscriber: {}", e)))?;

    tracing::info!(format = ?format, "Telemetry initialized");
    Ok(())
}
