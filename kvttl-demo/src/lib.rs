//! kvttl Demo - Host Wiring for a Delay Entry
//!
//! A reader loop sleeps for whatever delay the cache entry currently holds
//! while a writer keeps changing that delay, either behind the entry's back
//! (directly in the store) or through it.

pub mod config;
pub mod driver;
pub mod error;
pub mod telemetry;

pub use config::{DemoConfig, StoreConfig, WriterMode};
pub use driver::{open_store, spawn_event_consumers, Reader, Writer};
pub use error::{DemoError, DemoResult};
pub use telemetry::{init_tracing, LogFormat};
