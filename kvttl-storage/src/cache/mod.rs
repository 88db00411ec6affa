//! The cache entry and the primitives it is built from.

mod deferred;
mod entry;
mod events;
mod freshness;
mod gate;
mod stats;

pub use deferred::deferred;
pub use entry::KvCache;
pub use events::{CacheEvents, EventQueue, EventStream};
pub use freshness::{effective_ttl, Freshness};
pub use gate::Gate;
pub use stats::EntryStats;
