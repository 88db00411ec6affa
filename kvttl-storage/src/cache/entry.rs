//! The cache entry: one key of a backing store fronted by a TTL.
//!
//! Reads never wait on the store unless they are the one read that noticed
//! staleness first; writes commit in memory immediately and persist in the
//! background. A write always beats a refresh that was already in flight.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use kvttl_core::{
    now_millis, CacheRecord, CacheValue, CommitAck, EntryOptions, Fallback, FetchError, KvCacheError,
    KvKey, PartialRecord, PersistError, StoreError, StoreResult,
};
use serde::Serialize;
use tokio::time::Instant;
use tracing::Instrument;

use super::deferred::deferred;
use super::events::{CacheEvents, EventStream};
use super::freshness::{effective_ttl, Freshness};
use super::gate::Gate;
use super::stats::{EntryCounters, EntryStats};
use crate::store::{BackingStore, BackingStoreExt};

/// Read-through, write-through TTL cache for a single key.
///
/// Cloning a `KvCache` yields another handle to the same entry: state,
/// events and store are shared.
///
/// # Example
///
/// ```ignore
/// let store = Arc::new(InMemoryStore::new());
/// let delay = KvCache::new(
///     store,
///     KvKey::new(["path0", "path1"]),
///     Fallback::new(250.0, Duration::from_millis(2500)),
/// );
///
/// // Fresh or not, this returns right away unless it starts the refresh.
/// let ms = delay.get().await;
///
/// // Visible to the next `get` immediately; persisted in the background.
/// delay.set(PartialRecord::value(500.0));
/// ```
pub struct KvCache<T, S: ?Sized> {
    store: Arc<S>,
    shared: Arc<Shared<T>>,
}

/// Everything clones of an entry have in common besides the store.
struct Shared<T> {
    key: KvKey,
    fallback: Fallback<T>,
    options: EntryOptions,
    state: Mutex<EntryState<T>>,
    events: CacheEvents,
    counters: EntryCounters,
}

/// Mutable part of an entry. Only touched under the mutex, and the mutex is
/// never held across an await.
struct EntryState<T> {
    /// Last known good value. `None` until the first refresh or `set`.
    value: Option<T>,
    /// When `value`/`expire_in` were established.
    timestamp: Instant,
    /// TTL override. `None` means the fallback TTL applies.
    expire_in: Option<Duration>,
    /// Present exactly while a refresh read is in flight.
    gate: Option<Gate>,
}

impl<T> Shared<T> {
    fn lock_state(&self) -> MutexGuard<'_, EntryState<T>> {
        // Every critical section is a handful of field assignments, so the
        // state is consistent even if a holder panicked.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: Clone> Shared<T> {
    fn current(&self, state: &EntryState<T>) -> T {
        state
            .value
            .as_ref()
            .unwrap_or(&self.fallback.value)
            .clone()
    }
}

impl<T, S> KvCache<T, S>
where
    T: CacheValue,
    S: BackingStore + ?Sized + 'static,
{
    /// Create an entry for `key` with no timeouts on store calls.
    pub fn new(store: Arc<S>, key: KvKey, fallback: Fallback<T>) -> Self {
        Self::with_options(store, key, fallback, EntryOptions::default())
    }

    /// Create an entry for `key` with explicit options.
    pub fn with_options(
        store: Arc<S>,
        key: KvKey,
        fallback: Fallback<T>,
        options: EntryOptions,
    ) -> Self {
        Self {
            store,
            shared: Arc::new(Shared {
                key,
                fallback,
                options,
                state: Mutex::new(EntryState {
                    value: None,
                    timestamp: Instant::now(),
                    expire_in: None,
                    gate: None,
                }),
                events: CacheEvents::new(),
                counters: EntryCounters::default(),
            }),
        }
    }

    /// Key of the record this entry mirrors.
    pub fn key(&self) -> &KvKey {
        &self.shared.key
    }

    pub fn fallback(&self) -> &Fallback<T> {
        &self.shared.fallback
    }

    pub fn options(&self) -> &EntryOptions {
        &self.shared.options
    }

    pub fn stats(&self) -> EntryStats {
        self.shared.counters.snapshot()
    }

    /// The gate of the refresh currently in flight, if any.
    ///
    /// Awaiting [`Gate::wait`] on it completes when that refresh is applied,
    /// discarded, or superseded by a `set`.
    pub fn pending_refresh(&self) -> Option<Gate> {
        self.shared.lock_state().gate.clone()
    }

    /// Take the stream of human-readable lifecycle messages.
    ///
    /// Returns `None` if it was already taken through any clone.
    pub fn info_stream(&self) -> Option<EventStream<String>> {
        self.shared.events.take_info_stream()
    }

    /// Take the stream of fetch and persist failures.
    ///
    /// Returns `None` if it was already taken through any clone.
    pub fn error_stream(&self) -> Option<EventStream<KvCacheError>> {
        self.shared.events.take_error_stream()
    }

    /// Return the best value known right now.
    ///
    /// Only the call that finds the entry stale while no refresh is running
    /// waits, and it waits only for its own read. Every other call returns
    /// immediately. Store failures are reported on the error stream, never
    /// here.
    pub async fn get(&self) -> T {
        let shared = &self.shared;

        let gate = {
            let mut state = shared.lock_state();
            let ttl = effective_ttl(state.expire_in, shared.fallback.expire_in);
            let elapsed = state.timestamp.elapsed();
            let elapsed_ms = elapsed.as_millis() as u64;
            let ttl_ms = ttl.as_millis() as u64;

            match Freshness::evaluate(elapsed, ttl) {
                Freshness::Fresh { .. } => {
                    EntryCounters::bump(&shared.counters.fresh_reads);
                    tracing::debug!(key = %shared.key, elapsed_ms, ttl_ms, "Fresh read");
                    return shared.current(&state);
                }
                Freshness::Stale { .. } if state.gate.is_some() => {
                    EntryCounters::bump(&shared.counters.stale_reads);
                    tracing::debug!(
                        key = %shared.key,
                        elapsed_ms,
                        ttl_ms,
                        "Stale read while refresh in flight"
                    );
                    return shared.current(&state);
                }
                Freshness::Stale { overdue } => {
                    let gate = Gate::new();
                    state.gate = Some(gate.clone());
                    tracing::debug!(
                        key = %shared.key,
                        gate = gate.id(),
                        elapsed_ms,
                        ttl_ms,
                        overdue_ms = overdue.as_millis() as u64,
                        "Starting refresh"
                    );
                    gate
                }
            }
        };

        EntryCounters::bump(&shared.counters.refreshes_started);
        let mut guard = RefreshGuard {
            shared,
            gate,
            armed: true,
        };
        let fetched = self.fetch().await;
        let gate = guard.disarm();

        let mut state = shared.lock_state();
        let still_owned = state.gate.as_ref().is_some_and(|g| g.same_as(&gate));
        if !still_owned {
            EntryCounters::bump(&shared.counters.refreshes_discarded);
            tracing::debug!(
                key = %shared.key,
                gate = gate.id(),
                "Discarding refresh superseded by set"
            );
            return shared.current(&state);
        }

        let record = fetched.unwrap_or_else(PartialRecord::empty).resolve(
            state.value.as_ref(),
            state.expire_in,
            &shared.fallback,
        );
        state.value = Some(record.value.clone());
        state.expire_in = Some(record.expire_in);
        state.timestamp = Instant::now();
        state.gate = None;
        gate.resolve();

        EntryCounters::bump(&shared.counters.refreshes_applied);
        tracing::debug!(
            key = %shared.key,
            gate = gate.id(),
            expire_in_ms = record.expire_in.as_millis() as u64,
            "Refresh applied"
        );
        record.value
    }

    /// Commit `patch` in memory and persist it in the background.
    ///
    /// Missing fields keep their current value, or the fallback if there is
    /// none. The committed record is returned. Any refresh in flight is
    /// cancelled: its result will be discarded when it lands. Persistence
    /// failures are reported on the error stream and never roll back the
    /// in-memory commit.
    ///
    /// The write runs on the current Tokio runtime. Outside a runtime the
    /// commit still happens and the write is reported as failed.
    pub fn set(&self, patch: PartialRecord<T>) -> CacheRecord<T> {
        let shared = &self.shared;

        let record = {
            let mut state = shared.lock_state();
            let record = patch.resolve(state.value.as_ref(), state.expire_in, &shared.fallback);
            state.value = Some(record.value.clone());
            state.expire_in = Some(record.expire_in);
            state.timestamp = Instant::now();
            if let Some(gate) = state.gate.take() {
                gate.resolve();
                tracing::debug!(key = %shared.key, gate = gate.id(), "Set cleared in-flight refresh");
            }
            record
        };

        self.persist(record.clone());
        record
    }

    /// Read the current record through the deferred wrapper, reporting
    /// start, success and failure. A failure counts as "no new data".
    async fn fetch(&self) -> Option<PartialRecord<T>> {
        let shared = &self.shared;
        let key = &shared.key;

        let read = with_timeout(self.store.read_record::<T>(key), shared.options.fetch_timeout);
        let outcome = deferred(
            read,
            || shared.events.info(format!("{} get: fetching key {}", now_millis(), key)),
            |outcome| match outcome {
                Ok(record) => shared.events.info(format!(
                    "{} get: fetched key {}, record {}",
                    now_millis(),
                    key,
                    render(record)
                )),
                Err(source) => {
                    EntryCounters::bump(&shared.counters.fetch_failures);
                    tracing::warn!(key = %key, error = %source, "Refresh read failed");
                    shared.events.error(FetchError {
                        at: Utc::now(),
                        key: key.clone(),
                        source: source.clone(),
                    });
                }
            },
        )
        .await;

        outcome.ok().flatten()
    }

    /// Fire-and-forget write of `record`.
    fn persist(&self, record: CacheRecord<T>) {
        let shared = &self.shared;
        let rendered = render(&record);
        EntryCounters::bump(&shared.counters.writes_started);

        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                report_persist_failure(
                    shared,
                    rendered,
                    StoreError::Unavailable {
                        reason: format!("no async runtime to run the write: {}", e),
                    },
                );
                return;
            }
        };

        let write = {
            let store = Arc::clone(&self.store);
            let shared = Arc::clone(shared);
            async move {
                let timeout = shared.options.persist_timeout;
                with_timeout(store.write_record(&shared.key, &record), timeout).await
            }
        };
        let started = format!(
            "{} set: setting key {} to record {}",
            now_millis(),
            shared.key,
            rendered
        );
        let events = shared.events.clone();
        let settled = Arc::clone(shared);
        let task = deferred(
            write,
            move || events.info(started),
            move |outcome: &StoreResult<CommitAck>| match outcome {
                Ok(ack) => settled.events.info(format!(
                    "{} set: set key {} to record {} (versionstamp {})",
                    now_millis(),
                    settled.key,
                    rendered,
                    ack.versionstamp
                )),
                Err(source) => report_persist_failure(&settled, rendered, source.clone()),
            },
        );

        let span = tracing::debug_span!("kvttl.persist", key = %shared.key);
        handle.spawn(
            async move {
                // The outcome has already been reported by the settle hook.
                let _ = task.await;
            }
            .instrument(span),
        );
    }
}

impl<T, S: ?Sized> Clone for KvCache<T, S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T, S: ?Sized> fmt::Debug for KvCache<T, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KvCache")
            .field("key", &self.shared.key)
            .field("options", &self.shared.options)
            .finish_non_exhaustive()
    }
}

/// Clears the entry's gate if the owning `get` is dropped mid-fetch, so the
/// next stale read can start a new refresh.
struct RefreshGuard<'a, T> {
    shared: &'a Shared<T>,
    gate: Gate,
    armed: bool,
}

impl<T> RefreshGuard<'_, T> {
    fn disarm(&mut self) -> Gate {
        self.armed = false;
        self.gate.clone()
    }
}

impl<T> Drop for RefreshGuard<'_, T> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut state = self.shared.lock_state();
        if state.gate.as_ref().is_some_and(|g| g.same_as(&self.gate)) {
            state.gate = None;
            self.gate.resolve();
            EntryCounters::bump(&self.shared.counters.refreshes_discarded);
            tracing::debug!(
                key = %self.shared.key,
                gate = self.gate.id(),
                "Refresh abandoned by its caller"
            );
        }
    }
}

fn report_persist_failure<T>(shared: &Shared<T>, record: String, source: StoreError) {
    EntryCounters::bump(&shared.counters.persist_failures);
    tracing::warn!(key = %shared.key, error = %source, "Persist write failed");
    shared.events.error(PersistError {
        at: Utc::now(),
        key: shared.key.clone(),
        record,
        source,
    });
}

async fn with_timeout<F, X>(call: F, limit: Option<Duration>) -> StoreResult<X>
where
    F: Future<Output = StoreResult<X>>,
{
    match limit {
        Some(after) => tokio::time::timeout(after, call)
            .await
            .unwrap_or_else(|_| Err(StoreError::Timeout { after })),
        None => call.await,
    }
}

fn render<R: Serialize + ?Sized>(record: &R) -> String {
    serde_json::to_string(record).unwrap_or_else(|e| format!("<unrenderable: {}>", e))
}
