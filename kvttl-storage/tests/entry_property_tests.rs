//! Behavioural Tests for the Cache Entry
//!
//! Drives a [`KvCache`] over a [`ScriptedStore`] with Tokio's paused clock,
//! so TTL boundaries and in-flight reads can be placed exactly.
//!
//! Covered:
//! - a fresh entry serves its fallback without touching the store
//! - a TTL set through `set` is honoured to the millisecond
//! - concurrent stale reads trigger exactly one store read
//! - a `set` landing during a refresh wins over the refresh
//! - failed reads and writes are reported once and change nothing visible

use std::sync::Arc;
use std::time::Duration;

use kvttl_storage::{KvCache, PartialRecord};
use kvttl_test_utils::assertions::{assert_fetch_error, assert_persist_error, assert_timed_out};
use kvttl_test_utils::fixtures::{reference_entry, reference_key, REFERENCE_TTL};
use kvttl_test_utils::generators::arb_partial_record;
use kvttl_test_utils::{BackingStore, CacheRecord, EntryOptions, Fallback, ScriptedStore};
use proptest::prelude::*;

// ============================================================================
// TEST CONFIGURATION
// ============================================================================

fn scripted() -> Arc<ScriptedStore> {
    Arc::new(ScriptedStore::new())
}

fn paused_runtime() -> Result<tokio::runtime::Runtime, TestCaseError> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .start_paused(true)
        .build()
        .map_err(|e| TestCaseError::fail(format!("Failed to create runtime: {}", e)))
}

/// Run `get` and fail the test if it has to wait for anything.
async fn get_now(cache: &KvCache<f64, ScriptedStore>) -> f64 {
    tokio::time::timeout(Duration::from_millis(1), cache.get())
        .await
        .expect("get should not block")
}

// ============================================================================
// FALLBACK FLOOR
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_fresh_entry_returns_fallback_without_store_call() {
    let store = scripted();
    let cache = reference_entry(&store);

    assert_eq!(get_now(&cache).await, 250.0);
    tokio::time::advance(REFERENCE_TTL - Duration::from_millis(1)).await;
    assert_eq!(get_now(&cache).await, 250.0);

    assert_eq!(store.reads(), 0);
}

// ============================================================================
// TTL HONOURED
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_set_ttl_is_honoured() {
    let store = scripted();
    let cache = reference_entry(&store);

    cache.set(PartialRecord::value(42.0).with_expire_in(Duration::from_millis(100)));
    tokio::time::advance(Duration::from_millis(99)).await;
    assert_eq!(get_now(&cache).await, 42.0);
    assert_eq!(store.reads(), 0);

    // at exactly the TTL the entry is stale and reads through
    tokio::time::advance(Duration::from_millis(1)).await;
    cache.get().await;
    assert_eq!(store.reads(), 1);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: before its TTL elapses a set value is served without reads.
    #[test]
    fn prop_value_served_until_ttl(
        value in any::<u32>(),
        ttl_ms in 1u64..5_000,
        fraction in 0.0f64..1.0,
    ) {
        let rt = paused_runtime()?;
        rt.block_on(async {
            let store = scripted();
            let cache = reference_entry(&store);
            let value = f64::from(value);

            cache.set(PartialRecord::value(value).with_expire_in(Duration::from_millis(ttl_ms)));
            let elapsed = ((ttl_ms as f64) * fraction) as u64;
            tokio::time::advance(Duration::from_millis(elapsed.min(ttl_ms - 1))).await;

            prop_assert_eq!(cache.get().await, value);
            prop_assert_eq!(store.reads(), 0);
            Ok(())
        })?;
    }

    /// Property: a sequence of sets resolves field by field, later wins.
    #[test]
    fn prop_sets_resolve_field_by_field(
        patches in proptest::collection::vec(arb_partial_record(), 1..8),
    ) {
        let rt = paused_runtime()?;
        rt.block_on(async {
            let store = scripted();
            let fallback = Fallback::new(7u32, REFERENCE_TTL);
            let cache = KvCache::new(Arc::clone(&store), reference_key(), fallback.clone());

            let mut expected = CacheRecord::from(fallback);
            for patch in patches {
                if let Some(value) = patch.value {
                    expected.value = value;
                }
                if let Some(expire_in) = patch.expire_in {
                    expected.expire_in = expire_in;
                }
                prop_assert_eq!(cache.set(patch), expected.clone());
            }
            prop_assert_eq!(cache.get().await, expected.value);
            Ok(())
        })?;
    }
}

// ============================================================================
// SINGLE FLIGHT
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_concurrent_stale_reads_issue_one_fetch() {
    let store = scripted();
    let cache = reference_entry(&store);
    store.hold_reads();
    tokio::time::advance(REFERENCE_TTL).await;

    let owner = {
        let cache = cache.clone();
        tokio::spawn(async move { cache.get().await })
    };
    store.reads_reached(1).await;
    let gate = cache.pending_refresh().expect("refresh should be in flight");

    for _ in 0..10 {
        assert_eq!(get_now(&cache).await, 250.0);
    }
    assert_eq!(store.reads(), 1);
    assert!(!gate.is_resolved());

    store.release_reads();
    assert_eq!(owner.await.unwrap(), 250.0);
    assert!(gate.is_resolved());
    assert!(cache.pending_refresh().is_none());

    let stats = cache.stats();
    assert_eq!(stats.refreshes_started, 1);
    assert_eq!(stats.stale_reads, 10);
    assert_eq!(stats.refreshes_applied, 1);
    assert_eq!(store.reads(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_stale_reads_issue_one_fetch() {
    let store = scripted();
    let fallback = Fallback::new(250.0, Duration::from_millis(1));
    let cache = KvCache::new(Arc::clone(&store), reference_key(), fallback);
    store.hold_reads();
    tokio::time::sleep(Duration::from_millis(5)).await;

    let readers: Vec<_> = (0..16)
        .map(|_| {
            let cache = cache.clone();
            tokio::spawn(async move { cache.get().await })
        })
        .collect();

    // every reader has either started the refresh or returned early
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let stats = cache.stats();
        if stats.refreshes_started + stats.stale_reads == 16 {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "readers never settled");
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    store.reads_reached(1).await;
    assert_eq!(cache.stats().refreshes_started, 1);

    store.release_reads();
    for reader in readers {
        assert_eq!(reader.await.unwrap(), 250.0);
    }
    assert_eq!(store.reads(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_waiters_observe_applied_refresh() {
    let store = scripted();
    let cache = reference_entry(&store);
    store
        .seed(&reference_key(), &CacheRecord::new(900.0, REFERENCE_TTL))
        .await;
    store.hold_reads();
    tokio::time::advance(REFERENCE_TTL).await;

    let owner = {
        let cache = cache.clone();
        tokio::spawn(async move { cache.get().await })
    };
    store.reads_reached(1).await;
    let gate = cache.pending_refresh().unwrap();

    let waiter = {
        let cache = cache.clone();
        tokio::spawn(async move {
            gate.wait().await;
            cache.get().await
        })
    };

    store.release_reads();
    assert_eq!(owner.await.unwrap(), 900.0);
    assert_eq!(waiter.await.unwrap(), 900.0);
}

// ============================================================================
// RACE DISCARD
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_set_during_refresh_wins() {
    let store = scripted();
    let cache = reference_entry(&store);
    store
        .seed(&reference_key(), &CacheRecord::new(1.0, REFERENCE_TTL))
        .await;
    store.hold_reads();
    tokio::time::advance(REFERENCE_TTL).await;

    let owner = {
        let cache = cache.clone();
        tokio::spawn(async move { cache.get().await })
    };
    store.reads_reached(1).await;
    let gate = cache.pending_refresh().unwrap();

    cache.set(PartialRecord::value(7.0));
    assert!(gate.is_resolved());
    assert!(cache.pending_refresh().is_none());

    // the held read still carries the stale 1.0
    store.release_reads();
    assert_eq!(owner.await.unwrap(), 7.0);
    assert_eq!(get_now(&cache).await, 7.0);

    let stats = cache.stats();
    assert_eq!(stats.refreshes_discarded, 1);
    assert_eq!(stats.refreshes_applied, 0);
}

#[tokio::test(start_paused = true)]
async fn test_refresh_after_discard_reads_persisted_set() {
    let store = scripted();
    let cache = reference_entry(&store);
    let mut info = cache.info_stream().unwrap();
    store.hold_reads();
    tokio::time::advance(REFERENCE_TTL).await;

    let owner = {
        let cache = cache.clone();
        tokio::spawn(async move { cache.get().await })
    };
    store.reads_reached(1).await;
    cache.set(PartialRecord::value(3.0).with_expire_in(Duration::from_millis(10)));
    store.release_reads();
    owner.await.unwrap();

    // wait for the background write to land
    loop {
        let message = info.recv().await.unwrap();
        if message.contains("set: set key") {
            break;
        }
    }
    store
        .seed(&reference_key(), &CacheRecord::new(4.0, Duration::from_millis(10)))
        .await;

    tokio::time::advance(Duration::from_millis(10)).await;
    assert_eq!(cache.get().await, 4.0);
    assert_eq!(store.reads(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_stale_refresh_yields_to_newer_refresh() {
    let store = scripted();
    let cache = reference_entry(&store);
    let mut info = cache.info_stream().unwrap();
    store
        .seed(&reference_key(), &CacheRecord::new(1.0, REFERENCE_TTL))
        .await;
    store.hold_reads();
    tokio::time::advance(REFERENCE_TTL).await;

    let first = {
        let cache = cache.clone();
        tokio::spawn(async move { cache.get().await })
    };
    store.reads_reached(1).await;
    let first_gate = cache.pending_refresh().unwrap();

    cache.set(PartialRecord::value(5.0).with_expire_in(Duration::from_millis(10)));
    loop {
        let message = info.recv().await.unwrap();
        if message.contains("set: set key") {
            break;
        }
    }

    // the set has expired and a second refresh now owns the entry
    tokio::time::advance(Duration::from_millis(10)).await;
    store
        .seed(&reference_key(), &CacheRecord::new(2.0, REFERENCE_TTL))
        .await;
    let second = {
        let cache = cache.clone();
        tokio::spawn(async move { cache.get().await })
    };
    store.reads_reached(2).await;
    let second_gate = cache.pending_refresh().unwrap();
    assert!(!first_gate.same_as(&second_gate));
    assert!(first_gate.is_resolved());
    assert!(!second_gate.is_resolved());

    store.release_reads();
    first.await.unwrap();
    assert_eq!(second.await.unwrap(), 2.0);
    assert_eq!(get_now(&cache).await, 2.0);

    let stats = cache.stats();
    assert_eq!(stats.refreshes_started, 2);
    assert_eq!(stats.refreshes_discarded, 1);
    assert_eq!(stats.refreshes_applied, 1);
}

// ============================================================================
// FETCH FAILURE
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_failed_fetch_without_prior_value_keeps_fallback() {
    let store = scripted();
    let cache = reference_entry(&store);
    let mut errors = cache.error_stream().unwrap();
    store.fail_reads(true);
    tokio::time::advance(REFERENCE_TTL).await;

    assert_eq!(cache.get().await, 250.0);
    assert_eq!(get_now(&cache).await, 250.0);

    let reported = errors.drain();
    assert_eq!(reported.len(), 1);
    assert_fetch_error(&reported[0], &reference_key());
    assert_eq!(store.reads(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_failed_fetch_keeps_prior_value() {
    let store = scripted();
    let cache = reference_entry(&store);
    let mut errors = cache.error_stream().unwrap();

    cache.set(PartialRecord::value(5.0));
    store.fail_reads(true);
    tokio::time::advance(REFERENCE_TTL).await;

    assert_eq!(cache.get().await, 5.0);
    assert_eq!(get_now(&cache).await, 5.0);

    let reported: Vec<_> = errors.drain().into_iter().filter(|e| e.is_fetch()).collect();
    assert_eq!(reported.len(), 1);
    assert_eq!(cache.stats().fetch_failures, 1);
}

#[tokio::test(start_paused = true)]
async fn test_fetch_timeout_is_reported() {
    let store = scripted();
    let cache = KvCache::with_options(
        Arc::clone(&store),
        reference_key(),
        Fallback::new(250.0, REFERENCE_TTL),
        EntryOptions::new().with_fetch_timeout(Duration::from_millis(50)),
    );
    let mut errors = cache.error_stream().unwrap();
    store.hold_reads();
    tokio::time::advance(REFERENCE_TTL).await;

    assert_eq!(cache.get().await, 250.0);
    store.release_reads();

    let error = errors.try_recv().expect("timeout should be reported");
    assert_fetch_error(&error, &reference_key());
    assert_timed_out(&error);
    assert!(cache.pending_refresh().is_none());
}

// ============================================================================
// PERSIST FAILURE
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_failed_persist_keeps_set_value() {
    let store = scripted();
    let cache = reference_entry(&store);
    let mut errors = cache.error_stream().unwrap();
    store.fail_writes(true);

    cache.set(PartialRecord::value(9.0));
    assert_eq!(get_now(&cache).await, 9.0);

    let error = errors.recv().await.unwrap();
    assert_persist_error(&error, &reference_key());
    tokio::task::yield_now().await;
    assert!(errors.try_recv().is_none());

    assert_eq!(get_now(&cache).await, 9.0);
    assert_eq!(store.writes(), 1);
    assert!(store.stored::<f64>(&reference_key()).await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_persist_timeout_is_reported() {
    let store = scripted();
    let cache = KvCache::with_options(
        Arc::clone(&store),
        reference_key(),
        Fallback::new(250.0, REFERENCE_TTL),
        EntryOptions::new().with_persist_timeout(Duration::from_millis(50)),
    );
    let mut errors = cache.error_stream().unwrap();
    store.hold_writes();

    cache.set(PartialRecord::value(3.0));
    let error = errors.recv().await.unwrap();
    assert_persist_error(&error, &reference_key());
    assert_timed_out(&error);
    assert_eq!(get_now(&cache).await, 3.0);
    store.release_writes();
}

// ============================================================================
// CANCELLATION
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_aborted_refresh_frees_the_gate() {
    let store = scripted();
    let cache = reference_entry(&store);
    store.hold_reads();
    tokio::time::advance(REFERENCE_TTL).await;

    let owner = {
        let cache = cache.clone();
        tokio::spawn(async move { cache.get().await })
    };
    store.reads_reached(1).await;
    let gate = cache.pending_refresh().unwrap();

    owner.abort();
    assert!(owner.await.unwrap_err().is_cancelled());
    assert!(gate.is_resolved());
    assert!(cache.pending_refresh().is_none());

    let retry = {
        let cache = cache.clone();
        tokio::spawn(async move { cache.get().await })
    };
    store.reads_reached(2).await;
    store.release_reads();
    assert_eq!(retry.await.unwrap(), 250.0);
    assert_eq!(cache.stats().refreshes_discarded, 1);
}

// ============================================================================
// REFERENCE SCENARIO
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_reference_scenario() {
    let store = scripted();
    store.delete(&reference_key()).await.unwrap();
    let cache = reference_entry(&store);
    let mut info = cache.info_stream().unwrap();

    // t=0
    assert_eq!(get_now(&cache).await, 250.0);
    assert_eq!(store.reads(), 0);

    // t=2600
    tokio::time::advance(Duration::from_millis(2600)).await;
    store.hold_reads();
    let first = {
        let cache = cache.clone();
        tokio::spawn(async move { cache.get().await })
    };
    store.reads_reached(1).await;
    assert_eq!(get_now(&cache).await, 250.0);
    assert_eq!(store.reads(), 1);

    store.release_reads();
    assert_eq!(first.await.unwrap(), 250.0);

    // the timestamp was reset, so the entry is fresh again
    assert_eq!(get_now(&cache).await, 250.0);
    assert_eq!(store.reads(), 1);

    let messages = info.drain();
    assert_eq!(messages.len(), 2);
    let (stamp, rest) = messages[0].split_once(' ').unwrap();
    assert!(stamp.parse::<i64>().is_ok());
    assert_eq!(rest, "get: fetching key [path0,path1]");
    assert!(messages[1].ends_with("get: fetched key [path0,path1], record null"));
}
