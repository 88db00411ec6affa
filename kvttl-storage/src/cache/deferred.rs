//! Deferred task wrapper with observable start and settle.

use std::future::Future;

/// Start `task`, reporting its lifecycle.
///
/// `on_start` runs synchronously, before this function returns, so a
/// "started" event is ordered before anything the caller does next.
/// `on_settle` runs exactly once with a reference to the outcome when the
/// returned future completes, before the outcome is handed back. If the
/// returned future is dropped early, `on_settle` never runs.
pub fn deferred<F, T, E, S, D>(task: F, on_start: S, on_settle: D) -> impl Future<Output = Result<T, E>>
where
    F: Future<Output = Result<T, E>>,
    S: FnOnce(),
    D: FnOnce(&Result<T, E>),
{
    on_start();
    async move {
        let outcome = task.await;
        on_settle(&outcome);
        outcome
    }
}
