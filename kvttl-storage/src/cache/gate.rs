//! One-shot gate marking an in-flight refresh.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::watch;

static NEXT_GATE_ID: AtomicU64 = AtomicU64::new(1);

/// A single-resolution synchronization handle.
///
/// Created unresolved, resolved at most once, and awaitable by any number of
/// parties who all observe the resolution. Clones share the same gate.
///
/// Equality is identity: two handles are equal only if they were cloned from
/// the same [`Gate::new`] call. The cache entry relies on this to tell its
/// own refresh apart from a newer one.
#[derive(Clone)]
pub struct Gate {
    inner: Arc<GateInner>,
}

struct GateInner {
    id: u64,
    resolved: watch::Sender<bool>,
}

impl Gate {
    /// Create a new unresolved gate.
    pub fn new() -> Self {
        let (resolved, _) = watch::channel(false);
        Self {
            inner: Arc::new(GateInner {
                id: NEXT_GATE_ID.fetch_add(1, Ordering::Relaxed),
                resolved,
            }),
        }
    }

    /// Process-unique id, for logs.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Resolve the gate, waking every waiter.
    ///
    /// Returns `true` if this call performed the resolution and `false` if
    /// the gate was already resolved.
    pub fn resolve(&self) -> bool {
        self.inner.resolved.send_if_modified(|resolved| {
            if *resolved {
                false
            } else {
                *resolved = true;
                true
            }
        })
    }

    pub fn is_resolved(&self) -> bool {
        *self.inner.resolved.borrow()
    }

    /// Wait until the gate is resolved. Returns immediately if it already is.
    pub async fn wait(&self) {
        let mut rx = self.inner.resolved.subscribe();
        // The sender lives in `self`, so the channel cannot close under us.
        let _ = rx.wait_for(|resolved| *resolved).await;
    }

    /// True if both handles refer to the same gate.
    pub fn same_as(&self, other: &Gate) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Default for Gate {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Gate {
    fn eq(&self, other: &Self) -> bool {
        self.same_as(other)
    }
}

impl Eq for Gate {}

impl fmt::Debug for Gate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gate")
            .field("id", &self.id())
            .field("resolved", &self.is_resolved())
            .finish()
    }
}
