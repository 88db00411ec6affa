//! Unbounded event queues for lifecycle messages and errors.

use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};

use kvttl_core::KvCacheError;
use tokio::sync::mpsc;
use tokio_stream::Stream;

/// Append-only, unbounded queue with a single lazily-taken consumer.
///
/// `push` never blocks. Events keep their push order. Events pushed after
/// the consumer has been dropped are discarded.
#[derive(Debug)]
pub struct EventQueue<E> {
    tx: mpsc::UnboundedSender<E>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<E>>>,
}

impl<E> EventQueue<E> {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
        }
    }

    /// Append an event.
    pub fn push(&self, event: E) {
        // Err only when the consumer is gone, and then nobody is listening.
        let _ = self.tx.send(event);
    }

    /// Take the consumer end. Returns `None` once it has been taken.
    pub fn take_stream(&self) -> Option<EventStream<E>> {
        self.rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .map(|rx| EventStream { rx })
    }
}

impl<E> Default for EventQueue<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Consumer end of an [`EventQueue`].
///
/// Suspends while the queue is empty. Ends only when every producer is gone.
#[derive(Debug)]
pub struct EventStream<E> {
    rx: mpsc::UnboundedReceiver<E>,
}

impl<E> EventStream<E> {
    /// Receive the next event, waiting if none is queued.
    pub async fn recv(&mut self) -> Option<E> {
        self.rx.recv().await
    }

    /// Receive the next event if one is already queued.
    pub fn try_recv(&mut self) -> Option<E> {
        self.rx.try_recv().ok()
    }

    /// Drain every event that is already queued.
    pub fn drain(&mut self) -> Vec<E> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}

impl<E> Stream for EventStream<E> {
    type Item = E;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<E>> {
        self.rx.poll_recv(cx)
    }
}

/// The two event streams of one cache entry.
///
/// Cheap to clone; clones feed the same queues.
#[derive(Debug, Clone, Default)]
pub struct CacheEvents {
    inner: Arc<EventsInner>,
}

#[derive(Debug, Default)]
struct EventsInner {
    info: EventQueue<String>,
    errors: EventQueue<KvCacheError>,
}

impl CacheEvents {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a human-readable lifecycle message.
    pub fn info(&self, message: String) {
        self.inner.info.push(message);
    }

    /// Push a failure.
    pub fn error(&self, error: impl Into<KvCacheError>) {
        self.inner.errors.push(error.into());
    }

    pub fn take_info_stream(&self) -> Option<EventStream<String>> {
        self.inner.info.take_stream()
    }

    pub fn take_error_stream(&self) -> Option<EventStream<KvCacheError>> {
        self.inner.errors.take_stream()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use kvttl_core::{FetchError, KvKey, StoreError};
    use tokio_stream::StreamExt;

    #[tokio::test]
    async fn test_push_order_is_preserved() {
        let queue = EventQueue::new();
        for i in 0..5 {
            queue.push(i);
        }
        let mut stream = queue.take_stream().expect("first take");
        let got: Vec<i32> = (&mut stream).take(5).collect().await;
        assert_eq!(got, vec![0, 1, 2, 3, 4]);
        assert_eq!(stream.try_recv(), None);
    }

    #[tokio::test]
    async fn test_consumer_taken_once() {
        let queue: EventQueue<u8> = EventQueue::new();
        assert!(queue.take_stream().is_some());
        assert!(queue.take_stream().is_none());
    }

    #[tokio::test]
    async fn test_push_after_consumer_dropped_is_silent() {
        let queue = EventQueue::new();
        drop(queue.take_stream());
        queue.push("ignored");
    }

    #[tokio::test]
    async fn test_consumer_waits_for_late_push() {
        let queue = Arc::new(EventQueue::new());
        let mut stream = queue.take_stream().unwrap();

        let producer = Arc::clone(&queue);
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            producer.push("late".to_string());
        });

        assert_eq!(stream.recv().await.as_deref(), Some("late"));
    }

    #[tokio::test]
    async fn test_cache_events_route_by_kind() {
        let events = CacheEvents::new();
        let mut info = events.take_info_stream().unwrap();
        let mut errors = events.take_error_stream().unwrap();

        let clone = events.clone();
        clone.info("hello".to_string());
        clone.error(FetchError {
            at: Utc::now(),
            key: KvKey::new(["k"]),
            source: StoreError::LockPoisoned,
        });

        assert_eq!(info.drain(), vec!["hello".to_string()]);
        let drained = errors.drain();
        assert_eq!(drained.len(), 1);
        assert!(drained[0].is_fetch());
    }
}
