//! The per-turn event bus: a bounded single-producer/single-consumer channel
//! of [`Event`]s with an idempotent, cleanup-aware consumer handle.
//!
//! The producing turn holds an [`EventBus`]; the caller holds the
//! [`EventStream`]. Sends block once the buffer (default 100) is full, which
//! is the backpressure the turn is expected to honor. The stream ends when
//! the producer is dropped and all buffered events are drained.

use tokio::sync::mpsc;
use volley_contract::Event;

/// Default buffer capacity for a turn's event queue.
pub const DEFAULT_EVENT_BUFFER: usize = 100;

/// Producer half, owned by the running turn.
pub struct EventBus {
    tx: mpsc::Sender<Event>,
}

impl EventBus {
    /// Create a connected bus/stream pair.
    pub fn channel(buffer: usize) -> (EventBus, EventStream) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (
            EventBus { tx },
            EventStream {
                rx,
                cleanup: None,
            },
        )
    }

    /// Send one event. Blocks while the buffer is full; returns `false` when
    /// the consumer has closed the stream (the event is dropped).
    pub async fn send(&self, event: Event) -> bool {
        self.tx.send(event).await.is_ok()
    }
}

/// Consumer half, returned to the caller of `Send`/`Resume`.
pub struct EventStream {
    rx: mpsc::Receiver<Event>,
    cleanup: Option<Box<dyn FnOnce() + Send>>,
}

impl std::fmt::Debug for EventStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStream").finish_non_exhaustive()
    }
}

impl EventStream {
    /// Attach a cleanup hook that runs exactly once, on `close` or drop.
    #[must_use]
    pub fn with_cleanup(mut self, f: impl FnOnce() + Send + 'static) -> Self {
        self.cleanup = Some(Box::new(f));
        self
    }

    /// Next event, or `None` once the turn has finished and the buffer is
    /// drained. Cancel-safe: callers may race this against their own
    /// deadline or cancellation future.
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// Stop accepting new events and run the cleanup hook. Idempotent;
    /// already-buffered events can still be received.
    pub fn close(&mut self) {
        self.rx.close();
        if let Some(f) = self.cleanup.take() {
            f();
        }
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        if let Some(f) = self.cleanup.take() {
            f();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use volley_contract::{DeltaSource, EventBody, PROTOCOL_VERSION};

    fn event(seq: u64) -> Event {
        Event {
            version: PROTOCOL_VERSION,
            session_id: "s1".into(),
            turn_id: "t1".into(),
            seq,
            ts: Utc::now(),
            body: EventBody::delta(format!("chunk-{seq}"), DeltaSource::Text),
            display: None,
        }
    }

    #[tokio::test]
    async fn events_arrive_in_send_order() {
        let (bus, mut stream) = EventBus::channel(8);
        for seq in 1..=3 {
            assert!(bus.send(event(seq)).await);
        }
        drop(bus);

        let mut seen = Vec::new();
        while let Some(e) = stream.recv().await {
            seen.push(e.seq);
        }
        assert_eq!(seen, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn recv_drains_buffer_after_producer_drops() {
        let (bus, mut stream) = EventBus::channel(8);
        assert!(bus.send(event(1)).await);
        drop(bus);

        assert_eq!(stream.recv().await.map(|e| e.seq), Some(1));
        assert!(stream.recv().await.is_none());
    }

    #[tokio::test]
    async fn send_blocks_on_full_buffer_until_consumed() {
        let (bus, mut stream) = EventBus::channel(1);
        assert!(bus.send(event(1)).await);

        let producer = tokio::spawn(async move { bus.send(event(2)).await });
        // The second send cannot finish until we pull the first event.
        tokio::task::yield_now().await;
        assert!(!producer.is_finished());

        assert_eq!(stream.recv().await.map(|e| e.seq), Some(1));
        assert!(producer.await.unwrap());
        assert_eq!(stream.recv().await.map(|e| e.seq), Some(2));
    }

    #[tokio::test]
    async fn send_after_close_reports_gone_consumer() {
        let (bus, mut stream) = EventBus::channel(4);
        stream.close();
        assert!(!bus.send(event(1)).await);
    }

    #[tokio::test]
    async fn cleanup_runs_once_across_close_and_drop() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let (_bus, stream) = EventBus::channel(4);
        let mut stream = stream.with_cleanup(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        stream.close();
        stream.close();
        drop(stream);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
