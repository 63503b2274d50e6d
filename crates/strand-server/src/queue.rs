//! Bounded live-delivery queue between a thread's emitter and its SSE body.
//!
//! Pushing never blocks the producer. When the queue is full the oldest event
//! of the lowest [`EventClass`] present is shed, so keepalives and activity go
//! before node lifecycle. Authority events (`state_update`, `state_snapshot`,
//! `graph_start`, `graph_end`, `error`) are never shed: one that finds nothing
//! cheaper to evict is admitted past the bound. There are at most a handful
//! per node.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures::Stream;
use tokio::sync::Notify;

use strand_core::event::{EventClass, StreamEvent};

/// An event stamped with its per-thread sequence number.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedEvent {
    pub seq: u64,
    pub event: StreamEvent,
}

/// What happened to a pushed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// Queued after evicting an older event of the given class.
    Evicted(EventClass),
    /// The incoming event itself was the cheapest and was dropped.
    Rejected,
    /// The queue is closed or its receiver is gone.
    Disconnected,
}

#[derive(Debug)]
struct Buffer {
    items: VecDeque<QueuedEvent>,
    closed: bool,
    receiver_alive: bool,
}

#[derive(Debug)]
struct Shared {
    buffer: Mutex<Buffer>,
    notify: Notify,
    capacity: usize,
    dropped: AtomicU64,
}

impl Shared {
    fn lock(&self) -> std::sync::MutexGuard<'_, Buffer> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Create a queue holding up to `capacity` events (minimum 1).
pub fn bounded(capacity: usize) -> (QueueSender, QueueReceiver) {
    let shared = Arc::new(Shared {
        buffer: Mutex::new(Buffer {
            items: VecDeque::new(),
            closed: false,
            receiver_alive: true,
        }),
        notify: Notify::new(),
        capacity: capacity.max(1),
        dropped: AtomicU64::new(0),
    });
    (
        QueueSender {
            shared: Arc::clone(&shared),
        },
        QueueReceiver { shared },
    )
}

#[derive(Debug, Clone)]
pub struct QueueSender {
    shared: Arc<Shared>,
}

impl QueueSender {
    pub fn push(&self, item: QueuedEvent) -> PushOutcome {
        let outcome = {
            let mut buf = self.shared.lock();
            if buf.closed || !buf.receiver_alive {
                return PushOutcome::Disconnected;
            }

            if buf.items.len() < self.shared.capacity {
                buf.items.push_back(item);
                PushOutcome::Queued
            } else {
                let incoming = item.event.kind.class();
                let lowest = buf.items.iter().map(|q| q.event.kind.class()).min();
                match lowest {
                    Some(lowest)
                        if lowest < incoming
                            || (lowest == incoming && incoming != EventClass::Authority) =>
                    {
                        if let Some(pos) =
                            buf.items.iter().position(|q| q.event.kind.class() == lowest)
                        {
                            buf.items.remove(pos);
                        }
                        buf.items.push_back(item);
                        PushOutcome::Evicted(lowest)
                    }
                    _ if incoming == EventClass::Authority => {
                        buf.items.push_back(item);
                        PushOutcome::Queued
                    }
                    _ => PushOutcome::Rejected,
                }
            }
        };

        match outcome {
            PushOutcome::Evicted(_) | PushOutcome::Rejected => {
                self.shared.dropped.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
        if outcome != PushOutcome::Rejected {
            self.shared.notify.notify_one();
        }
        outcome
    }

    /// Stop accepting events. Already queued events are still delivered.
    pub fn close(&self) {
        self.shared.lock().closed = true;
        self.shared.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    /// Events shed so far.
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.shared.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug)]
pub struct QueueReceiver {
    shared: Arc<Shared>,
}

impl QueueReceiver {
    /// Next event in order; `None` once the queue is closed and drained.
    pub async fn recv(&mut self) -> Option<QueuedEvent> {
        loop {
            let notified = self.shared.notify.notified();
            {
                let mut buf = self.shared.lock();
                if let Some(item) = buf.items.pop_front() {
                    return Some(item);
                }
                if buf.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Non-waiting variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Option<QueuedEvent> {
        self.shared.lock().items.pop_front()
    }

    pub fn into_stream(mut self) -> impl Stream<Item = QueuedEvent> + Send {
        async_stream::stream! {
            while let Some(item) = self.recv().await {
                yield item;
            }
        }
    }
}

impl Drop for QueueReceiver {
    fn drop(&mut self) {
        let mut buf = self.shared.lock();
        buf.receiver_alive = false;
        buf.items.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use strand_core::event::{EventKind, StatePayload};

    fn item(seq: u64, kind: EventKind) -> QueuedEvent {
        QueuedEvent {
            seq,
            event: StreamEvent::new("t", kind),
        }
    }

    fn chunk(seq: u64) -> QueuedEvent {
        item(
            seq,
            EventKind::ContentChunk {
                content: format!("c{seq}"),
            },
        )
    }

    fn update(seq: u64) -> QueuedEvent {
        item(seq, EventKind::StateUpdate(StatePayload::default()))
    }

    fn node_start(seq: u64) -> QueuedEvent {
        item(
            seq,
            EventKind::NodeStart {
                node: "agent".into(),
                input_preview: None,
            },
        )
    }

    fn drain(rx: &mut QueueReceiver) -> Vec<u64> {
        std::iter::from_fn(|| rx.try_recv()).map(|q| q.seq).collect()
    }

    #[tokio::test]
    async fn delivers_in_order() {
        let (tx, mut rx) = bounded(8);
        for seq in 1..=3 {
            assert_eq!(tx.push(chunk(seq)), PushOutcome::Queued);
        }
        tx.close();
        let mut seen = Vec::new();
        while let Some(q) = rx.recv().await {
            seen.push(q.seq);
        }
        assert_eq!(seen, vec![1, 2, 3]);
    }

    #[test]
    fn full_queue_sheds_oldest_lowest_class() {
        let (tx, mut rx) = bounded(3);
        tx.push(update(1));
        tx.push(chunk(2));
        tx.push(chunk(3));
        assert_eq!(tx.push(update(4)), PushOutcome::Evicted(EventClass::Activity));
        assert_eq!(drain(&mut rx), vec![1, 3, 4]);
        assert_eq!(tx.dropped(), 1);
    }

    #[test]
    fn keepalive_goes_first() {
        let (tx, mut rx) = bounded(2);
        tx.push(chunk(1));
        tx.push(item(2, EventKind::Keepalive));
        assert_eq!(tx.push(chunk(3)), PushOutcome::Evicted(EventClass::Keepalive));
        assert_eq!(drain(&mut rx), vec![1, 3]);
    }

    #[test]
    fn cheaper_incoming_is_rejected() {
        let (tx, mut rx) = bounded(2);
        tx.push(node_start(1));
        tx.push(update(2));
        assert_eq!(tx.push(chunk(3)), PushOutcome::Rejected);
        assert_eq!(drain(&mut rx), vec![1, 2]);
        assert_eq!(tx.dropped(), 1);
    }

    #[test]
    fn authority_is_never_shed() {
        let (tx, mut rx) = bounded(2);
        tx.push(update(1));
        tx.push(update(2));
        assert_eq!(tx.push(update(3)), PushOutcome::Queued);
        assert_eq!(tx.len(), 3);
        assert_eq!(tx.push(chunk(4)), PushOutcome::Rejected);
        assert_eq!(drain(&mut rx), vec![1, 2, 3]);
        assert_eq!(tx.dropped(), 1);
    }

    #[test]
    fn push_after_close_is_disconnected() {
        let (tx, _rx) = bounded(2);
        tx.close();
        assert!(tx.is_closed());
        assert_eq!(tx.push(chunk(1)), PushOutcome::Disconnected);
    }

    #[test]
    fn dropped_receiver_disconnects() {
        let (tx, rx) = bounded(2);
        drop(rx);
        assert_eq!(tx.push(update(1)), PushOutcome::Disconnected);
        assert!(tx.is_empty());
    }

    #[tokio::test]
    async fn recv_wakes_on_push() {
        let (tx, rx) = bounded(4);
        let handle = tokio::spawn(async move { rx.into_stream().collect::<Vec<_>>().await });
        tokio::task::yield_now().await;
        tx.push(chunk(1));
        tx.push(update(2));
        tx.close();
        let items = handle.await.unwrap();
        assert_eq!(items.iter().map(|q| q.seq).collect::<Vec<_>>(), vec![1, 2]);
    }
}
