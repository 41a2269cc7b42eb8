//! Process-wide queue bus backed by a broadcast channel.

use buildit_core::event::{LifecycleEvent, QueueEmitter, QueueEventKind};
use tokio::sync::broadcast;
use tracing::trace;

/// A lifecycle event together with its event name.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueEvent {
    pub kind: QueueEventKind,
    pub event: LifecycleEvent,
}

/// Queue bus shared by every job in the worker.
///
/// Sends never block. Events sent while nobody is subscribed are dropped,
/// and subscribers that fall more than `capacity` events behind lose the
/// oldest ones.
#[derive(Debug, Clone)]
pub struct BroadcastQueue {
    tx: broadcast::Sender<QueueEvent>,
}

impl BroadcastQueue {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastQueue {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl QueueEmitter for BroadcastQueue {
    fn emit(&self, kind: QueueEventKind, event: LifecycleEvent) {
        if self.tx.send(QueueEvent { kind, event }).is_err() {
            trace!(kind = %kind, "No queue subscribers; event dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscribers_receive_events() {
        let queue = BroadcastQueue::new(8);
        let mut rx = queue.subscribe();

        queue.emit(
            QueueEventKind::JobUpdate,
            LifecycleEvent::new("u", "j", "r", 0.0),
        );

        let received = rx.try_recv().unwrap();
        assert_eq!(received.kind, QueueEventKind::JobUpdate);
        assert_eq!(received.event.job_id, "j");
    }

    #[test]
    fn test_emit_without_subscribers_is_dropped() {
        let queue = BroadcastQueue::new(8);
        queue.emit(
            QueueEventKind::JobComplete,
            LifecycleEvent::new("u", "j", "r", 0.0),
        );

        let mut rx = queue.subscribe();
        assert!(rx.try_recv().is_err());
    }
}
