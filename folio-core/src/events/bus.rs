use std::collections::HashMap;
use std::fmt;

use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::trace;
use uuid::Uuid;

/// Lifecycle event names published by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationEventType {
    Created,
    Processing,
    Completed,
    Failed,
}

impl GenerationEventType {
    pub const fn event_name(self) -> &'static str {
        match self {
            Self::Created => "generation.created",
            Self::Processing => "generation.processing",
            Self::Completed => "generation.completed",
            Self::Failed => "generation.failed",
        }
    }
}

impl fmt::Display for GenerationEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.event_name())
    }
}

/// An event as delivered to a subscriber mailbox. The payload is
/// serialized once per publish, not once per subscriber.
#[derive(Debug, Clone)]
pub struct BusEvent {
    pub event_type: String,
    pub data: String,
}

/// Per-subscriber mailbox depth. A subscriber that falls further behind
/// than this loses its own copy of events, never the publisher's time.
pub const MAILBOX_CAPACITY: usize = 64;

/// In-process publish/subscribe fan-out for lifecycle events.
///
/// Publishing is non-blocking: a full mailbox drops that subscriber's
/// copy of the event silently so a slow SSE client can never stall the
/// scheduler loop.
#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: RwLock<HashMap<Uuid, mpsc::Sender<BusEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a mailbox; the returned receiver lives as long as the
    /// subscription.
    pub fn subscribe(&self) -> (Uuid, mpsc::Receiver<BusEvent>) {
        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        let id = Uuid::new_v4();
        self.subscribers.write().insert(id, tx);
        (id, rx)
    }

    pub fn unsubscribe(&self, id: Uuid) {
        self.subscribers.write().remove(&id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    pub fn publish(&self, event_type: GenerationEventType, data: &Value) {
        self.publish_raw(event_type.event_name(), data);
    }

    pub fn publish_raw(&self, event_type: &str, data: &Value) {
        let event = BusEvent {
            event_type: event_type.to_string(),
            data: data.to_string(),
        };

        let subscribers = self.subscribers.read();
        for (id, tx) in subscribers.iter() {
            if tx.try_send(event.clone()).is_err() {
                trace!(subscriber = %id, event = %event.event_type, "dropping event for slow subscriber");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn events_reach_every_subscriber_in_publish_order() {
        let bus = EventBus::new();
        let (_id_a, mut rx_a) = bus.subscribe();
        let (_id_b, mut rx_b) = bus.subscribe();

        bus.publish(GenerationEventType::Created, &json!({ "id": "x" }));
        bus.publish(GenerationEventType::Processing, &json!({ "id": "x" }));

        for rx in [&mut rx_a, &mut rx_b] {
            let first = rx.recv().await.unwrap();
            assert_eq!(first.event_type, "generation.created");
            let second = rx.recv().await.unwrap();
            assert_eq!(second.event_type, "generation.processing");
        }
    }

    #[tokio::test]
    async fn full_mailboxes_drop_silently() {
        let bus = EventBus::new();
        let (_id, mut rx) = bus.subscribe();

        for i in 0..(MAILBOX_CAPACITY + 10) {
            bus.publish(GenerationEventType::Processing, &json!({ "seq": i }));
        }

        let mut received = 0;
        while let Ok(event) = rx.try_recv() {
            let data: Value = serde_json::from_str(&event.data).unwrap();
            assert_eq!(data["seq"], received);
            received += 1;
        }
        assert_eq!(received, MAILBOX_CAPACITY);
    }

    #[tokio::test]
    async fn a_slow_subscriber_does_not_starve_others() {
        let bus = EventBus::new();
        let (_slow_id, slow_rx) = bus.subscribe();
        let (_fast_id, mut fast_rx) = bus.subscribe();

        for i in 0..(MAILBOX_CAPACITY * 2) {
            bus.publish(GenerationEventType::Processing, &json!({ "seq": i }));
            if let Ok(event) = fast_rx.try_recv() {
                let data: Value = serde_json::from_str(&event.data).unwrap();
                assert_eq!(data["seq"], i);
            }
        }
        drop(slow_rx);
    }

    #[tokio::test]
    async fn unsubscribe_closes_the_mailbox() {
        let bus = EventBus::new();
        let (id, mut rx) = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);

        bus.unsubscribe(id);
        assert_eq!(bus.subscriber_count(), 0);
        assert!(rx.recv().await.is_none());

        // Publishing to nobody is a no-op.
        bus.publish(GenerationEventType::Failed, &json!({}));
    }
}
