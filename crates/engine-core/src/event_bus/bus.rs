use model::events::Event;
use std::{
    any::{Any, TypeId},
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, warn};

/// A subscription handle that can be used to unsubscribe from events.
#[derive(Debug, Clone)]
pub struct Subscription {
    event_type_id: TypeId,
    subscriber_id: u64,
}

type Senders = HashMap<u64, Box<dyn Any + Send + Sync>>;

/// Typed fan-out of engine events. Slow subscribers lose events rather
/// than stall the publisher.
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<RwLock<HashMap<TypeId, Senders>>>,
    next_id: Arc<AtomicU64>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn subscribe<E>(&self, sender: mpsc::Sender<Arc<E>>) -> Subscription
    where
        E: Event + Clone,
    {
        let event_type_id = TypeId::of::<E>();
        let subscriber_id = self.next_id.fetch_add(1, Ordering::Relaxed);

        self.subscribers
            .write()
            .await
            .entry(event_type_id)
            .or_default()
            .insert(subscriber_id, Box::new(sender));

        debug!(
            event_type = std::any::type_name::<E>(),
            subscriber_id, "Subscribed to event"
        );

        Subscription {
            event_type_id,
            subscriber_id,
        }
    }

    pub async fn publish<E>(&self, event: E)
    where
        E: Event + Clone,
    {
        let subscribers = self.subscribers.read().await;
        let Some(type_subscribers) = subscribers.get(&TypeId::of::<E>()) else {
            return;
        };

        let event = Arc::new(event);
        for (subscriber_id, boxed_sender) in type_subscribers.iter() {
            let Some(sender) = boxed_sender.downcast_ref::<mpsc::Sender<Arc<E>>>() else {
                warn!(
                    event_type = event.event_type(),
                    subscriber_id, "Failed to downcast sender for subscriber"
                );
                continue;
            };

            if let Err(e) = sender.try_send(event.clone()) {
                warn!(
                    event_type = event.event_type(),
                    subscriber_id,
                    error = %e,
                    "Dropped event for slow subscriber"
                );
            }
        }
    }

    pub async fn unsubscribe(&self, subscription: Subscription) {
        let mut subscribers = self.subscribers.write().await;

        if let Some(type_subscribers) = subscribers.get_mut(&subscription.event_type_id) {
            type_subscribers.remove(&subscription.subscriber_id);
            if type_subscribers.is_empty() {
                subscribers.remove(&subscription.event_type_id);
            }
        }
    }

    pub async fn subscriber_count<E>(&self) -> usize
    where
        E: Event,
    {
        self.subscribers
            .read()
            .await
            .get(&TypeId::of::<E>())
            .map(|subs| subs.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use model::events::TransportThrottled;
    use std::time::Duration;

    fn throttled(secs: u64) -> TransportThrottled {
        TransportThrottled {
            wait: Duration::from_secs(secs),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn delivers_to_matching_subscribers_only() {
        let bus = EventBus::new();
        let (tx, mut rx) = mpsc::channel(4);
        let sub = bus.subscribe::<TransportThrottled>(tx).await;

        bus.publish(throttled(7)).await;
        let got = rx.recv().await.unwrap();
        assert_eq!(got.wait, Duration::from_secs(7));

        bus.unsubscribe(sub).await;
        assert_eq!(bus.subscriber_count::<TransportThrottled>().await, 0);
    }

    #[tokio::test]
    async fn full_channel_drops_instead_of_blocking() {
        let bus = EventBus::new();
        let (tx, mut rx) = mpsc::channel(1);
        bus.subscribe::<TransportThrottled>(tx).await;

        bus.publish(throttled(1)).await;
        bus.publish(throttled(2)).await;

        assert_eq!(rx.recv().await.unwrap().wait, Duration::from_secs(1));
        assert!(rx.try_recv().is_err());
    }
}
