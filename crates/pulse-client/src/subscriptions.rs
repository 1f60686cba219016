use std::collections::{HashMap, HashSet};

use futures_util::StreamExt;
use tracing::{debug, info, warn};

use pulse_gateway::dispatcher::{CancelHandle, Subscription, TopicSource};
use pulse_types::events::Delivery;
use pulse_types::topic::Topic;

/// What [`SubscriptionManager::next`] observed on a stream.
#[derive(Debug)]
pub enum StreamEvent {
    Delivery(Delivery),
    /// The stream broke and was replaced. Deliveries in the gap are lost;
    /// refetch the topic's state, then call
    /// [`SubscriptionManager::mark_refetched`].
    Resubscribed(Topic),
}

/// Revocable reference to one live subscription. Clones can be handed to
/// other components; revoking through any of them ends the stream.
#[derive(Clone)]
pub struct SubscriptionHandle {
    cancel: CancelHandle,
}

impl SubscriptionHandle {
    pub fn topic(&self) -> &Topic {
        self.cancel.topic()
    }

    /// Synchronous and final.
    pub fn revoke(&self) {
        self.cancel.cancel();
    }

    pub fn is_revoked(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Owns every realtime subscription of one long-lived component.
///
/// At most one subscription per topic: subscribing again replaces the old
/// one. Dropping the manager revokes everything it issued.
pub struct SubscriptionManager<S: TopicSource> {
    source: S,
    active: HashMap<Topic, SubscriptionHandle>,
    /// Topics whose stream was interrupted; their local state must be
    /// refetched because deliveries are not replayed.
    needs_refetch: HashSet<Topic>,
}

impl<S: TopicSource> SubscriptionManager<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            active: HashMap::new(),
            needs_refetch: HashSet::new(),
        }
    }

    pub fn subscribe(&mut self, topic: Topic) -> Subscription {
        if let Some(previous) = self.active.remove(&topic) {
            previous.revoke();
        }
        let subscription = self.source.subscribe(topic.clone());
        debug!("Subscribed to {}", topic);
        self.active.insert(
            topic,
            SubscriptionHandle {
                cancel: subscription.cancel_handle(),
            },
        );
        subscription
    }

    pub fn handle(&self, topic: &Topic) -> Option<SubscriptionHandle> {
        self.active.get(topic).cloned()
    }

    pub fn is_subscribed(&self, topic: &Topic) -> bool {
        self.active.get(topic).is_some_and(|h| !h.is_revoked())
    }

    /// Returns false if nothing was subscribed to `topic`.
    pub fn revoke(&mut self, topic: &Topic) -> bool {
        match self.active.remove(topic) {
            Some(handle) => {
                handle.revoke();
                true
            }
            None => false,
        }
    }

    pub fn revoke_all(&mut self) -> usize {
        let count = self.active.len();
        for (_, handle) in self.active.drain() {
            handle.revoke();
        }
        if count > 0 {
            info!("Revoked {} subscriptions", count);
        }
        count
    }

    /// Replace a broken or stale stream. The topic is flagged so the owner
    /// knows to refetch before trusting incremental deliveries again.
    pub fn resubscribe(&mut self, topic: Topic) -> Subscription {
        self.needs_refetch.insert(topic.clone());
        self.subscribe(topic)
    }

    /// Wait for the next item on `sub`.
    ///
    /// A stream that ends without having been revoked is treated as an
    /// interruption: `sub` is swapped for a fresh subscription and the topic
    /// is flagged for refetch. `None` means the subscription was revoked.
    pub async fn next(&mut self, sub: &mut Subscription) -> Option<StreamEvent> {
        if let Some(delivery) = sub.next().await {
            return Some(StreamEvent::Delivery(delivery));
        }
        if !sub.is_active() {
            return None;
        }

        let topic = sub.topic().clone();
        warn!("Stream on {} ended unexpectedly, resubscribing", topic);
        *sub = self.resubscribe(topic.clone());
        Some(StreamEvent::Resubscribed(topic))
    }

    pub fn needs_refetch(&self, topic: &Topic) -> bool {
        self.needs_refetch.contains(topic)
    }

    /// Call after a successful refetch. Returns whether the flag was set.
    pub fn mark_refetched(&mut self, topic: &Topic) -> bool {
        self.needs_refetch.remove(topic)
    }

    pub fn active_topics(&self) -> impl Iterator<Item = &Topic> {
        self.active.keys()
    }
}

impl<S: TopicSource> Drop for SubscriptionManager<S> {
    fn drop(&mut self) {
        self.revoke_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_gateway::dispatcher::Dispatcher;
    use pulse_types::events::GatewayEvent;
    use uuid::Uuid;

    fn ping(count: usize) -> GatewayEvent {
        GatewayEvent::NotificationsAllRead { count }
    }

    #[tokio::test]
    async fn revoke_ends_the_stream_immediately() {
        let dispatcher = Dispatcher::new();
        let topic = Topic::Notifications(Uuid::new_v4());
        let mut manager = SubscriptionManager::new(dispatcher.clone());

        let mut sub = manager.subscribe(topic.clone());
        dispatcher.publish(&topic, ping(1));
        assert!(manager.revoke(&topic));

        // Buffered item is discarded too
        assert!(sub.recv().await.is_none());
        assert!(!manager.is_subscribed(&topic));
        assert_eq!(dispatcher.subscriber_count(&topic), 0);
    }

    #[tokio::test]
    async fn handles_revoke_from_another_task() {
        let dispatcher = Dispatcher::new();
        let topic = Topic::Presence("watch:g1".into());
        let mut manager = SubscriptionManager::new(dispatcher.clone());
        let mut sub = manager.subscribe(topic.clone());

        let handle = manager.handle(&topic).unwrap();
        tokio::spawn(async move { handle.revoke() }).await.unwrap();

        dispatcher.publish(&topic, ping(1));
        assert!(sub.recv().await.is_none());
    }

    #[tokio::test]
    async fn subscribing_twice_replaces_the_old_stream() {
        let dispatcher = Dispatcher::new();
        let topic = Topic::Comments("g1".into());
        let mut manager = SubscriptionManager::new(dispatcher.clone());

        let mut first = manager.subscribe(topic.clone());
        let mut second = manager.subscribe(topic.clone());
        assert_eq!(dispatcher.subscriber_count(&topic), 1);

        dispatcher.publish(&topic, ping(7));
        assert!(first.recv().await.is_none());
        assert_eq!(second.recv().await.unwrap().event, ping(7));
    }

    #[tokio::test]
    async fn resubscribe_flags_a_refetch() {
        let dispatcher = Dispatcher::new();
        let topic = Topic::Notifications(Uuid::new_v4());
        let mut manager = SubscriptionManager::new(dispatcher.clone());

        let _sub = manager.subscribe(topic.clone());
        assert!(!manager.needs_refetch(&topic));

        let _sub = manager.resubscribe(topic.clone());
        assert!(manager.needs_refetch(&topic));
        assert!(manager.mark_refetched(&topic));
        assert!(!manager.needs_refetch(&topic));
    }

    #[tokio::test]
    async fn interrupted_stream_is_replaced_and_flagged() {
        let dispatcher = Dispatcher::new();
        let topic = Topic::Notifications(Uuid::new_v4());
        let mut manager = SubscriptionManager::new(dispatcher.clone());
        let mut sub = manager.subscribe(topic.clone());

        dispatcher.publish(&topic, ping(1));
        dispatcher.close_topic(&topic);

        assert!(matches!(manager.next(&mut sub).await, Some(StreamEvent::Delivery(d)) if d.event == ping(1)));
        assert!(matches!(manager.next(&mut sub).await, Some(StreamEvent::Resubscribed(t)) if t == topic));
        assert!(manager.needs_refetch(&topic));
        assert!(manager.is_subscribed(&topic));
        assert_eq!(dispatcher.subscriber_count(&topic), 1);

        dispatcher.publish(&topic, ping(2));
        assert!(matches!(manager.next(&mut sub).await, Some(StreamEvent::Delivery(d)) if d.event == ping(2)));
    }

    #[tokio::test]
    async fn revoked_stream_is_not_resubscribed() {
        let dispatcher = Dispatcher::new();
        let topic = Topic::Comments("g2".into());
        let mut manager = SubscriptionManager::new(dispatcher.clone());
        let mut sub = manager.subscribe(topic.clone());

        manager.revoke(&topic);
        assert!(manager.next(&mut sub).await.is_none());
        assert!(!manager.needs_refetch(&topic));
        assert_eq!(dispatcher.subscriber_count(&topic), 0);
    }

    #[tokio::test]
    async fn dropping_the_manager_revokes_everything() {
        let dispatcher = Dispatcher::new();
        let a = Topic::Notifications(Uuid::new_v4());
        let b = Topic::Comments("g9".into());

        let (mut sub_a, mut sub_b) = {
            let mut manager = SubscriptionManager::new(dispatcher.clone());
            (manager.subscribe(a.clone()), manager.subscribe(b.clone()))
        };

        dispatcher.publish(&a, ping(1));
        dispatcher.publish(&b, ping(2));
        assert!(sub_a.recv().await.is_none());
        assert!(sub_b.recv().await.is_none());
        assert_eq!(dispatcher.topic_count(), 0);
    }
}
