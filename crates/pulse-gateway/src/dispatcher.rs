use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::task::{Context, Poll};

use futures_util::Stream;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use pulse_types::events::{Delivery, GatewayEvent};
use pulse_types::topic::Topic;

/// Anything that can hand out topic subscriptions. The client layer is written
/// against this so it does not care whether deliveries come from an
/// in-process dispatcher or a socket.
pub trait TopicSource {
    fn subscribe(&self, topic: Topic) -> Subscription;
}

/// Topic-based fan-out hub.
///
/// Each topic keeps its own sequence counter. A publish assigns the next
/// sequence number and pushes to every live subscriber while holding that
/// topic's lock, so every subscriber observes one topic in strictly
/// increasing `seq` order. Topics are independent of each other.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// Topic -> subscribers. Entries are pruned when their last subscriber leaves.
    topics: RwLock<HashMap<Topic, Arc<TopicState>>>,

    next_subscription_id: AtomicU64,
}

#[derive(Default)]
struct TopicState {
    inner: Mutex<TopicInner>,
}

#[derive(Default)]
struct TopicInner {
    next_seq: u64,
    subscribers: HashMap<u64, Arc<SubscriberSlot>>,
}

struct SubscriberSlot {
    active: AtomicBool,
    tx: Mutex<Option<mpsc::UnboundedSender<Delivery>>>,
}

impl SubscriberSlot {
    fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                topics: RwLock::new(HashMap::new()),
                next_subscription_id: AtomicU64::new(1),
            }),
        }
    }

    /// Subscribe to one topic. Only events published after this call are
    /// delivered; there is no replay, so callers that need the current state
    /// must fetch it after subscribing.
    pub fn subscribe(&self, topic: Topic) -> Subscription {
        let id = self.inner.next_subscription_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        let slot = Arc::new(SubscriberSlot {
            active: AtomicBool::new(true),
            tx: Mutex::new(Some(tx)),
        });

        {
            let mut topics = write_lock(&self.inner.topics);
            let state = topics.entry(topic.clone()).or_default();
            lock(&state.inner).subscribers.insert(id, slot.clone());
        }

        debug!("Subscription {} opened on {}", id, topic);
        Subscription {
            rx,
            cancel: CancelHandle {
                id,
                topic,
                slot,
                dispatcher: Arc::downgrade(&self.inner),
            },
        }
    }

    /// Publish an event to every current subscriber of `topic`.
    /// Returns the number of subscribers it was handed to.
    pub fn publish(&self, topic: &Topic, event: GatewayEvent) -> usize {
        let state = read_lock(&self.inner.topics).get(topic).cloned();
        let Some(state) = state else {
            trace!("No subscribers on {}, dropping event", topic);
            return 0;
        };

        let mut inner = lock(&state.inner);
        inner.next_seq += 1;
        let delivery = Delivery {
            topic: topic.clone(),
            seq: inner.next_seq,
            event,
        };

        let mut delivered = 0;
        for slot in inner.subscribers.values() {
            if !slot.is_active() {
                continue;
            }
            if let Some(tx) = lock(&slot.tx).as_ref() {
                if tx.send(delivery.clone()).is_ok() {
                    delivered += 1;
                }
            }
        }
        trace!("Published seq {} on {} to {} subscribers", delivery.seq, topic, delivered);
        delivered
    }

    /// End every stream on `topic` from the publishing side. Subscribers
    /// drain what is already buffered, then see the stream finish without
    /// having been revoked. Returns how many streams were closed.
    pub fn close_topic(&self, topic: &Topic) -> usize {
        let Some(state) = write_lock(&self.inner.topics).remove(topic) else {
            return 0;
        };
        let inner = lock(&state.inner);
        for slot in inner.subscribers.values() {
            lock(&slot.tx).take();
        }
        debug!("Closed {} subscriptions on {}", inner.subscribers.len(), topic);
        inner.subscribers.len()
    }

    pub fn subscriber_count(&self, topic: &Topic) -> usize {
        read_lock(&self.inner.topics)
            .get(topic)
            .map_or(0, |state| lock(&state.inner).subscribers.len())
    }

    /// Number of topics with at least one subscriber.
    pub fn topic_count(&self) -> usize {
        read_lock(&self.inner.topics).len()
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl TopicSource for Dispatcher {
    fn subscribe(&self, topic: Topic) -> Subscription {
        Dispatcher::subscribe(self, topic)
    }
}

impl DispatcherInner {
    fn remove_subscriber(&self, topic: &Topic, id: u64) {
        let mut topics = write_lock(&self.topics);
        let now_empty = match topics.get(topic) {
            Some(state) => {
                let mut inner = lock(&state.inner);
                inner.subscribers.remove(&id);
                inner.subscribers.is_empty()
            }
            None => false,
        };
        if now_empty {
            topics.remove(topic);
        }
    }
}

/// Revokes a subscription from anywhere, including another task.
#[derive(Clone)]
pub struct CancelHandle {
    id: u64,
    topic: Topic,
    slot: Arc<SubscriberSlot>,
    dispatcher: Weak<DispatcherInner>,
}

impl CancelHandle {
    /// Synchronous and final: once this returns, the subscription yields no
    /// further deliveries, including ones already buffered.
    pub fn cancel(&self) {
        if !self.slot.active.swap(false, Ordering::AcqRel) {
            return;
        }
        // Dropping the sender wakes a receiver parked in recv()
        lock(&self.slot.tx).take();
        if let Some(dispatcher) = self.dispatcher.upgrade() {
            dispatcher.remove_subscriber(&self.topic, self.id);
        }
        debug!("Subscription {} on {} cancelled", self.id, self.topic);
    }

    pub fn is_cancelled(&self) -> bool {
        !self.slot.is_active()
    }

    pub fn topic(&self) -> &Topic {
        &self.topic
    }
}

/// Ordered stream of deliveries for one topic. Dropping it unsubscribes.
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<Delivery>,
    cancel: CancelHandle,
}

impl Subscription {
    pub fn topic(&self) -> &Topic {
        &self.cancel.topic
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn is_active(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// Next delivery, or `None` once unsubscribed.
    pub async fn recv(&mut self) -> Option<Delivery> {
        futures_util::StreamExt::next(self).await
    }

    /// Stop delivery now. Anything still buffered is discarded.
    pub fn unsubscribe(&mut self) {
        self.cancel.cancel();
        self.rx.close();
        while self.rx.try_recv().is_ok() {}
    }
}

impl Stream for Subscription {
    type Item = Delivery;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Delivery>> {
        if !self.is_active() {
            return Poll::Ready(None);
        }
        match self.rx.poll_recv(cx) {
            // Re-check: a cancel may have landed while this item sat in the buffer
            Poll::Ready(Some(delivery)) if self.is_active() => Poll::Ready(Some(delivery)),
            Poll::Ready(_) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// Poisoning only happens if a holder panicked mid-update; the maps stay
// structurally valid, so keep serving.
fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

fn read_lock<T>(l: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    l.read().unwrap_or_else(|e| e.into_inner())
}

fn write_lock<T>(l: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    l.write().unwrap_or_else(|e| e.into_inner())
}
