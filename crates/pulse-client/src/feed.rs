use tracing::trace;
use uuid::Uuid;

use pulse_types::events::{Delivery, GatewayEvent};
use pulse_types::grouping::{self, FeedEntry};
use pulse_types::notification::{NotificationCategory, NotificationEvent};

/// Local copy of a user's notification feed, kept newest first.
///
/// Delivery is at-least-once, so every incremental update is idempotent:
/// a repeated create is ignored and repeated reads/deletes are no-ops.
#[derive(Debug, Default)]
pub struct NotificationFeed {
    events: Vec<NotificationEvent>,
}

impl NotificationFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Swap in a fresh fetch, e.g. after a reconnect.
    pub fn replace(&mut self, mut fetched: Vec<NotificationEvent>) {
        fetched.sort_by(|a, b| b.seq.cmp(&a.seq));
        fetched.dedup_by(|a, b| a.id == b.id);
        self.events = fetched;
    }

    /// Fold one delivery into the feed. Returns whether anything changed.
    pub fn apply(&mut self, delivery: &Delivery) -> bool {
        match &delivery.event {
            GatewayEvent::NotificationCreate { notification } => self.upsert(notification.clone()),
            GatewayEvent::NotificationRead { id } => self.mark_read_local(*id),
            GatewayEvent::NotificationsAllRead { .. } => self.mark_all_read_local() > 0,
            GatewayEvent::NotificationDelete { id } => {
                let before = self.events.len();
                self.events.retain(|e| e.id != *id);
                self.events.len() != before
            }
            GatewayEvent::NotificationsCleared { .. } => {
                let changed = !self.events.is_empty();
                self.events.clear();
                changed
            }
            other => {
                trace!("Feed ignoring {:?}", other);
                false
            }
        }
    }

    fn upsert(&mut self, event: NotificationEvent) -> bool {
        if self.events.iter().any(|e| e.id == event.id) {
            return false;
        }
        let at = self.events.partition_point(|e| e.seq > event.seq);
        self.events.insert(at, event);
        true
    }

    /// Optimistic read flag, ahead of the server round trip.
    pub fn mark_read_local(&mut self, id: Uuid) -> bool {
        match self.events.iter_mut().find(|e| e.id == id) {
            Some(event) if !event.payload.read => {
                event.payload.read = true;
                true
            }
            _ => false,
        }
    }

    pub fn mark_all_read_local(&mut self) -> usize {
        let mut flipped = 0;
        for event in self.events.iter_mut().filter(|e| !e.payload.read) {
            event.payload.read = true;
            flipped += 1;
        }
        flipped
    }

    pub fn events(&self) -> &[NotificationEvent] {
        &self.events
    }

    pub fn unread_count(&self) -> usize {
        self.events.iter().filter(|e| !e.payload.read).count()
    }

    pub fn grouped(&self) -> Vec<FeedEntry> {
        grouping::group(&self.events)
    }

    pub fn by_category(&self, category: NotificationCategory) -> Vec<NotificationEvent> {
        grouping::filter_by_category(&self.events, category)
    }
}
