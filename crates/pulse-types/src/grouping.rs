//! Display-time aggregation of a notification fetch window.
//!
//! Nothing here is persisted: the grouped view is rebuilt from the raw events
//! on every read.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::notification::{
    NotificationCategory, NotificationEvent, NotificationPriority, NotificationType,
};

/// How many actor names a grouped entry keeps for display.
const MAX_ACTORS: usize = 3;

/// Several low-signal events about the same target collapsed into one entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupedNotification {
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub target_id: String,
    pub count: usize,
    pub content: String,
    /// Read only when every member is read.
    pub read: bool,
    /// Newest member first.
    pub ids: Vec<Uuid>,
    pub actors: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub category: NotificationCategory,
    pub priority: NotificationPriority,
    /// Newest member, for thumbnails and deep links.
    pub latest: NotificationEvent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "entry", rename_all = "snake_case")]
pub enum FeedEntry {
    Single(NotificationEvent),
    Grouped(GroupedNotification),
}

impl FeedEntry {
    pub fn created_at(&self) -> DateTime<Utc> {
        match self {
            Self::Single(event) => event.created_at,
            Self::Grouped(group) => group.created_at,
        }
    }

    pub fn count(&self) -> usize {
        match self {
            Self::Single(_) => 1,
            Self::Grouped(group) => group.count,
        }
    }
}

/// Display text for a collapsed group.
pub fn group_template(notification_type: NotificationType, count: usize) -> String {
    match notification_type {
        NotificationType::Like => format!("{} people liked your game", count),
        NotificationType::Play => format!("{} people played your game", count),
        NotificationType::Save => format!("{} people saved your game", count),
        other => format!("{} new {} notifications", count, other),
    }
}

/// Collapses events of a groupable type that share a target.
///
/// `events` is one fetch window, newest first. Events with the same
/// `(type, target)` key are merged into a single entry placed where the
/// newest member sits; interleaved high-signal events stay individual and do
/// not split a run. Keys with a single member, events without a target and
/// every non-groupable type come back as [`FeedEntry::Single`].
///
/// Members can sit anywhere in the window, so the page size is what bounds
/// how far apart two merged events may be.
pub fn group(events: &[NotificationEvent]) -> Vec<FeedEntry> {
    let mut members: HashMap<(NotificationType, &str), Vec<&NotificationEvent>> = HashMap::new();
    for event in events {
        if let Some(key) = group_key(event) {
            members.entry(key).or_default().push(event);
        }
    }

    let mut entries = Vec::with_capacity(events.len());
    for event in events {
        let Some(key) = group_key(event) else {
            entries.push(FeedEntry::Single(event.clone()));
            continue;
        };

        // `remove` so the group is emitted once, at its newest member
        match members.remove(&key) {
            Some(group) if group.len() > 1 => entries.push(FeedEntry::Grouped(collapse(key, &group))),
            Some(_) => entries.push(FeedEntry::Single(event.clone())),
            None => {}
        }
    }
    entries
}

/// Events belonging to one category tab, order preserved.
pub fn filter_by_category(
    events: &[NotificationEvent],
    category: NotificationCategory,
) -> Vec<NotificationEvent> {
    events
        .iter()
        .filter(|e| e.category() == category)
        .cloned()
        .collect()
}

fn group_key(event: &NotificationEvent) -> Option<(NotificationType, &str)> {
    let t = event.notification_type();
    if !t.is_groupable() {
        return None;
    }
    event.payload.kind.target_id().map(|target| (t, target))
}

fn collapse(key: (NotificationType, &str), group: &[&NotificationEvent]) -> GroupedNotification {
    let (notification_type, target_id) = key;
    let latest = group[0];

    let mut actors: Vec<String> = Vec::new();
    for username in group.iter().filter_map(|e| e.payload.username.as_ref()) {
        if actors.len() == MAX_ACTORS {
            break;
        }
        if !actors.contains(username) {
            actors.push(username.clone());
        }
    }

    GroupedNotification {
        notification_type,
        target_id: target_id.to_string(),
        count: group.len(),
        content: group_template(notification_type, group.len()),
        read: group.iter().all(|e| e.payload.read),
        ids: group.iter().map(|e| e.id).collect(),
        actors,
        created_at: latest.created_at,
        category: notification_type.category(),
        priority: notification_type.priority(),
        latest: latest.clone(),
    }
}
