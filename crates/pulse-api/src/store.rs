//! Notification event store: persistence through `pulse-db`, then a
//! delivery on the recipient's personal topic.

use tracing::{debug, warn};
use uuid::Uuid;

use pulse_db::models::NewNotification;
use pulse_types::api::BroadcastResponse;
use pulse_types::error::PulseError;
use pulse_types::events::GatewayEvent;
use pulse_types::notification::{NotificationEvent, NotificationPayload};
use pulse_types::topic::Topic;

use crate::convert;
use crate::state::AppStateInner;

pub const DEFAULT_PAGE_SIZE: u32 = 50;
pub const MAX_PAGE_SIZE: u32 = 200;

pub fn clamp_limit(limit: Option<u32>) -> u32 {
    limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
}

fn new_row(recipient_id: Uuid, payload: &NotificationPayload) -> Result<NewNotification, PulseError> {
    if recipient_id.is_nil() {
        return Err(PulseError::validation("recipient_id must not be empty"));
    }
    payload.validate()?;
    let encoded = serde_json::to_string(payload)
        .map_err(|e| PulseError::Internal(format!("encode payload: {}", e)))?;

    Ok(NewNotification {
        id: Uuid::new_v4().to_string(),
        recipient_id: recipient_id.to_string(),
        type_name: payload.kind.notification_type().to_string(),
        payload: encoded,
    })
}

fn publish_created(state: &AppStateInner, event: &NotificationEvent) {
    let delivered = state.dispatcher.publish(
        &Topic::Notifications(event.recipient_id),
        GatewayEvent::NotificationCreate {
            notification: event.clone(),
        },
    );
    debug!(
        "Notification {} ({}) delivered to {} live subscribers",
        event.id,
        event.notification_type(),
        delivered
    );
}

/// Validate, persist and publish a single notification.
pub async fn create(
    state: &AppStateInner,
    recipient_id: Uuid,
    payload: NotificationPayload,
) -> Result<NotificationEvent, PulseError> {
    let new = new_row(recipient_id, &payload)?;
    let row = state.store(move |db| db.insert_notification(&new)).await?;
    let event = convert::notification(row)
        .ok_or_else(|| PulseError::Internal("stored notification could not be decoded".into()))?;

    publish_created(state, &event);
    Ok(event)
}

/// Persist many notifications in chunks of `broadcast_batch_size`, one
/// transaction per chunk. A failed chunk is logged and skipped; the result
/// reports how many rows actually landed.
pub async fn batch_create(
    state: &AppStateInner,
    items: Vec<(Uuid, NotificationPayload)>,
) -> Result<BroadcastResponse, PulseError> {
    let total = items.len();
    let mut rows = Vec::with_capacity(total);
    for (recipient_id, payload) in &items {
        rows.push(new_row(*recipient_id, payload)?);
    }

    let sent = insert_in_chunks(state, rows).await;
    Ok(BroadcastResponse { sent, total })
}

/// Returns how many rows were committed.
async fn insert_in_chunks(state: &AppStateInner, rows: Vec<NewNotification>) -> usize {
    let batch_size = state.config.broadcast_batch_size.max(1);
    let mut sent = 0;
    for (index, chunk) in rows.chunks(batch_size).enumerate() {
        let chunk = chunk.to_vec();
        let len = chunk.len();
        match state.store(move |db| db.insert_notifications(&chunk)).await {
            Ok(inserted) => {
                sent += inserted.len();
                for event in convert::notifications(inserted) {
                    publish_created(state, &event);
                }
            }
            Err(e) => warn!("Notification batch {} ({} rows) failed, skipping: {}", index, len, e),
        }
    }
    sent
}

/// Newest first; `before` is the `seq` of the last item already shown.
pub async fn list(
    state: &AppStateInner,
    recipient_id: Uuid,
    limit: Option<u32>,
    before: Option<i64>,
) -> Result<Vec<NotificationEvent>, PulseError> {
    let limit = clamp_limit(limit);
    let recipient = recipient_id.to_string();
    let rows = state
        .store(move |db| db.list_notifications(&recipient, limit, before))
        .await?;
    Ok(convert::notifications(rows))
}

pub async fn unread_count(state: &AppStateInner, recipient_id: Uuid) -> Result<usize, PulseError> {
    let recipient = recipient_id.to_string();
    state
        .store(move |db| db.unread_notification_count(&recipient))
        .await
}

/// Idempotent. `NotFound` when the id does not belong to `recipient_id`.
pub async fn mark_read(state: &AppStateInner, id: Uuid, recipient_id: Uuid) -> Result<(), PulseError> {
    let recipient = recipient_id.to_string();
    let found = state
        .store(move |db| db.mark_notification_read(&id.to_string(), &recipient))
        .await?;
    if !found {
        return Err(PulseError::not_found(format!("notification {}", id)));
    }

    state
        .dispatcher
        .publish(&Topic::Notifications(recipient_id), GatewayEvent::NotificationRead { id });
    Ok(())
}

/// Returns how many rows flipped from unread to read.
pub async fn mark_all_read(state: &AppStateInner, recipient_id: Uuid) -> Result<usize, PulseError> {
    let recipient = recipient_id.to_string();
    let count = state
        .store(move |db| db.mark_all_notifications_read(&recipient))
        .await?;

    if count > 0 {
        state.dispatcher.publish(
            &Topic::Notifications(recipient_id),
            GatewayEvent::NotificationsAllRead { count },
        );
    }
    Ok(count)
}

pub async fn delete(state: &AppStateInner, id: Uuid, recipient_id: Uuid) -> Result<(), PulseError> {
    let recipient = recipient_id.to_string();
    let deleted = state
        .store(move |db| db.delete_notification(&id.to_string(), &recipient))
        .await?;
    if !deleted {
        return Err(PulseError::not_found(format!("notification {}", id)));
    }

    state
        .dispatcher
        .publish(&Topic::Notifications(recipient_id), GatewayEvent::NotificationDelete { id });
    Ok(())
}

pub async fn clear_all(state: &AppStateInner, recipient_id: Uuid) -> Result<usize, PulseError> {
    let recipient = recipient_id.to_string();
    let count = state
        .store(move |db| db.clear_notifications(&recipient))
        .await?;

    state.dispatcher.publish(
        &Topic::Notifications(recipient_id),
        GatewayEvent::NotificationsCleared { count },
    );
    Ok(count)
}
