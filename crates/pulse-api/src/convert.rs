//! Row -> wire model conversion. Corrupt rows are logged and skipped rather
//! than failing a whole page.

use chrono::{DateTime, Utc};
use tracing::warn;
use uuid::Uuid;

use pulse_db::models::{MessageRow, NotificationRow};
use pulse_types::message::{DirectMessage, MessageBody, MessageContent};
use pulse_types::notification::{NotificationEvent, NotificationPayload};

pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| {
            // SQLite's datetime('now') has no timezone; treat as UTC
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .ok()
}

fn parse_uuid(raw: &str, field: &str, row_id: &str) -> Option<Uuid> {
    raw.parse()
        .map_err(|e| warn!("Corrupt {} '{}' on row '{}': {}", field, raw, row_id, e))
        .ok()
}

pub fn notification(row: NotificationRow) -> Option<NotificationEvent> {
    let mut payload: NotificationPayload = serde_json::from_str(&row.payload)
        .map_err(|e| warn!("Corrupt payload on notification '{}': {}", row.id, e))
        .ok()?;
    payload.read = row.read;

    Some(NotificationEvent {
        id: parse_uuid(&row.id, "id", &row.id)?,
        recipient_id: parse_uuid(&row.recipient_id, "recipient_id", &row.id)?,
        seq: row.seq,
        created_at: parse_timestamp(&row.created_at).unwrap_or_else(|| {
            warn!("Corrupt created_at '{}' on notification '{}'", row.created_at, row.id);
            DateTime::default()
        }),
        payload,
    })
}

pub fn notifications(rows: Vec<NotificationRow>) -> Vec<NotificationEvent> {
    rows.into_iter().filter_map(notification).collect()
}

/// Build the message as `reader_id` is allowed to see it.
pub fn message(row: MessageRow, reader_id: Uuid) -> Option<DirectMessage> {
    let content = MessageContent::from_parts(&row.content_kind, row.content_body)
        .or_else(|| {
            warn!("Unknown content kind '{}' on message '{}'", row.content_kind, row.id);
            None
        })?;
    let sender_id = parse_uuid(&row.sender_id, "sender_id", &row.id)?;
    // A stamp that is present but unreadable still counts as viewed, so a
    // one-time message never reopens
    let viewed_at = row.viewed_at.as_deref().map(|raw| {
        parse_timestamp(raw).unwrap_or_else(|| {
            warn!("Corrupt viewed_at '{}' on message '{}'", raw, row.id);
            DateTime::default()
        })
    });

    Some(DirectMessage {
        id: parse_uuid(&row.id, "id", &row.id)?,
        seq: row.seq,
        sender_id,
        recipient_id: parse_uuid(&row.recipient_id, "recipient_id", &row.id)?,
        body: MessageBody::for_reader(content, row.is_one_time, viewed_at, sender_id, reader_id),
        is_one_time: row.is_one_time,
        viewed_at,
        reply_to_id: row
            .reply_to_id
            .as_deref()
            .and_then(|raw| parse_uuid(raw, "reply_to_id", &row.id)),
        read_at: row.read_at.as_deref().and_then(parse_timestamp),
        client_nonce: row.client_nonce,
        created_at: parse_timestamp(&row.created_at).unwrap_or_else(|| {
            warn!("Corrupt created_at '{}' on message '{}'", row.created_at, row.id);
            DateTime::default()
        }),
    })
}

pub fn messages(rows: Vec<MessageRow>, reader_id: Uuid) -> Vec<DirectMessage> {
    rows.into_iter().filter_map(|row| message(row, reader_id)).collect()
}
