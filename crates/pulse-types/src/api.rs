use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::events::PresenceViewer;
use crate::grouping::FeedEntry;
use crate::message::MessageContent;
use crate::notification::NotificationKind;

// -- JWT Claims --

/// Claims issued by the identity provider. Shared by the REST middleware and
/// the WebSocket upgrade so both authenticate the same way.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub admin: bool,
    pub exp: usize,
}

// -- Notifications --

/// Producer-facing notify call. `content` falls back to a per-kind template.
#[derive(Debug, Deserialize)]
pub struct NotifyRequest {
    pub recipient_id: Uuid,
    #[serde(flatten)]
    pub kind: NotificationKind,
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BroadcastRequest {
    pub message: String,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub video_url: Option<String>,
}

/// Best-effort fan-out result: `sent < total` means some batches failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastResponse {
    pub sent: usize,
    pub total: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NotificationsPage {
    pub items: Vec<FeedEntry>,
    /// Pass back as `before` to fetch the next (older) page.
    pub next_cursor: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CountResponse {
    pub count: usize,
}

// -- Direct messages --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    pub content: MessageContent,
    #[serde(default)]
    pub is_one_time: bool,
    #[serde(default)]
    pub reply_to_id: Option<Uuid>,
    #[serde(default)]
    pub client_nonce: Option<String>,
}

// -- Presence --

#[derive(Debug, Serialize, Deserialize)]
pub struct PresenceSnapshot {
    pub channel_key: String,
    pub viewers: Vec<PresenceViewer>,
    pub count: usize,
}
