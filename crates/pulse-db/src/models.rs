//! Database row types. These map directly to SQLite rows and stay
//! independent of the pulse-types wire models.

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub avatar_url: Option<String>,
    pub created_at: String,
}

/// Input for a notification insert. `payload` is the JSON-encoded payload
/// without the `read` flag, which lives in its own column.
#[derive(Debug, Clone)]
pub struct NewNotification {
    pub id: String,
    pub recipient_id: String,
    pub type_name: String,
    pub payload: String,
}

#[derive(Debug, Clone)]
pub struct NotificationRow {
    pub seq: i64,
    pub id: String,
    pub recipient_id: String,
    pub type_name: String,
    pub payload: String,
    pub read: bool,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub id: String,
    pub sender_id: String,
    pub recipient_id: String,
    pub content_kind: String,
    pub content_body: String,
    pub is_one_time: bool,
    pub reply_to_id: Option<String>,
    pub client_nonce: Option<String>,
}

#[derive(Debug, Clone)]
pub struct MessageRow {
    pub seq: i64,
    pub id: String,
    pub sender_id: String,
    pub recipient_id: String,
    pub content_kind: String,
    pub content_body: String,
    pub is_one_time: bool,
    pub viewed_at: Option<String>,
    pub reply_to_id: Option<String>,
    pub read_at: Option<String>,
    pub client_nonce: Option<String>,
    pub created_at: String,
}

/// One row of the conversation list: newest message per peer.
pub struct ConversationHeadRow {
    pub peer_id: String,
    pub message: MessageRow,
    pub unread_count: u32,
}
