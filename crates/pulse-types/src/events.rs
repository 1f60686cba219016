use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::message::DirectMessage;
use crate::notification::NotificationEvent;
use crate::topic::Topic;

/// One viewer in a presence snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceViewer {
    pub session_key: String,
    pub joined_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Events pushed to subscribers of a topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server confirms the socket is authenticated
    Ready { user_id: Uuid },

    /// A notification was stored for the topic owner
    NotificationCreate { notification: NotificationEvent },

    NotificationRead { id: Uuid },

    NotificationsAllRead { count: usize },

    NotificationDelete { id: Uuid },

    NotificationsCleared { count: usize },

    /// Full membership of a presence channel after a join, leave or expiry
    PresenceSync {
        channel_key: String,
        viewers: Vec<PresenceViewer>,
        count: usize,
    },

    /// New comment activity on a resource
    CommentActivity {
        resource_id: String,
        comment_id: String,
        username: Option<String>,
        content: String,
    },

    /// A direct message was stored. One-time content is already redacted.
    DirectMessageCreate { message: DirectMessage },

    DirectMessageViewed {
        message_id: Uuid,
        viewed_at: DateTime<Utc>,
    },

    DirectMessageDelete { message_id: Uuid },

    /// `reader_id` read everything `peer_id` sent them
    ConversationRead {
        reader_id: Uuid,
        peer_id: Uuid,
        count: usize,
    },

    /// Inbox hint sent to the recipient's personal topic
    ConversationUpdate { peer_id: Uuid, message_id: Uuid },
}

/// Envelope for everything the delivery layer hands out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delivery {
    pub topic: Topic,
    /// Strictly increasing within `topic`. Not comparable across topics.
    pub seq: u64,
    pub event: GatewayEvent,
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Start receiving deliveries for these topics
    Subscribe { topics: Vec<Topic> },

    Unsubscribe { topics: Vec<Topic> },

    /// Join a presence channel as this connection's session
    PresenceJoin {
        channel_key: String,
        #[serde(default)]
        metadata: serde_json::Value,
    },

    PresenceLeave { channel_key: String },

    /// Keep this connection's presence sessions alive
    PresenceHeartbeat,
}
