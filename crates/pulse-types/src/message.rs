use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::PulseError;

/// What a direct message carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessageContent {
    Text { text: String },
    Gif { url: String },
    Image { url: String },
}

impl MessageContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn validate(&self) -> Result<(), PulseError> {
        let (what, value) = match self {
            Self::Text { text } => ("text", text),
            Self::Gif { url } => ("gif url", url),
            Self::Image { url } => ("image url", url),
        };
        if value.trim().is_empty() {
            return Err(PulseError::validation(format!("{} must not be empty", what)));
        }
        Ok(())
    }

    /// Storage discriminant, paired with [`MessageContent::body`].
    pub fn kind_str(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::Gif { .. } => "gif",
            Self::Image { .. } => "image",
        }
    }

    pub fn body(&self) -> &str {
        match self {
            Self::Text { text } => text,
            Self::Gif { url } | Self::Image { url } => url,
        }
    }

    pub fn from_parts(kind: &str, body: String) -> Option<Self> {
        match kind {
            "text" => Some(Self::Text { text: body }),
            "gif" => Some(Self::Gif { url: body }),
            "image" => Some(Self::Image { url: body }),
            _ => None,
        }
    }
}

/// Content as a particular reader is allowed to see it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum MessageBody {
    Visible { content: MessageContent },
    /// One-time message the recipient has not opened yet.
    Sealed,
    /// One-time message that has been opened. Content is gone for everyone.
    Viewed,
}

impl MessageBody {
    /// Read-path redaction for one-time messages.
    ///
    /// Once `viewed_at` is set nobody gets the content back. Before that the
    /// sender still sees what they sent, while the recipient has to go
    /// through the view operation.
    pub fn for_reader(
        content: MessageContent,
        is_one_time: bool,
        viewed_at: Option<DateTime<Utc>>,
        sender_id: Uuid,
        reader_id: Uuid,
    ) -> Self {
        if !is_one_time {
            return Self::Visible { content };
        }
        match viewed_at {
            Some(_) => Self::Viewed,
            None if reader_id == sender_id => Self::Visible { content },
            None => Self::Sealed,
        }
    }

    pub fn content(&self) -> Option<&MessageContent> {
        match self {
            Self::Visible { content } => Some(content),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectMessage {
    pub id: Uuid,
    /// Store-assigned, strictly increasing; conversation order.
    pub seq: i64,
    pub sender_id: Uuid,
    pub recipient_id: Uuid,
    pub body: MessageBody,
    pub is_one_time: bool,
    pub viewed_at: Option<DateTime<Utc>>,
    pub reply_to_id: Option<Uuid>,
    pub read_at: Option<DateTime<Utc>>,
    /// Opaque id chosen by the sending client, echoed back so an optimistic
    /// local copy can be matched with the delivered one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_nonce: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendOptions {
    #[serde(default)]
    pub is_one_time: bool,
    #[serde(default)]
    pub reply_to_id: Option<Uuid>,
    #[serde(default)]
    pub client_nonce: Option<String>,
}

/// Latest message and unread count for one peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub peer_id: Uuid,
    pub last_message: DirectMessage,
    pub unread_count: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteScope {
    #[default]
    Everyone,
    Me,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_messages_are_always_visible() {
        let sender = Uuid::new_v4();
        let body = MessageBody::for_reader(MessageContent::text("hi"), false, None, sender, Uuid::new_v4());
        assert_eq!(body.content(), Some(&MessageContent::text("hi")));
    }

    #[test]
    fn one_time_redaction() {
        let sender = Uuid::new_v4();
        let recipient = Uuid::new_v4();
        let secret = MessageContent::text("secret");

        assert_eq!(
            MessageBody::for_reader(secret.clone(), true, None, sender, recipient),
            MessageBody::Sealed
        );
        assert!(matches!(
            MessageBody::for_reader(secret.clone(), true, None, sender, sender),
            MessageBody::Visible { .. }
        ));

        let viewed = Some(Utc::now());
        for reader in [sender, recipient] {
            assert_eq!(
                MessageBody::for_reader(secret.clone(), true, viewed, sender, reader),
                MessageBody::Viewed
            );
        }
    }

    #[test]
    fn empty_content_is_invalid() {
        assert!(MessageContent::text("   ").validate().is_err());
        assert!(MessageContent::Gif { url: String::new() }.validate().is_err());
        assert!(MessageContent::Image { url: "https://cdn/x.png".into() }.validate().is_ok());
    }

    #[test]
    fn content_storage_parts_round_trip() {
        let gif = MessageContent::Gif { url: "https://g/1.gif".into() };
        let back = MessageContent::from_parts(gif.kind_str(), gif.body().to_string());
        assert_eq!(back, Some(gif));
        assert_eq!(MessageContent::from_parts("video", "x".into()), None);
    }
}
