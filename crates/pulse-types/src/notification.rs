use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::PulseError;

/// Game a notification points at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameRef {
    pub game_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_thumbnail: Option<String>,
}

impl GameRef {
    pub fn new(game_id: impl Into<String>) -> Self {
        Self {
            game_id: game_id.into(),
            game_title: None,
            game_thumbnail: None,
        }
    }

    fn title_or_default(&self) -> &str {
        self.game_title.as_deref().unwrap_or("your game")
    }
}

/// Kind-specific part of a notification payload.
///
/// On the wire this is flattened into the payload object and discriminated by
/// the `type` field. Each variant carries exactly the fields it needs; any
/// `type` this build does not know deserializes to [`NotificationKind::Unknown`]
/// so older readers keep working when new kinds ship.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotificationKind {
    Like {
        #[serde(flatten)]
        game: GameRef,
    },
    Play {
        #[serde(flatten)]
        game: GameRef,
    },
    Save {
        #[serde(flatten)]
        game: GameRef,
    },
    Comment {
        #[serde(flatten)]
        game: GameRef,
        comment_id: String,
    },
    Reply {
        #[serde(flatten)]
        game: GameRef,
        comment_id: String,
    },
    Mention {
        #[serde(flatten)]
        game: GameRef,
        comment_id: String,
    },
    Remix {
        #[serde(flatten)]
        game: GameRef,
    },
    Share {
        #[serde(flatten)]
        game: GameRef,
    },
    Tip {
        amount: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        game_id: Option<String>,
    },
    Follow,
    FriendJoined,
    Milestone {
        milestone: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        count: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        game_id: Option<String>,
    },
    Trending {
        #[serde(flatten)]
        game: GameRef,
    },
    Viral {
        #[serde(flatten)]
        game: GameRef,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        count: Option<u64>,
    },
    Achievement {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        image_url: Option<String>,
    },
    Streak {
        count: u64,
    },
    Featured {
        #[serde(flatten)]
        game: GameRef,
    },
    Monetization {
        amount: f64,
    },
    Payout {
        amount: f64,
    },
    Warning,
    Broadcast {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        image_url: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        video_url: Option<String>,
    },
    Welcome,
    System,
    #[serde(other)]
    Unknown,
}

/// Fieldless discriminant of [`NotificationKind`], used as a grouping key and
/// for string-based lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    Like,
    Play,
    Save,
    Comment,
    Reply,
    Mention,
    Remix,
    Share,
    Tip,
    Follow,
    FriendJoined,
    Milestone,
    Trending,
    Viral,
    Achievement,
    Streak,
    Featured,
    Monetization,
    Payout,
    Warning,
    Broadcast,
    Welcome,
    System,
    Unknown,
}

impl NotificationType {
    pub const ALL: [NotificationType; 24] = [
        Self::Like,
        Self::Play,
        Self::Save,
        Self::Comment,
        Self::Reply,
        Self::Mention,
        Self::Remix,
        Self::Share,
        Self::Tip,
        Self::Follow,
        Self::FriendJoined,
        Self::Milestone,
        Self::Trending,
        Self::Viral,
        Self::Achievement,
        Self::Streak,
        Self::Featured,
        Self::Monetization,
        Self::Payout,
        Self::Warning,
        Self::Broadcast,
        Self::Welcome,
        Self::System,
        Self::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Like => "like",
            Self::Play => "play",
            Self::Save => "save",
            Self::Comment => "comment",
            Self::Reply => "reply",
            Self::Mention => "mention",
            Self::Remix => "remix",
            Self::Share => "share",
            Self::Tip => "tip",
            Self::Follow => "follow",
            Self::FriendJoined => "friend_joined",
            Self::Milestone => "milestone",
            Self::Trending => "trending",
            Self::Viral => "viral",
            Self::Achievement => "achievement",
            Self::Streak => "streak",
            Self::Featured => "featured",
            Self::Monetization => "monetization",
            Self::Payout => "payout",
            Self::Warning => "warning",
            Self::Broadcast => "broadcast",
            Self::Welcome => "welcome",
            Self::System => "system",
            Self::Unknown => "unknown",
        }
    }

    pub fn category(&self) -> NotificationCategory {
        use NotificationCategory::*;
        match self {
            Self::Like
            | Self::Play
            | Self::Save
            | Self::Comment
            | Self::Reply
            | Self::Mention
            | Self::Remix
            | Self::Share
            | Self::Tip => Engagement,
            Self::Follow | Self::FriendJoined => Followers,
            Self::Milestone
            | Self::Trending
            | Self::Viral
            | Self::Achievement
            | Self::Streak
            | Self::Featured => Milestones,
            Self::Monetization
            | Self::Payout
            | Self::Warning
            | Self::Broadcast
            | Self::Welcome
            | Self::System
            | Self::Unknown => System,
        }
    }

    pub fn priority(&self) -> NotificationPriority {
        use NotificationPriority::*;
        match self {
            Self::Trending | Self::Viral | Self::Milestone | Self::Monetization | Self::Warning => {
                High
            }
            Self::Follow | Self::Comment | Self::Mention | Self::Achievement => Medium,
            _ => Low,
        }
    }

    /// Low-signal kinds that may be collapsed into a single feed entry.
    pub fn is_groupable(&self) -> bool {
        matches!(self, Self::Like | Self::Play | Self::Save)
    }

    /// Kinds an ordinary user causes by acting on someone else's content.
    /// Everything else is issued by the platform.
    pub fn is_user_action(&self) -> bool {
        matches!(
            self,
            Self::Like
                | Self::Play
                | Self::Save
                | Self::Comment
                | Self::Reply
                | Self::Mention
                | Self::Remix
                | Self::Share
                | Self::Tip
                | Self::Follow
        )
    }
}

impl fmt::Display for NotificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationType {
    type Err = PulseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| PulseError::validation(format!("unknown notification type '{}'", s)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationCategory {
    Engagement,
    Followers,
    Milestones,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationPriority {
    Low,
    Medium,
    High,
}

/// Category of a notification kind.
pub fn categorize(kind: &NotificationKind) -> NotificationCategory {
    kind.notification_type().category()
}

/// Category of a raw `type` string. Strings outside the known taxonomy land
/// in [`NotificationCategory::System`].
pub fn categorize_type(type_name: &str) -> NotificationCategory {
    type_name
        .parse::<NotificationType>()
        .map(|t| t.category())
        .unwrap_or(NotificationCategory::System)
}

pub fn priority(kind: &NotificationKind) -> NotificationPriority {
    kind.notification_type().priority()
}

impl NotificationKind {
    pub fn notification_type(&self) -> NotificationType {
        match self {
            Self::Like { .. } => NotificationType::Like,
            Self::Play { .. } => NotificationType::Play,
            Self::Save { .. } => NotificationType::Save,
            Self::Comment { .. } => NotificationType::Comment,
            Self::Reply { .. } => NotificationType::Reply,
            Self::Mention { .. } => NotificationType::Mention,
            Self::Remix { .. } => NotificationType::Remix,
            Self::Share { .. } => NotificationType::Share,
            Self::Tip { .. } => NotificationType::Tip,
            Self::Follow => NotificationType::Follow,
            Self::FriendJoined => NotificationType::FriendJoined,
            Self::Milestone { .. } => NotificationType::Milestone,
            Self::Trending { .. } => NotificationType::Trending,
            Self::Viral { .. } => NotificationType::Viral,
            Self::Achievement { .. } => NotificationType::Achievement,
            Self::Streak { .. } => NotificationType::Streak,
            Self::Featured { .. } => NotificationType::Featured,
            Self::Monetization { .. } => NotificationType::Monetization,
            Self::Payout { .. } => NotificationType::Payout,
            Self::Warning => NotificationType::Warning,
            Self::Broadcast { .. } => NotificationType::Broadcast,
            Self::Welcome => NotificationType::Welcome,
            Self::System => NotificationType::System,
            Self::Unknown => NotificationType::Unknown,
        }
    }

    /// The resource this notification is about, if any. Part of the grouping key.
    pub fn target_id(&self) -> Option<&str> {
        match self {
            Self::Like { game }
            | Self::Play { game }
            | Self::Save { game }
            | Self::Remix { game }
            | Self::Share { game }
            | Self::Trending { game }
            | Self::Viral { game, .. }
            | Self::Featured { game } => Some(&game.game_id),
            Self::Comment { comment_id, .. }
            | Self::Reply { comment_id, .. }
            | Self::Mention { comment_id, .. } => Some(comment_id),
            Self::Tip { game_id, .. } | Self::Milestone { game_id, .. } => game_id.as_deref(),
            _ => None,
        }
    }

    pub fn game(&self) -> Option<&GameRef> {
        match self {
            Self::Like { game }
            | Self::Play { game }
            | Self::Save { game }
            | Self::Remix { game }
            | Self::Share { game }
            | Self::Trending { game }
            | Self::Viral { game, .. }
            | Self::Featured { game }
            | Self::Comment { game, .. }
            | Self::Reply { game, .. }
            | Self::Mention { game, .. } => Some(game),
            _ => None,
        }
    }

    /// Checks the invariants serde cannot express: known kind, non-empty ids,
    /// finite amounts.
    pub fn validate(&self) -> Result<(), PulseError> {
        if let Self::Unknown = self {
            return Err(PulseError::validation("unknown notification type"));
        }
        if let Some(game) = self.game() {
            if game.game_id.trim().is_empty() {
                return Err(PulseError::validation("game_id must not be empty"));
            }
        }
        match self {
            Self::Comment { comment_id, .. }
            | Self::Reply { comment_id, .. }
            | Self::Mention { comment_id, .. }
                if comment_id.trim().is_empty() =>
            {
                Err(PulseError::validation("comment_id must not be empty"))
            }
            Self::Tip { amount, .. } | Self::Monetization { amount } | Self::Payout { amount }
                if !amount.is_finite() || *amount < 0.0 =>
            {
                Err(PulseError::validation("amount must be a non-negative number"))
            }
            _ => Ok(()),
        }
    }

    /// Display text used when the producer does not supply one.
    pub fn default_content(&self, actor: Option<&str>) -> String {
        let who = actor.unwrap_or("Someone");
        match self {
            Self::Like { game } => format!("{} liked {}", who, game.title_or_default()),
            Self::Play { game } => format!("{} played {}", who, game.title_or_default()),
            Self::Save { game } => format!("{} saved {}", who, game.title_or_default()),
            Self::Comment { game, .. } => {
                format!("{} commented on {}", who, game.title_or_default())
            }
            Self::Reply { .. } => format!("{} replied to your comment", who),
            Self::Mention { .. } => format!("{} mentioned you", who),
            Self::Remix { game } => format!("{} remixed {}", who, game.title_or_default()),
            Self::Share { game } => format!("{} shared {}", who, game.title_or_default()),
            Self::Tip { amount, .. } => format!("{} sent you a tip of {:.2}", who, amount),
            Self::Follow => format!("{} started following you", who),
            Self::FriendJoined => format!("{} joined the arcade", who),
            Self::Milestone { milestone, .. } => format!("You reached {} plays!", milestone),
            Self::Trending { game } => format!("{} is trending", game.title_or_default()),
            Self::Viral { game, .. } => format!("{} is going viral", game.title_or_default()),
            Self::Achievement { .. } => "You unlocked an achievement".to_string(),
            Self::Streak { count } => format!("{} day streak!", count),
            Self::Featured { game } => format!("{} was featured", game.title_or_default()),
            Self::Monetization { amount } => format!("You earned {:.2}", amount),
            Self::Payout { amount } => format!("Payout of {:.2} is on its way", amount),
            Self::Warning => "Your account received a warning".to_string(),
            Self::Broadcast { .. } => "New announcement".to_string(),
            Self::Welcome => "Welcome aboard!".to_string(),
            Self::System | Self::Unknown => "You have a new notification".to_string(),
        }
    }
}

/// Wire payload of a notification.
///
/// Unknown fields are ignored on input so newer producers can add fields
/// without breaking older consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationPayload {
    #[serde(flatten)]
    pub kind: NotificationKind,
    pub content: String,
    #[serde(default)]
    pub read: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

impl NotificationPayload {
    pub fn new(kind: NotificationKind, content: impl Into<String>) -> Self {
        Self {
            kind,
            content: content.into(),
            read: false,
            username: None,
            avatar_url: None,
        }
    }

    pub fn with_actor(mut self, username: impl Into<String>, avatar_url: Option<String>) -> Self {
        self.username = Some(username.into());
        self.avatar_url = avatar_url;
        self
    }

    pub fn validate(&self) -> Result<(), PulseError> {
        self.kind.validate()?;
        if self.content.trim().is_empty() {
            return Err(PulseError::validation("content must not be empty"));
        }
        Ok(())
    }
}

/// A recipient-addressed record describing one interaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub id: Uuid,
    pub recipient_id: Uuid,
    /// Store-assigned, strictly increasing. Orders the feed and doubles as
    /// the pagination cursor.
    pub seq: i64,
    pub created_at: DateTime<Utc>,
    pub payload: NotificationPayload,
}

impl NotificationEvent {
    pub fn notification_type(&self) -> NotificationType {
        self.payload.kind.notification_type()
    }

    pub fn category(&self) -> NotificationCategory {
        categorize(&self.payload.kind)
    }
}
