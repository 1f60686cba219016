use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::PulseError;

/// A delivery stream clients can subscribe to.
///
/// String form: `notifications:{user}`, `presence:{channel_key}`,
/// `comments:{resource}`, `directmessages:{a}:{b}` where `a <= b`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Topic {
    Notifications(Uuid),
    Presence(String),
    Comments(String),
    DirectMessages(ConversationKey),
}

/// Unordered pair of user ids identifying a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConversationKey {
    low: Uuid,
    high: Uuid,
}

impl ConversationKey {
    pub fn new(a: Uuid, b: Uuid) -> Self {
        if a <= b {
            Self { low: a, high: b }
        } else {
            Self { low: b, high: a }
        }
    }

    pub fn contains(&self, user_id: Uuid) -> bool {
        self.low == user_id || self.high == user_id
    }

    /// The participant that is not `user_id`.
    pub fn peer_of(&self, user_id: Uuid) -> Option<Uuid> {
        if self.low == user_id {
            Some(self.high)
        } else if self.high == user_id {
            Some(self.low)
        } else {
            None
        }
    }

    pub fn members(&self) -> (Uuid, Uuid) {
        (self.low, self.high)
    }
}

impl Topic {
    pub fn direct_messages(a: Uuid, b: Uuid) -> Self {
        Self::DirectMessages(ConversationKey::new(a, b))
    }

    /// Whether `user_id` may receive this topic's deliveries. Personal
    /// streams are private to their owners; resource streams are public.
    pub fn is_visible_to(&self, user_id: Uuid) -> bool {
        match self {
            Self::Notifications(owner) => *owner == user_id,
            Self::DirectMessages(key) => key.contains(user_id),
            Self::Presence(_) | Self::Comments(_) => true,
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Notifications(user) => write!(f, "notifications:{}", user),
            Self::Presence(key) => write!(f, "presence:{}", key),
            Self::Comments(resource) => write!(f, "comments:{}", resource),
            Self::DirectMessages(key) => write!(f, "directmessages:{}:{}", key.low, key.high),
        }
    }
}

impl FromStr for Topic {
    type Err = PulseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || PulseError::validation(format!("malformed topic '{}'", s));
        let (scope, rest) = s.split_once(':').ok_or_else(bad)?;
        if rest.is_empty() {
            return Err(bad());
        }

        match scope {
            "notifications" => Ok(Self::Notifications(rest.parse().map_err(|_| bad())?)),
            // presence channel keys may themselves contain ':' (e.g. "watch:game123")
            "presence" => Ok(Self::Presence(rest.to_string())),
            "comments" => Ok(Self::Comments(rest.to_string())),
            "directmessages" => {
                let (a, b) = rest.split_once(':').ok_or_else(bad)?;
                let a: Uuid = a.parse().map_err(|_| bad())?;
                let b: Uuid = b.parse().map_err(|_| bad())?;
                Ok(Self::direct_messages(a, b))
            }
            _ => Err(bad()),
        }
    }
}

impl TryFrom<String> for Topic {
    type Error = PulseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Topic> for String {
    fn from(topic: Topic) -> Self {
        topic.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversation_key_is_unordered() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert_eq!(Topic::direct_messages(a, b), Topic::direct_messages(b, a));
        assert_eq!(
            Topic::direct_messages(a, b).to_string(),
            Topic::direct_messages(b, a).to_string()
        );
    }

    #[test]
    fn parses_what_it_prints() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        for topic in [
            Topic::Notifications(a),
            Topic::Presence("watch:game123".into()),
            Topic::Comments("game123".into()),
            Topic::direct_messages(a, b),
        ] {
            assert_eq!(topic.to_string().parse::<Topic>().unwrap(), topic);
        }
    }

    #[test]
    fn rejects_malformed_topics() {
        for raw in ["", "notifications", "notifications:", "notifications:nope", "chat:1", "directmessages:x"] {
            assert!(raw.parse::<Topic>().is_err(), "{}", raw);
        }
    }

    #[test]
    fn private_topics_are_owner_only() {
        let me = Uuid::new_v4();
        let other = Uuid::new_v4();
        assert!(Topic::Notifications(me).is_visible_to(me));
        assert!(!Topic::Notifications(me).is_visible_to(other));
        assert!(Topic::direct_messages(me, other).is_visible_to(other));
        assert!(!Topic::direct_messages(me, other).is_visible_to(Uuid::new_v4()));
        assert!(Topic::Presence("watch:g".into()).is_visible_to(other));
    }
}
