use chrono::{DateTime, Utc};
use tracing::{debug, trace};
use uuid::Uuid;

use pulse_types::events::GatewayEvent;
use pulse_types::message::{DirectMessage, MessageBody, MessageContent};

/// A message the user sent that the server has not confirmed yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMessage {
    pub client_nonce: String,
    pub content: MessageContent,
    pub is_one_time: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationEntry<'a> {
    Delivered(&'a DirectMessage),
    Pending(&'a PendingMessage),
}

/// One side's view of a two-person conversation.
///
/// Delivered messages are kept in `seq` order; optimistic sends sit after
/// them until the server echoes them back with the same `client_nonce`.
#[derive(Debug)]
pub struct ConversationView {
    me: Uuid,
    peer: Uuid,
    messages: Vec<DirectMessage>,
    pending: Vec<PendingMessage>,
}

impl ConversationView {
    pub fn new(me: Uuid, peer: Uuid) -> Self {
        Self {
            me,
            peer,
            messages: Vec::new(),
            pending: Vec::new(),
        }
    }

    pub fn peer(&self) -> Uuid {
        self.peer
    }

    /// Show a message right away, before the send request completes.
    pub fn push_optimistic(
        &mut self,
        client_nonce: impl Into<String>,
        content: MessageContent,
        is_one_time: bool,
    ) -> &PendingMessage {
        let idx = self.pending.len();
        self.pending.push(PendingMessage {
            client_nonce: client_nonce.into(),
            content,
            is_one_time,
            created_at: Utc::now(),
        });
        &self.pending[idx]
    }

    /// Drop a pending send that failed and hand its content back so the
    /// compose box can be refilled.
    pub fn fail(&mut self, client_nonce: &str) -> Option<MessageContent> {
        let idx = self.pending.iter().position(|p| p.client_nonce == client_nonce)?;
        debug!("Send {} failed, restoring draft", client_nonce);
        Some(self.pending.remove(idx).content)
    }

    /// Merge a confirmed message, either from the send response or from the
    /// conversation topic. Returns whether anything changed.
    pub fn reconcile(&mut self, mut message: DirectMessage) -> bool {
        if !self.belongs_here(&message) {
            return false;
        }

        if message.sender_id == self.me {
            if let Some(nonce) = message.client_nonce.as_deref() {
                if let Some(idx) = self.pending.iter().position(|p| p.client_nonce == nonce) {
                    let pending = self.pending.remove(idx);
                    // The topic carries the recipient's redacted copy; keep
                    // what we typed until the peer opens it
                    if message.body == MessageBody::Sealed {
                        message.body = MessageBody::Visible {
                            content: pending.content,
                        };
                    }
                }
            }
        }

        match self.messages.iter().position(|m| m.id == message.id) {
            Some(_) => false,
            None => {
                let at = self.messages.partition_point(|m| m.seq < message.seq);
                self.messages.insert(at, message);
                true
            }
        }
    }

    /// Fold one realtime event into the view.
    pub fn apply(&mut self, event: &GatewayEvent) -> bool {
        match event {
            GatewayEvent::DirectMessageCreate { message } => self.reconcile(message.clone()),
            GatewayEvent::DirectMessageViewed { message_id, viewed_at } => {
                match self.messages.iter_mut().find(|m| m.id == *message_id) {
                    Some(message) if message.body != MessageBody::Viewed => {
                        message.body = MessageBody::Viewed;
                        message.viewed_at = Some(*viewed_at);
                        true
                    }
                    _ => false,
                }
            }
            GatewayEvent::DirectMessageDelete { message_id } => {
                let before = self.messages.len();
                self.messages.retain(|m| m.id != *message_id);
                self.messages.len() != before
            }
            GatewayEvent::ConversationRead { reader_id, peer_id, .. } => {
                let (reader, author) = (*reader_id, *peer_id);
                let now = Utc::now();
                let mut changed = false;
                for message in self
                    .messages
                    .iter_mut()
                    .filter(|m| m.sender_id == author && m.recipient_id == reader && m.read_at.is_none())
                {
                    message.read_at = Some(now);
                    changed = true;
                }
                changed
            }
            other => {
                trace!("Conversation ignoring {:?}", other);
                false
            }
        }
    }

    /// Swap in a fresh fetch. Pending sends the server already has are
    /// dropped; the rest stay queued.
    pub fn replace(&mut self, fetched: Vec<DirectMessage>) {
        self.messages.clear();
        for message in fetched {
            self.reconcile(message);
        }
    }

    pub fn messages(&self) -> &[DirectMessage] {
        &self.messages
    }

    pub fn pending(&self) -> &[PendingMessage] {
        &self.pending
    }

    /// Everything to render, confirmed messages first in `seq` order.
    pub fn entries(&self) -> impl Iterator<Item = ConversationEntry<'_>> {
        self.messages
            .iter()
            .map(ConversationEntry::Delivered)
            .chain(self.pending.iter().map(ConversationEntry::Pending))
    }

    fn belongs_here(&self, message: &DirectMessage) -> bool {
        (message.sender_id == self.me && message.recipient_id == self.peer)
            || (message.sender_id == self.peer && message.recipient_id == self.me)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Pair {
        me: Uuid,
        peer: Uuid,
    }

    impl Pair {
        fn new() -> Self {
            Self {
                me: Uuid::new_v4(),
                peer: Uuid::new_v4(),
            }
        }

        fn message(&self, seq: i64, from_me: bool, body: MessageBody, nonce: Option<&str>) -> DirectMessage {
            let (sender_id, recipient_id) = if from_me { (self.me, self.peer) } else { (self.peer, self.me) };
            DirectMessage {
                id: Uuid::new_v4(),
                seq,
                sender_id,
                recipient_id,
                body,
                is_one_time: false,
                viewed_at: None,
                reply_to_id: None,
                read_at: None,
                client_nonce: nonce.map(str::to_string),
                created_at: Utc::now(),
            }
        }
    }

    fn visible(text: &str) -> MessageBody {
        MessageBody::Visible {
            content: MessageContent::text(text),
        }
    }

    #[test]
    fn echo_replaces_the_optimistic_copy() {
        let pair = Pair::new();
        let mut view = ConversationView::new(pair.me, pair.peer);

        view.push_optimistic("n1", MessageContent::text("hi"), false);
        assert_eq!(view.entries().count(), 1);

        let echo = pair.message(1, true, visible("hi"), Some("n1"));
        assert!(view.apply(&GatewayEvent::DirectMessageCreate { message: echo.clone() }));
        // Same message via the HTTP response is a duplicate
        assert!(!view.reconcile(echo));

        assert!(view.pending().is_empty());
        assert_eq!(view.messages().len(), 1);
    }

    #[test]
    fn failed_send_restores_the_draft() {
        let pair = Pair::new();
        let mut view = ConversationView::new(pair.me, pair.peer);
        view.push_optimistic("n1", MessageContent::text("draft text"), false);

        assert_eq!(view.fail("n1"), Some(MessageContent::text("draft text")));
        assert_eq!(view.fail("n1"), None);
        assert_eq!(view.entries().count(), 0);
    }

    #[test]
    fn own_sealed_echo_keeps_local_content() {
        let pair = Pair::new();
        let mut view = ConversationView::new(pair.me, pair.peer);
        view.push_optimistic("n1", MessageContent::text("secret"), true);

        let echo = pair.message(1, true, MessageBody::Sealed, Some("n1"));
        view.reconcile(echo.clone());
        assert_eq!(view.messages()[0].body, visible("secret"));

        let viewed_at = Utc::now();
        assert!(view.apply(&GatewayEvent::DirectMessageViewed {
            message_id: echo.id,
            viewed_at
        }));
        assert_eq!(view.messages()[0].body, MessageBody::Viewed);
    }

    #[test]
    fn delivered_messages_sort_by_seq_and_pending_stays_last() {
        let pair = Pair::new();
        let mut view = ConversationView::new(pair.me, pair.peer);
        view.push_optimistic("n9", MessageContent::text("typing"), false);

        view.reconcile(pair.message(3, false, visible("c"), None));
        view.reconcile(pair.message(1, false, visible("a"), None));
        view.reconcile(pair.message(2, true, visible("b"), None));

        let entries: Vec<_> = view.entries().collect();
        assert_eq!(entries.len(), 4);
        let seqs: Vec<i64> = view.messages().iter().map(|m| m.seq).collect();
        assert_eq!(seqs, [1, 2, 3]);
        assert!(matches!(entries[3], ConversationEntry::Pending(p) if p.client_nonce == "n9"));
    }

    #[test]
    fn messages_from_other_conversations_are_ignored() {
        let pair = Pair::new();
        let other = Pair::new();
        let mut view = ConversationView::new(pair.me, pair.peer);
        assert!(!view.reconcile(other.message(1, true, visible("x"), None)));
    }

    #[test]
    fn peer_reading_marks_my_messages_read() {
        let pair = Pair::new();
        let mut view = ConversationView::new(pair.me, pair.peer);
        view.reconcile(pair.message(1, true, visible("a"), None));
        view.reconcile(pair.message(2, false, visible("b"), None));

        assert!(view.apply(&GatewayEvent::ConversationRead {
            reader_id: pair.peer,
            peer_id: pair.me,
            count: 1
        }));
        assert!(view.messages()[0].read_at.is_some());
        assert!(view.messages()[1].read_at.is_none());
    }

    #[test]
    fn refetch_keeps_unconfirmed_sends() {
        let pair = Pair::new();
        let mut view = ConversationView::new(pair.me, pair.peer);
        view.push_optimistic("landed", MessageContent::text("one"), false);
        view.push_optimistic("in-flight", MessageContent::text("two"), false);

        view.replace(vec![pair.message(1, true, visible("one"), Some("landed"))]);
        assert_eq!(view.messages().len(), 1);
        assert_eq!(view.pending().len(), 1);
        assert_eq!(view.pending()[0].client_nonce, "in-flight");
    }
}
