//! Direct messages between two users, including one-time ("view once")
//! content.

use tracing::{debug, info};
use uuid::Uuid;

use pulse_db::models::{MessageRow, NewMessage};
use pulse_db::now_timestamp;
use pulse_types::error::PulseError;
use pulse_types::events::GatewayEvent;
use pulse_types::message::{
    ConversationSummary, DeleteScope, DirectMessage, MessageBody, MessageContent, SendOptions,
};
use pulse_types::topic::Topic;

use crate::convert;
use crate::state::AppStateInner;
use crate::store::clamp_limit;

fn decode(row: MessageRow, reader_id: Uuid) -> Result<DirectMessage, PulseError> {
    let id = row.id.clone();
    convert::message(row, reader_id)
        .ok_or_else(|| PulseError::Internal(format!("message {} could not be decoded", id)))
}

fn is_participant(row: &MessageRow, user_id: Uuid) -> bool {
    let user = user_id.to_string();
    row.sender_id == user || row.recipient_id == user
}

async fn fetch_for(state: &AppStateInner, message_id: Uuid, user_id: Uuid) -> Result<MessageRow, PulseError> {
    let row = state
        .store(move |db| db.get_message(&message_id.to_string()))
        .await?
        .filter(|row| is_participant(row, user_id));
    // Non-participants get the same answer as for a missing id
    row.ok_or_else(|| PulseError::not_found(format!("message {}", message_id)))
}

/// Store a message and push it to both sides of the conversation.
///
/// The pair topic carries the recipient's view of the message, so one-time
/// content goes out sealed. The sender gets its own view back.
pub async fn send(
    state: &AppStateInner,
    sender_id: Uuid,
    recipient_id: Uuid,
    content: MessageContent,
    options: SendOptions,
) -> Result<DirectMessage, PulseError> {
    content.validate()?;
    if recipient_id.is_nil() {
        return Err(PulseError::validation("recipient_id must not be empty"));
    }
    if sender_id == recipient_id {
        return Err(PulseError::validation("cannot send a message to yourself"));
    }

    let new = NewMessage {
        id: Uuid::new_v4().to_string(),
        sender_id: sender_id.to_string(),
        recipient_id: recipient_id.to_string(),
        content_kind: content.kind_str().to_string(),
        content_body: content.body().to_string(),
        is_one_time: options.is_one_time,
        reply_to_id: options.reply_to_id.map(|id| id.to_string()),
        client_nonce: options.client_nonce,
    };

    let row = state
        .store(move |db| {
            if let Some(reply_id) = &new.reply_to_id {
                let same_pair = db.get_message(reply_id)?.is_some_and(|parent| {
                    (parent.sender_id == new.sender_id && parent.recipient_id == new.recipient_id)
                        || (parent.sender_id == new.recipient_id && parent.recipient_id == new.sender_id)
                });
                if !same_pair {
                    return Ok(Err(PulseError::validation(
                        "reply_to_id must reference a message in this conversation",
                    )));
                }
            }
            Ok(Ok(db.insert_message(&new)?))
        })
        .await??;

    let for_recipient = decode(row.clone(), recipient_id)?;
    let for_sender = decode(row, sender_id)?;

    let topic = Topic::direct_messages(sender_id, recipient_id);
    let delivered = state.dispatcher.publish(
        &topic,
        GatewayEvent::DirectMessageCreate {
            message: for_recipient,
        },
    );
    state.dispatcher.publish(
        &Topic::Notifications(recipient_id),
        GatewayEvent::ConversationUpdate {
            peer_id: sender_id,
            message_id: for_sender.id,
        },
    );
    debug!(
        "Message {} on {} delivered to {} live subscribers",
        for_sender.id, topic, delivered
    );

    Ok(for_sender)
}

/// One message as `reader_id` may see it.
pub async fn get(state: &AppStateInner, message_id: Uuid, reader_id: Uuid) -> Result<DirectMessage, PulseError> {
    let row = fetch_for(state, message_id, reader_id).await?;
    decode(row, reader_id)
}

/// Open a message.
///
/// For one-time messages exactly one call by the recipient wins the
/// transition and receives the content; every later call gets
/// [`PulseError::Conflict`]. Regular messages are returned as-is.
pub async fn view(state: &AppStateInner, message_id: Uuid, viewer_id: Uuid) -> Result<DirectMessage, PulseError> {
    let row = fetch_for(state, message_id, viewer_id).await?;
    if !row.is_one_time || row.recipient_id != viewer_id.to_string() {
        return decode(row, viewer_id);
    }

    let viewed_at = now_timestamp();
    let id = row.id.clone();
    let stamp = viewed_at.clone();
    let won = state
        .store(move |db| db.mark_message_viewed(&id, &viewer_id.to_string(), &stamp))
        .await?;
    if !won {
        return Err(PulseError::Conflict(format!("message {} was already viewed", message_id)));
    }

    let content = MessageContent::from_parts(&row.content_kind, row.content_body.clone())
        .ok_or_else(|| PulseError::Internal(format!("message {} has unknown content kind", message_id)))?;
    let mut message = decode(row, viewer_id)?;
    message.viewed_at = convert::parse_timestamp(&viewed_at);
    message.body = MessageBody::Visible { content };

    if let Some(viewed_at) = message.viewed_at {
        state.dispatcher.publish(
            &Topic::direct_messages(message.sender_id, message.recipient_id),
            GatewayEvent::DirectMessageViewed { message_id, viewed_at },
        );
    }
    info!("One-time message {} viewed by {}", message_id, viewer_id);
    Ok(message)
}

/// Oldest first. `before` pages back through older history.
pub async fn list_conversation(
    state: &AppStateInner,
    reader_id: Uuid,
    peer_id: Uuid,
    limit: Option<u32>,
    before: Option<i64>,
) -> Result<Vec<DirectMessage>, PulseError> {
    let limit = clamp_limit(limit);
    let rows = state
        .store(move |db| db.list_conversation(&reader_id.to_string(), &peer_id.to_string(), limit, before))
        .await?;
    Ok(convert::messages(rows, reader_id))
}

/// Latest message and unread count per peer, most recently active first.
pub async fn list_conversations(state: &AppStateInner, user_id: Uuid) -> Result<Vec<ConversationSummary>, PulseError> {
    let heads = state
        .store(move |db| db.list_conversation_heads(&user_id.to_string()))
        .await?;

    Ok(heads
        .into_iter()
        .filter_map(|head| {
            let peer_id = head.peer_id.parse().ok()?;
            Some(ConversationSummary {
                peer_id,
                last_message: convert::message(head.message, user_id)?,
                unread_count: head.unread_count,
            })
        })
        .collect())
}

/// Mark everything `peer_id` sent `reader_id` as read. Returns the number of
/// messages that flipped.
pub async fn mark_conversation_read(
    state: &AppStateInner,
    reader_id: Uuid,
    peer_id: Uuid,
) -> Result<usize, PulseError> {
    let read_at = now_timestamp();
    let count = state
        .store(move |db| db.mark_conversation_read(&reader_id.to_string(), &peer_id.to_string(), &read_at))
        .await?;

    if count > 0 {
        state.dispatcher.publish(
            &Topic::direct_messages(reader_id, peer_id),
            GatewayEvent::ConversationRead {
                reader_id,
                peer_id,
                count,
            },
        );
    }
    Ok(count)
}

pub async fn delete(
    state: &AppStateInner,
    message_id: Uuid,
    requester_id: Uuid,
    scope: DeleteScope,
) -> Result<(), PulseError> {
    if scope == DeleteScope::Me {
        return Err(PulseError::NotImplemented("delete for me".into()));
    }

    let row = fetch_for(state, message_id, requester_id).await?;
    if row.sender_id != requester_id.to_string() {
        return Err(PulseError::Forbidden("only the sender can delete a message".into()));
    }
    let recipient_id: Uuid = row
        .recipient_id
        .parse()
        .map_err(|_| PulseError::Internal(format!("message {} has a corrupt recipient", message_id)))?;

    let deleted = state
        .store(move |db| db.delete_message_by_sender(&message_id.to_string(), &requester_id.to_string()))
        .await?;
    if !deleted {
        return Err(PulseError::not_found(format!("message {}", message_id)));
    }

    state.dispatcher.publish(
        &Topic::direct_messages(requester_id, recipient_id),
        GatewayEvent::DirectMessageDelete { message_id },
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_support;

    fn text(body: &str) -> MessageContent {
        MessageContent::text(body)
    }

    fn one_time() -> SendOptions {
        SendOptions {
            is_one_time: true,
            ..SendOptions::default()
        }
    }

    #[tokio::test]
    async fn send_rejects_empty_and_self_messages() {
        let state = test_support::state();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();

        let err = send(&state, alice, bob, text("   "), SendOptions::default()).await.unwrap_err();
        assert!(matches!(err, PulseError::Validation(_)));

        let err = send(&state, alice, alice, text("hi me"), SendOptions::default()).await.unwrap_err();
        assert!(matches!(err, PulseError::Validation(_)));
    }

    #[tokio::test]
    async fn replies_must_stay_in_the_conversation() {
        let state = test_support::state();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let carol = Uuid::new_v4();

        let parent = send(&state, alice, bob, text("hi bob"), SendOptions::default()).await.unwrap();
        let reply = send(
            &state,
            bob,
            alice,
            text("hi alice"),
            SendOptions {
                reply_to_id: Some(parent.id),
                ..SendOptions::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(reply.reply_to_id, Some(parent.id));

        let err = send(
            &state,
            carol,
            alice,
            text("sneaky"),
            SendOptions {
                reply_to_id: Some(parent.id),
                ..SendOptions::default()
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, PulseError::Validation(_)));

        let err = send(
            &state,
            alice,
            bob,
            text("dangling"),
            SendOptions {
                reply_to_id: Some(Uuid::new_v4()),
                ..SendOptions::default()
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, PulseError::Validation(_)));
    }

    #[tokio::test]
    async fn one_time_messages_are_sealed_for_the_recipient_until_viewed() {
        let state = test_support::state();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let mut pair = state.dispatcher.subscribe(Topic::direct_messages(alice, bob));

        let sent = send(&state, alice, bob, text("secret"), one_time()).await.unwrap();
        assert_eq!(sent.body.content(), Some(&text("secret")));

        match pair.recv().await.unwrap().event {
            GatewayEvent::DirectMessageCreate { message } => assert_eq!(message.body, MessageBody::Sealed),
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(get(&state, sent.id, bob).await.unwrap().body, MessageBody::Sealed);

        let opened = view(&state, sent.id, bob).await.unwrap();
        assert_eq!(opened.body.content(), Some(&text("secret")));
        assert!(opened.viewed_at.is_some());

        let again = view(&state, sent.id, bob).await.unwrap_err();
        assert!(matches!(again, PulseError::Conflict(_)));

        assert_eq!(get(&state, sent.id, bob).await.unwrap().body, MessageBody::Viewed);
        assert_eq!(get(&state, sent.id, alice).await.unwrap().body, MessageBody::Viewed);
    }

    #[tokio::test]
    async fn outsiders_cannot_see_or_view_messages() {
        let state = test_support::state();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let mallory = Uuid::new_v4();
        let sent = send(&state, alice, bob, text("secret"), one_time()).await.unwrap();

        assert!(matches!(view(&state, sent.id, mallory).await, Err(PulseError::NotFound(_))));
        assert!(matches!(get(&state, sent.id, mallory).await, Err(PulseError::NotFound(_))));
        // Still unopened for the real recipient
        assert!(view(&state, sent.id, bob).await.is_ok());
    }

    #[tokio::test]
    async fn delete_rules() {
        let state = test_support::state();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let sent = send(&state, alice, bob, text("oops"), SendOptions::default()).await.unwrap();

        assert!(matches!(
            delete(&state, sent.id, bob, DeleteScope::Everyone).await,
            Err(PulseError::Forbidden(_))
        ));
        assert!(matches!(
            delete(&state, sent.id, alice, DeleteScope::Me).await,
            Err(PulseError::NotImplemented(_))
        ));

        let mut pair = state.dispatcher.subscribe(Topic::direct_messages(alice, bob));
        delete(&state, sent.id, alice, DeleteScope::Everyone).await.unwrap();
        assert_eq!(
            pair.recv().await.unwrap().event,
            GatewayEvent::DirectMessageDelete { message_id: sent.id }
        );
        assert!(list_conversation(&state, alice, bob, None, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn conversations_report_unread_counts() {
        let state = test_support::state();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let carol = Uuid::new_v4();

        send(&state, bob, alice, text("one"), SendOptions::default()).await.unwrap();
        send(&state, bob, alice, text("two"), SendOptions::default()).await.unwrap();
        send(&state, alice, carol, text("hey carol"), SendOptions::default()).await.unwrap();

        let summaries = list_conversations(&state, alice).await.unwrap();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].peer_id, carol);
        assert_eq!(summaries[0].unread_count, 0);
        assert_eq!(summaries[1].peer_id, bob);
        assert_eq!(summaries[1].unread_count, 2);

        assert_eq!(mark_conversation_read(&state, alice, bob).await.unwrap(), 2);
        assert_eq!(mark_conversation_read(&state, alice, bob).await.unwrap(), 0);
        let summaries = list_conversations(&state, alice).await.unwrap();
        assert!(summaries.iter().all(|s| s.unread_count == 0));
    }
}
