//! Producer-facing entry points. Other services call these (or the matching
//! HTTP routes) when an interaction happens.

use tracing::{info, warn};
use uuid::Uuid;

use pulse_types::api::{BroadcastResponse, Claims};
use pulse_types::error::PulseError;
use pulse_types::events::GatewayEvent;
use pulse_types::notification::{NotificationEvent, NotificationKind, NotificationPayload};
use pulse_types::topic::Topic;

use crate::state::AppStateInner;
use crate::store;

/// Emit one notification to `recipient_id`, attributed to `actor` when given.
///
/// Comment kinds also produce a `CommentActivity` delivery on the game's
/// comment topic so open comment panels update live.
pub async fn notify(
    state: &AppStateInner,
    actor: Option<&Claims>,
    recipient_id: Uuid,
    kind: NotificationKind,
    content: Option<String>,
) -> Result<NotificationEvent, PulseError> {
    let username = actor.map(|claims| claims.username.as_str());
    let content = content
        .filter(|text| !text.trim().is_empty())
        .unwrap_or_else(|| kind.default_content(username));

    let mut payload = NotificationPayload::new(kind, content);
    if let Some(claims) = actor {
        payload = payload.with_actor(claims.username.clone(), claims.avatar_url.clone());
    }

    let event = store::create(state, recipient_id, payload).await?;

    if let NotificationKind::Comment { game, comment_id } = &event.payload.kind {
        state.dispatcher.publish(
            &Topic::Comments(game.game_id.clone()),
            GatewayEvent::CommentActivity {
                resource_id: game.game_id.clone(),
                comment_id: comment_id.clone(),
                username: event.payload.username.clone(),
                content: event.payload.content.clone(),
            },
        );
    }

    Ok(event)
}

/// Send a system announcement to every known user.
///
/// Walks the user directory page by page and hands each page to
/// [`store::batch_create`]. Failed batches are skipped, so `sent` can come
/// back lower than `total`.
pub async fn broadcast(
    state: &AppStateInner,
    message: String,
    image_url: Option<String>,
    video_url: Option<String>,
) -> Result<BroadcastResponse, PulseError> {
    if message.trim().is_empty() {
        return Err(PulseError::validation("broadcast message must not be empty"));
    }

    let page_size = state.config.broadcast_batch_size.max(1) as u32;
    let payload = NotificationPayload::new(NotificationKind::Broadcast { image_url, video_url }, message);

    let mut result = BroadcastResponse { sent: 0, total: 0 };
    let mut after: Option<String> = None;
    loop {
        let cursor = after.clone();
        let ids = state
            .store(move |db| db.user_ids_page(cursor.as_deref(), page_size))
            .await?;
        let Some(last) = ids.last().cloned() else {
            break;
        };

        let mut items = Vec::with_capacity(ids.len());
        for raw in &ids {
            match raw.parse::<Uuid>() {
                Ok(id) => items.push((id, payload.clone())),
                Err(e) => {
                    warn!("Skipping corrupt user id '{}' in broadcast: {}", raw, e);
                    result.total += 1;
                }
            }
        }

        let page = store::batch_create(state, items).await?;
        result.sent += page.sent;
        result.total += page.total;

        if ids.len() < page_size as usize {
            break;
        }
        after = Some(last);
    }

    info!("Broadcast delivered to {}/{} users", result.sent, result.total);
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_support;
    use pulse_types::notification::GameRef;

    fn claims(username: &str) -> Claims {
        Claims {
            sub: Uuid::new_v4(),
            username: username.into(),
            avatar_url: Some("https://cdn.example/a.png".into()),
            admin: false,
            exp: usize::MAX,
        }
    }

    #[tokio::test]
    async fn notify_fills_content_and_actor() {
        let state = test_support::state();
        let actor = claims("ada");
        let recipient = Uuid::new_v4();

        let event = notify(&state, Some(&actor), recipient, NotificationKind::Follow, None)
            .await
            .unwrap();
        assert_eq!(event.payload.content, "ada started following you");
        assert_eq!(event.payload.username.as_deref(), Some("ada"));
        assert!(event.payload.avatar_url.is_some());
    }

    #[tokio::test]
    async fn comment_notifications_reach_the_comment_topic() {
        let state = test_support::state();
        let actor = claims("grace");
        let mut comments = state.dispatcher.subscribe(Topic::Comments("g42".into()));

        notify(
            &state,
            Some(&actor),
            Uuid::new_v4(),
            NotificationKind::Comment {
                game: GameRef::new("g42"),
                comment_id: "c1".into(),
            },
            Some("nice level".into()),
        )
        .await
        .unwrap();

        match comments.recv().await.unwrap().event {
            GatewayEvent::CommentActivity {
                resource_id,
                comment_id,
                username,
                content,
            } => {
                assert_eq!(resource_id, "g42");
                assert_eq!(comment_id, "c1");
                assert_eq!(username.as_deref(), Some("grace"));
                assert_eq!(content, "nice level");
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn empty_broadcast_is_rejected() {
        let state = test_support::state();
        let err = broadcast(&state, "   ".into(), None, None).await.unwrap_err();
        assert!(matches!(err, PulseError::Validation(_)));
    }
}
