mod common;

use uuid::Uuid;

use pulse_api::state::ServiceConfig;
use pulse_api::{dm, notify, store};
use pulse_types::error::PulseError;
use pulse_types::events::GatewayEvent;
use pulse_types::message::{MessageBody, MessageContent, SendOptions};
use pulse_types::notification::{NotificationKind, NotificationType};
use pulse_types::topic::Topic;

fn one_time() -> SendOptions {
    SendOptions {
        is_one_time: true,
        ..SendOptions::default()
    }
}

#[tokio::test]
async fn one_time_content_is_shown_exactly_once() {
    let state = common::state();
    let x = Uuid::new_v4();
    let y = Uuid::new_v4();

    let sent = dm::send(&state, x, y, MessageContent::text("secret"), one_time())
        .await
        .unwrap();

    let opened = dm::view(&state, sent.id, y).await.unwrap();
    assert_eq!(opened.body.content(), Some(&MessageContent::text("secret")));

    for reader in [x, y] {
        let fetched = dm::get(&state, sent.id, reader).await.unwrap();
        assert_eq!(fetched.body, MessageBody::Viewed);

        let history = dm::list_conversation(&state, reader, if reader == x { y } else { x }, None, None)
            .await
            .unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].body, MessageBody::Viewed);
    }
    assert!(matches!(dm::view(&state, sent.id, y).await, Err(PulseError::Conflict(_))));
}

#[tokio::test]
async fn concurrent_views_have_a_single_winner() {
    let state = common::state();
    let x = Uuid::new_v4();
    let y = Uuid::new_v4();
    let sent = dm::send(&state, x, y, MessageContent::text("secret"), one_time())
        .await
        .unwrap();

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let state = state.clone();
        tasks.push(tokio::spawn(async move { dm::view(&state, sent.id, y).await }));
    }

    let mut winners = 0;
    let mut conflicts = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(message) => {
                assert_eq!(message.body.content(), Some(&MessageContent::text("secret")));
                winners += 1;
            }
            Err(PulseError::Conflict(_)) => conflicts += 1,
            Err(other) => panic!("unexpected error {:?}", other),
        }
    }
    assert_eq!(winners, 1);
    assert_eq!(conflicts, 7);
}

#[tokio::test]
async fn broadcast_reaches_every_user_in_bounded_batches() {
    let state = common::state_with(ServiceConfig {
        broadcast_batch_size: 100,
        ..ServiceConfig::default()
    });

    let mut users = Vec::new();
    for i in 0..250 {
        let id = Uuid::new_v4();
        let name = format!("user{}", i);
        state
            .store(move |db| db.upsert_user(&id.to_string(), &name, None))
            .await
            .unwrap();
        users.push(id);
    }

    let result = notify::broadcast(
        &state,
        "Welcome!".into(),
        Some("https://cdn.example/welcome.png".into()),
        None,
    )
    .await
    .unwrap();
    assert_eq!(result.sent, 250);
    assert_eq!(result.total, 250);

    for id in users {
        let feed = store::list(&state, id, None, None).await.unwrap();
        assert_eq!(feed.len(), 1);
        assert_eq!(feed[0].notification_type(), NotificationType::Broadcast);
        match &feed[0].payload.kind {
            NotificationKind::Broadcast { image_url, .. } => {
                assert_eq!(image_url.as_deref(), Some("https://cdn.example/welcome.png"));
            }
            other => panic!("unexpected kind {:?}", other),
        }
        assert_eq!(feed[0].payload.content, "Welcome!");
    }
}

#[tokio::test]
async fn broadcast_with_an_empty_directory_sends_nothing() {
    let state = common::state();
    let result = notify::broadcast(&state, "hello".into(), None, None).await.unwrap();
    assert_eq!((result.sent, result.total), (0, 0));
}

#[tokio::test]
async fn conversation_history_is_oldest_first_and_pages_back() {
    let state = common::state();
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();

    for i in 0..6 {
        let (from, to) = if i % 2 == 0 { (a, b) } else { (b, a) };
        dm::send(&state, from, to, MessageContent::text(format!("m{}", i)), SendOptions::default())
            .await
            .unwrap();
    }

    let latest = dm::list_conversation(&state, a, b, Some(4), None).await.unwrap();
    let texts: Vec<_> = latest
        .iter()
        .map(|m| m.body.content().unwrap().body().to_string())
        .collect();
    assert_eq!(texts, ["m2", "m3", "m4", "m5"]);
    assert!(latest.windows(2).all(|w| w[0].seq < w[1].seq));

    let older = dm::list_conversation(&state, b, a, Some(4), Some(latest[0].seq)).await.unwrap();
    let texts: Vec<_> = older
        .iter()
        .map(|m| m.body.content().unwrap().body().to_string())
        .collect();
    assert_eq!(texts, ["m0", "m1"]);
}

#[tokio::test]
async fn live_subscribers_see_store_events_in_order() {
    let state = common::state();
    let recipient = Uuid::new_v4();
    let mut sub = state.dispatcher.subscribe(Topic::Notifications(recipient));

    let first = notify::notify(&state, None, recipient, NotificationKind::Follow, None)
        .await
        .unwrap();
    store::mark_read(&state, first.id, recipient).await.unwrap();
    store::delete(&state, first.id, recipient).await.unwrap();

    let mut seqs = Vec::new();
    let mut kinds = Vec::new();
    for _ in 0..3 {
        let delivery = sub.recv().await.unwrap();
        seqs.push(delivery.seq);
        kinds.push(delivery.event);
    }
    assert!(seqs.windows(2).all(|w| w[0] < w[1]));
    assert!(matches!(kinds[0], GatewayEvent::NotificationCreate { .. }));
    assert_eq!(kinds[1], GatewayEvent::NotificationRead { id: first.id });
    assert_eq!(kinds[2], GatewayEvent::NotificationDelete { id: first.id });
}
