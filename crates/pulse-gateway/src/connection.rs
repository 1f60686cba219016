use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SelectAll, SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use pulse_types::events::{GatewayCommand, GatewayEvent};
use pulse_types::topic::Topic;

use crate::dispatcher::{CancelHandle, Dispatcher, Subscription};
use crate::presence::{PresenceHandle, PresenceTracker};

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Per-connection bookkeeping owned by the receive side.
struct ConnectionState {
    user_id: Uuid,
    username: String,
    /// Presence session key; one per socket, so two tabs count as two viewers.
    session_key: String,
    subscriptions: HashMap<Topic, CancelHandle>,
    presence: HashMap<String, PresenceHandle>,
    /// Hands freshly opened subscriptions to the send task.
    new_subscriptions: mpsc::UnboundedSender<Subscription>,
}

/// Handle a WebSocket whose bearer token was already validated at the HTTP
/// upgrade layer.
pub async fn handle_connection_authenticated(
    socket: WebSocket,
    dispatcher: Dispatcher,
    presence: PresenceTracker,
    user_id: Uuid,
    username: String,
) {
    let (mut sender, receiver) = socket.split();

    info!("{} ({}) connected to gateway", username, user_id);

    if send_json(&mut sender, &GatewayEvent::Ready { user_id }).await.is_err() {
        return;
    }

    run_connection_loop(sender, receiver, dispatcher, presence, user_id, username).await;
}

async fn run_connection_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    dispatcher: Dispatcher,
    presence: PresenceTracker,
    user_id: Uuid,
    username: String,
) {
    let session_key = Uuid::new_v4().to_string();
    let (new_sub_tx, mut new_sub_rx) = mpsc::unbounded_channel::<Subscription>();

    let mut state = ConnectionState {
        user_id,
        username: username.clone(),
        session_key: session_key.clone(),
        subscriptions: HashMap::new(),
        presence: HashMap::new(),
        new_subscriptions: new_sub_tx,
    };

    // Personal notification stream is always on
    subscribe_topic(&dispatcher, &mut state, Topic::Notifications(user_id));

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward deliveries from every subscribed topic -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;
        let mut streams: SelectAll<Subscription> = SelectAll::new();

        loop {
            tokio::select! {
                Some(sub) = new_sub_rx.recv() => {
                    streams.push(sub);
                }
                Some(delivery) = streams.next(), if !streams.is_empty() => {
                    if send_json(&mut sender, &delivery).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from client
    let dispatcher_recv = dispatcher.clone();
    let presence_recv = presence.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(cmd) => handle_command(&dispatcher_recv, &presence_recv, &mut state, cmd),
                    Err(e) => {
                        warn!(
                            "{} ({}) bad command: {} -- raw: {}",
                            state.username,
                            state.user_id,
                            e,
                            text.chars().take(200).collect::<String>()
                        );
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }

        for handle in state.subscriptions.values() {
            handle.cancel();
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    // Transport-level leave. Sessions this misses (half-open sockets) are
    // caught by the presence reaper.
    let left = presence.leave_all(&session_key);
    info!(
        "{} ({}) disconnected from gateway (left {} presence channels)",
        username,
        user_id,
        left.len()
    );
}

fn handle_command(
    dispatcher: &Dispatcher,
    presence: &PresenceTracker,
    state: &mut ConnectionState,
    cmd: GatewayCommand,
) {
    match cmd {
        GatewayCommand::Subscribe { topics } => {
            info!(
                "{} ({}) subscribing to {} topics",
                state.username,
                state.user_id,
                topics.len()
            );
            for topic in topics {
                if !topic.is_visible_to(state.user_id) {
                    warn!("{} ({}) denied subscription to {}", state.username, state.user_id, topic);
                    continue;
                }
                subscribe_topic(dispatcher, state, topic);
            }
        }

        GatewayCommand::Unsubscribe { topics } => {
            for topic in topics {
                if let Some(handle) = state.subscriptions.remove(&topic) {
                    handle.cancel();
                    debug!("{} ({}) unsubscribed from {}", state.username, state.user_id, topic);
                }
            }
        }

        GatewayCommand::PresenceJoin {
            channel_key,
            metadata,
        } => {
            let metadata = serde_json::json!({
                "user_id": state.user_id,
                "username": state.username,
                "client": metadata,
            });
            match presence.join(&channel_key, &state.session_key, metadata) {
                Ok(handle) => {
                    info!("{} ({}) joined presence {}", state.username, state.user_id, channel_key);
                    state.presence.insert(channel_key, handle);
                }
                Err(e) => warn!("{} ({}) presence join rejected: {}", state.username, state.user_id, e),
            }
        }

        GatewayCommand::PresenceLeave { channel_key } => {
            if let Some(handle) = state.presence.remove(&channel_key) {
                handle.leave();
                info!("{} ({}) left presence {}", state.username, state.user_id, channel_key);
            }
        }

        GatewayCommand::PresenceHeartbeat => {
            let refreshed = presence.heartbeat_session(&state.session_key);
            if refreshed < state.presence.len() {
                // Some memberships already expired; the client has to join again
                state.presence.retain(|_, handle| handle.heartbeat());
                debug!(
                    "{} ({}) heartbeat found expired presence sessions",
                    state.username, state.user_id
                );
            }
        }
    }
}

fn subscribe_topic(dispatcher: &Dispatcher, state: &mut ConnectionState, topic: Topic) {
    if state.subscriptions.contains_key(&topic) {
        return;
    }
    let sub = dispatcher.subscribe(topic.clone());
    let handle = sub.cancel_handle();
    if state.new_subscriptions.send(sub).is_ok() {
        state.subscriptions.insert(topic, handle);
    }
}

async fn send_json<T: Serialize>(
    sender: &mut SplitSink<WebSocket, Message>,
    value: &T,
) -> Result<(), ()> {
    let text = match serde_json::to_string(value) {
        Ok(text) => text,
        Err(e) => {
            warn!("Failed to encode gateway frame: {}", e);
            return Ok(());
        }
    };
    sender.send(Message::Text(text.into())).await.map_err(|_| ())
}
