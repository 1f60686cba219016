use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use pulse_types::error::PulseError;
use pulse_types::events::{GatewayEvent, PresenceViewer};
use pulse_types::topic::Topic;

use crate::dispatcher::Dispatcher;

/// Default interval at which clients heartbeat and the reaper sweeps.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Sessions silent for longer than this are considered gone.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(60);

/// Ephemeral per-channel membership, e.g. who is watching `watch:game123`.
///
/// Each session only ever adds or removes its own key, so joins and leaves
/// from independent connections commute. A channel exists while it has at
/// least one member. Every change publishes a full snapshot to
/// `presence:{channel_key}`.
#[derive(Clone)]
pub struct PresenceTracker {
    inner: Arc<PresenceInner>,
}

struct PresenceInner {
    channels: Mutex<HashMap<String, HashMap<String, SessionEntry>>>,
    dispatcher: Dispatcher,
    ttl: Duration,
}

struct SessionEntry {
    joined_at: DateTime<Utc>,
    last_seen: Instant,
    metadata: serde_json::Value,
}

impl PresenceTracker {
    pub fn new(dispatcher: Dispatcher, ttl: Duration) -> Self {
        Self {
            inner: Arc::new(PresenceInner {
                channels: Mutex::new(HashMap::new()),
                dispatcher,
                ttl,
            }),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.inner.ttl
    }

    /// Add `session_key` to `channel_key`. Joining again with the same key
    /// refreshes the session instead of counting it twice.
    pub fn join(
        &self,
        channel_key: &str,
        session_key: &str,
        metadata: serde_json::Value,
    ) -> Result<PresenceHandle, PulseError> {
        if channel_key.trim().is_empty() {
            return Err(PulseError::validation("channel key must not be empty"));
        }
        if session_key.trim().is_empty() {
            return Err(PulseError::validation("session key must not be empty"));
        }

        let mut channels = self.lock_channels();
        let members = channels.entry(channel_key.to_string()).or_default();
        let now = Instant::now();
        members
            .entry(session_key.to_string())
            .and_modify(|entry| {
                entry.last_seen = now;
                entry.metadata = metadata.clone();
            })
            .or_insert_with(|| SessionEntry {
                joined_at: Utc::now(),
                last_seen: now,
                metadata,
            });
        debug!("{} joined {} ({} viewers)", session_key, channel_key, members.len());
        self.publish_sync(channel_key, channels.get(channel_key));

        Ok(PresenceHandle {
            tracker: self.clone(),
            channel_key: channel_key.to_string(),
            session_key: session_key.to_string(),
        })
    }

    /// Remove one session from one channel. Returns false if it was not there.
    pub fn leave(&self, channel_key: &str, session_key: &str) -> bool {
        let mut channels = self.lock_channels();
        let Some(members) = channels.get_mut(channel_key) else {
            return false;
        };
        if members.remove(session_key).is_none() {
            return false;
        }
        if members.is_empty() {
            channels.remove(channel_key);
        }
        debug!("{} left {}", session_key, channel_key);
        self.publish_sync(channel_key, channels.get(channel_key));
        true
    }

    /// Remove a session from every channel it joined, e.g. on socket close.
    /// Returns the affected channel keys.
    pub fn leave_all(&self, session_key: &str) -> Vec<String> {
        let mut channels = self.lock_channels();
        let affected: Vec<String> = channels
            .iter()
            .filter(|(_, members)| members.contains_key(session_key))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &affected {
            if let Some(members) = channels.get_mut(key) {
                members.remove(session_key);
                if members.is_empty() {
                    channels.remove(key);
                }
            }
            self.publish_sync(key, channels.get(key));
        }
        affected
    }

    /// Refresh one session. Returns false if it already expired, in which
    /// case the client has to join again.
    pub fn heartbeat(&self, channel_key: &str, session_key: &str) -> bool {
        let mut channels = self.lock_channels();
        match channels.get_mut(channel_key).and_then(|m| m.get_mut(session_key)) {
            Some(entry) => {
                entry.last_seen = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Refresh a session in every channel it belongs to. Returns how many
    /// memberships were refreshed.
    pub fn heartbeat_session(&self, session_key: &str) -> usize {
        let now = Instant::now();
        let mut channels = self.lock_channels();
        let mut refreshed = 0;
        for members in channels.values_mut() {
            if let Some(entry) = members.get_mut(session_key) {
                entry.last_seen = now;
                refreshed += 1;
            }
        }
        refreshed
    }

    /// Drop every session whose last heartbeat is older than the TTL as of
    /// `now`. Covers clients that vanished without a clean leave.
    pub fn reap_expired(&self, now: Instant) -> usize {
        let ttl = self.inner.ttl;
        let mut channels = self.lock_channels();
        let mut reaped = 0;
        let mut changed = Vec::new();

        for (key, members) in channels.iter_mut() {
            let before = members.len();
            members.retain(|_, entry| now.saturating_duration_since(entry.last_seen) <= ttl);
            if members.len() != before {
                reaped += before - members.len();
                changed.push(key.clone());
            }
        }

        for key in &changed {
            if channels.get(key).is_some_and(|m| m.is_empty()) {
                channels.remove(key);
            }
            self.publish_sync(key, channels.get(key));
        }
        reaped
    }

    pub fn viewer_count(&self, channel_key: &str) -> usize {
        self.lock_channels().get(channel_key).map_or(0, |m| m.len())
    }

    pub fn snapshot(&self, channel_key: &str) -> Vec<PresenceViewer> {
        viewers_of(self.lock_channels().get(channel_key))
    }

    /// Number of channels that currently have members.
    pub fn active_channels(&self) -> usize {
        self.lock_channels().len()
    }

    fn publish_sync(&self, channel_key: &str, members: Option<&HashMap<String, SessionEntry>>) {
        let viewers = viewers_of(members);
        let count = viewers.len();
        self.inner.dispatcher.publish(
            &Topic::Presence(channel_key.to_string()),
            GatewayEvent::PresenceSync {
                channel_key: channel_key.to_string(),
                viewers,
                count,
            },
        );
    }

    fn lock_channels(&self) -> std::sync::MutexGuard<'_, HashMap<String, HashMap<String, SessionEntry>>> {
        self.inner.channels.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn viewers_of(members: Option<&HashMap<String, SessionEntry>>) -> Vec<PresenceViewer> {
    let mut viewers: Vec<PresenceViewer> = members
        .into_iter()
        .flatten()
        .map(|(key, entry)| PresenceViewer {
            session_key: key.clone(),
            joined_at: entry.joined_at,
            metadata: entry.metadata.clone(),
        })
        .collect();
    viewers.sort_by(|a, b| {
        a.joined_at
            .cmp(&b.joined_at)
            .then_with(|| a.session_key.cmp(&b.session_key))
    });
    viewers
}

/// Membership of one session in one channel.
#[must_use = "dropping a handle does not leave; call leave() or let the session expire"]
pub struct PresenceHandle {
    tracker: PresenceTracker,
    channel_key: String,
    session_key: String,
}

impl PresenceHandle {
    pub fn channel_key(&self) -> &str {
        &self.channel_key
    }

    pub fn session_key(&self) -> &str {
        &self.session_key
    }

    pub fn heartbeat(&self) -> bool {
        self.tracker.heartbeat(&self.channel_key, &self.session_key)
    }

    pub fn leave(self) -> bool {
        self.tracker.leave(&self.channel_key, &self.session_key)
    }
}

/// Background task that expires silent sessions.
pub async fn run_reaper_loop(tracker: PresenceTracker, interval: Duration, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let reaped = tracker.reap_expired(Instant::now());
                if reaped > 0 {
                    info!("Presence: expired {} silent sessions", reaped);
                }
            }
            _ = shutdown.cancelled() => {
                info!("Presence reaper stopping");
                break;
            }
        }
    }
}
