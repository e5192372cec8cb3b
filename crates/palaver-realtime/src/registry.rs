//! Connection Registry implementation.
//!
//! Tracks the live connections of each user (one per device) for event
//! routing, and derives presence transitions from the first-connection /
//! last-connection edges.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use palaver_core::{
    ConnectionId, DeviceTag, Feed, PresenceRecord, PresenceStatus, ServerEvent, UserId,
};

use crate::config::RealtimeConfig;

/// One live connection as seen by the registry.
///
/// Carries the bounded outbound queue plus the per-connection feed flags
/// that the `subscribe` command toggles. Cloning shares the underlying
/// channel and flags.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub user_id: UserId,
    pub device_tag: DeviceTag,
    pub established_at: DateTime<Utc>,
    sender: mpsc::Sender<ServerEvent>,
    presence_feed: Arc<AtomicBool>,
    typing_feed: Arc<AtomicBool>,
    /// Cancelled when the registry tears the connection down; the
    /// transport actor watches this and closes the socket.
    closer: CancellationToken,
}

impl ConnectionHandle {
    fn new(
        id: ConnectionId,
        user_id: UserId,
        device_tag: DeviceTag,
        sender: mpsc::Sender<ServerEvent>,
    ) -> Self {
        Self {
            id,
            user_id,
            device_tag,
            established_at: Utc::now(),
            sender,
            presence_feed: Arc::new(AtomicBool::new(false)),
            typing_feed: Arc::new(AtomicBool::new(false)),
            closer: CancellationToken::new(),
        }
    }

    /// Opt this connection into an event feed.
    pub fn enable_feed(&self, feed: Feed) {
        self.flag_for(feed).store(true, Ordering::Relaxed);
    }

    /// Whether this connection has opted into a feed.
    pub fn wants_feed(&self, feed: Feed) -> bool {
        self.flag_for(feed).load(Ordering::Relaxed)
    }

    /// A token that fires when the registry tears this connection down.
    pub fn closed(&self) -> CancellationToken {
        self.closer.clone()
    }

    fn flag_for(&self, feed: Feed) -> &AtomicBool {
        match feed {
            Feed::Presence => &self.presence_feed,
            Feed::Typing => &self.typing_feed,
        }
    }

    fn try_send(&self, event: ServerEvent) -> Result<(), mpsc::error::TrySendError<ServerEvent>> {
        self.sender.try_send(event)
    }
}

/// Result of attempting to push an event to a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Event was queued on the connection's outbound channel.
    Queued,
    /// The target connection is not registered.
    NotConnected,
    /// The connection's queue was full; the connection has been torn down.
    Overflow,
    /// The connection's channel was closed; the stale entry has been removed.
    Closed,
}

/// Per-user state: the live connections and when the user came online.
#[derive(Debug)]
struct UserSessions {
    handles: Vec<ConnectionHandle>,
    online_since: DateTime<Utc>,
}

/// Registry of live connections, keyed by user.
///
/// The user map is coarse-grained (one shard lock per insert/remove); the
/// actual event pushes happen on clones taken outside the lock, so slow
/// consumers never hold up admits or removals. Operations for the same
/// user serialize on the user's entry, which is what makes the
/// first/last-connection presence transitions race-free.
pub struct ConnectionRegistry {
    users: DashMap<UserId, UserSessions>,
    index: DashMap<ConnectionId, UserId>,
    transitions: broadcast::Sender<PresenceRecord>,
}

impl ConnectionRegistry {
    pub fn new(config: &RealtimeConfig) -> Self {
        info!("Creating connection registry");
        let (transitions, _) = broadcast::channel(config.presence_channel_capacity);
        Self {
            users: DashMap::new(),
            index: DashMap::new(),
            transitions,
        }
    }

    /// Admit an authenticated connection.
    ///
    /// If this is the user's first live connection, a presence-online
    /// transition is published before this call returns.
    #[instrument(skip(self, sender), fields(user_id = %user_id, connection_id = %connection_id))]
    pub fn admit(
        &self,
        user_id: UserId,
        connection_id: ConnectionId,
        device_tag: DeviceTag,
        sender: mpsc::Sender<ServerEvent>,
    ) -> ConnectionHandle {
        let handle = ConnectionHandle::new(connection_id, user_id.clone(), device_tag, sender);
        self.index.insert(connection_id, user_id.clone());

        let mut sessions = self.users.entry(user_id.clone()).or_insert_with(|| {
            UserSessions {
                handles: Vec::new(),
                online_since: Utc::now(),
            }
        });
        let came_online = sessions.handles.is_empty();
        if came_online {
            sessions.online_since = Utc::now();
        }
        sessions.handles.push(handle.clone());
        let connections = sessions.handles.len();

        // Published while the user's entry is held so that transitions for
        // one user reach subscribers in the order they occurred.
        if came_online {
            let _ = self.transitions.send(PresenceRecord {
                user_id,
                status: PresenceStatus::Online,
                last_changed_at: sessions.online_since,
            });
        }
        drop(sessions);

        debug!(connections, came_online, "Connection admitted");
        handle
    }

    /// Remove a connection. Idempotent: removing an unknown id is a no-op.
    ///
    /// If it was the user's last connection, a presence-offline transition
    /// is published.
    #[instrument(skip(self), fields(connection_id = %connection_id))]
    pub fn remove(&self, connection_id: ConnectionId) {
        let Some((_, user_id)) = self.index.remove(&connection_id) else {
            debug!("Connection was not registered");
            return;
        };

        let mut went_offline = false;
        if let Some(mut sessions) = self.users.get_mut(&user_id) {
            let before = sessions.handles.len();
            sessions.handles.retain(|handle| {
                if handle.id == connection_id {
                    handle.closer.cancel();
                    false
                } else {
                    true
                }
            });
            if sessions.handles.len() < before && sessions.handles.is_empty() {
                went_offline = true;
                let _ = self.transitions.send(PresenceRecord {
                    user_id: user_id.clone(),
                    status: PresenceStatus::Offline,
                    last_changed_at: Utc::now(),
                });
            }
        }
        self.users
            .remove_if(&user_id, |_, sessions| sessions.handles.is_empty());

        debug!(user = %user_id, went_offline, "Connection removed");
    }

    /// The ids of a user's live connections. Empty for unknown users,
    /// never an error.
    pub fn connections_of(&self, user_id: &UserId) -> Vec<ConnectionId> {
        self.users
            .get(user_id)
            .map(|sessions| sessions.handles.iter().map(|handle| handle.id).collect())
            .unwrap_or_default()
    }

    /// Derived presence: online iff the user has at least one connection.
    pub fn status_of(&self, user_id: &UserId) -> PresenceStatus {
        match self.users.get(user_id) {
            Some(sessions) if !sessions.handles.is_empty() => PresenceStatus::Online,
            _ => PresenceStatus::Offline,
        }
    }

    /// Presence records for every currently-online user.
    pub fn online_records(&self) -> Vec<PresenceRecord> {
        self.users
            .iter()
            .filter(|entry| !entry.value().handles.is_empty())
            .map(|entry| PresenceRecord {
                user_id: entry.key().clone(),
                status: PresenceStatus::Online,
                last_changed_at: entry.value().online_since,
            })
            .collect()
    }

    /// Subscribe to presence transitions, in per-user occurrence order.
    pub fn subscribe_transitions(&self) -> broadcast::Receiver<PresenceRecord> {
        self.transitions.subscribe()
    }

    /// Total number of live connections.
    pub fn connection_count(&self) -> usize {
        self.index.len()
    }

    /// Push an event to one specific connection.
    ///
    /// A full or closed queue tears that connection down; other
    /// connections of the same user are unaffected.
    pub fn push_to_connection(&self, connection_id: ConnectionId, event: ServerEvent) -> PushOutcome {
        let handle = {
            let Some(user_id) = self.index.get(&connection_id) else {
                return PushOutcome::NotConnected;
            };
            self.users.get(user_id.value()).and_then(|sessions| {
                sessions
                    .handles
                    .iter()
                    .find(|handle| handle.id == connection_id)
                    .cloned()
            })
        };
        let Some(handle) = handle else {
            return PushOutcome::NotConnected;
        };
        self.dispatch(&handle, event)
    }

    /// Push an event to every live connection of a user. Returns the
    /// number of connections the event was queued on; zero connections is
    /// not an error.
    pub fn push_to_user(&self, user_id: &UserId, event: &ServerEvent) -> usize {
        self.push_filtered(user_id, event, |_| true)
    }

    /// Push an event to the user's connections that opted into a feed.
    pub fn push_feed_to_user(&self, user_id: &UserId, feed: Feed, event: &ServerEvent) -> usize {
        self.push_filtered(user_id, event, |handle| handle.wants_feed(feed))
    }

    /// Push an event to every connection (of any user) that opted into a
    /// feed. Used for presence broadcasts.
    pub fn broadcast_feed(&self, feed: Feed, event: &ServerEvent) -> usize {
        let handles: Vec<ConnectionHandle> = self
            .users
            .iter()
            .flat_map(|entry| {
                entry
                    .value()
                    .handles
                    .iter()
                    .filter(|handle| handle.wants_feed(feed))
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect();

        let mut queued = 0;
        for handle in handles {
            if self.dispatch(&handle, event.clone()) == PushOutcome::Queued {
                queued += 1;
            }
        }
        queued
    }

    fn push_filtered<F>(&self, user_id: &UserId, event: &ServerEvent, keep: F) -> usize
    where
        F: Fn(&ConnectionHandle) -> bool,
    {
        // Snapshot under the entry lock, send outside it.
        let handles: Vec<ConnectionHandle> = self
            .users
            .get(user_id)
            .map(|sessions| {
                sessions
                    .handles
                    .iter()
                    .filter(|handle| keep(handle))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        let mut queued = 0;
        for handle in handles {
            if self.dispatch(&handle, event.clone()) == PushOutcome::Queued {
                queued += 1;
            }
        }
        queued
    }

    fn dispatch(&self, handle: &ConnectionHandle, event: ServerEvent) -> PushOutcome {
        match handle.try_send(event) {
            Ok(()) => PushOutcome::Queued,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(
                    connection = %handle.id,
                    user = %handle.user_id,
                    "Outbound queue full, tearing connection down"
                );
                self.remove(handle.id);
                PushOutcome::Overflow
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(
                    connection = %handle.id,
                    user = %handle.user_id,
                    "Outbound channel closed, removing stale connection"
                );
                self.remove(handle.id);
                PushOutcome::Closed
            }
        }
    }
}

impl fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("connection_count", &self.index.len())
            .field("user_count", &self.users.len())
            .finish()
    }
}
