// SPDX-FileCopyrightText: 2026 Orgchat Relay Developers
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Relay Core
//!
//! Owns the only shared mutable state in the process: the room map and the
//! per-connection entries. All membership mutations and broadcasts go
//! through one mutex, so a broadcast can never interleave with a join or
//! leave — a frame is either delivered to the membership as of before a
//! change or as of after it, never to a half-applied one.
//!
//! Connections are addressed by an opaque monotonically increasing
//! [`ConnectionId`] handed out at registration. Outbound traffic reaches a
//! connection through an async channel; when the registry drops a
//! connection's sender (eviction by a newer session for the same identity),
//! the handler sees its receiver close and shuts the socket down without a
//! leave broadcast.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{SecondsFormat, Utc};
use tokio::sync::mpsc;
use tracing::debug;

use crate::protocol::{ServerFrame, UserEntry};

/// A resolved identity, immutable for the lifetime of its connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub email: String,
    pub display_name: String,
    /// Room key: the organization id, optionally qualified by a location.
    pub tenant_key: String,
}

/// Opaque handle to one registered connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A pre-serialized frame queued for delivery to one connection.
#[derive(Debug, Clone)]
pub struct RoomMessage {
    /// The JSON text to send over the WebSocket.
    pub data: String,
}

/// What a successful registration hands back to the connection handler.
pub struct Registration {
    pub id: ConnectionId,
    /// Receiving end of the connection's outbound queue. `auth_success` and
    /// the presence snapshot are already queued on it.
    pub receiver: mpsc::Receiver<RoomMessage>,
    /// Prior connections for the same identity that were evicted.
    pub evicted: Vec<ConnectionId>,
}

/// Load counters for the health endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayStats {
    pub connections: usize,
    pub rooms: usize,
}

struct ConnectionEntry {
    identity: Identity,
    sender: mpsc::Sender<RoomMessage>,
    joined_at: chrono::DateTime<Utc>,
}

#[derive(Default)]
struct RelayState {
    /// Room membership, keyed by tenant key. Rooms are created on first
    /// join and removed when the last member leaves.
    rooms: HashMap<String, HashSet<ConnectionId>>,
    connections: HashMap<ConnectionId, ConnectionEntry>,
}

/// Queue depth per connection. A receiver this far behind is skipped by
/// broadcasts rather than blocking the room.
const ROOM_CHANNEL_CAPACITY: usize = 256;

/// The thread-safe coordination point for rooms and sessions.
pub struct RelayCore {
    state: Mutex<RelayState>,
    next_id: AtomicU64,
}

impl RelayCore {
    /// Creates an empty core. No hidden process-wide state: tests can run
    /// as many cores side by side as they like.
    pub fn new() -> Self {
        RelayCore {
            state: Mutex::new(RelayState::default()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Registers an authenticated connection into its identity's room.
    ///
    /// Atomically, under one lock acquisition: evicts any other connection
    /// with the same email from the room (its entry is removed and its
    /// channel closed; no `user_left` is emitted for a rejoin), inserts the
    /// new connection, queues `auth_success` plus the deduplicated presence
    /// snapshot to it, and announces `user_joined` to the rest of the room.
    pub fn register(&self, identity: Identity) -> Registration {
        let (tx, rx) = mpsc::channel(ROOM_CHANNEL_CAPACITY);
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));

        let mut state = self.state.lock().unwrap();
        let RelayState { rooms, connections } = &mut *state;

        let room = rooms.entry(identity.tenant_key.clone()).or_default();

        let stale: Vec<ConnectionId> = room
            .iter()
            .copied()
            .filter(|cid| {
                connections
                    .get(cid)
                    .is_some_and(|entry| entry.identity.email == identity.email)
            })
            .collect();
        for cid in &stale {
            room.remove(cid);
            connections.remove(cid);
            debug!(connection = %cid, email = %identity.email, "evicted prior session");
        }

        room.insert(id);
        connections.insert(
            id,
            ConnectionEntry {
                identity: identity.clone(),
                sender: tx,
                joined_at: Utc::now(),
            },
        );

        let users = snapshot_locked(rooms, connections, &identity.tenant_key);
        enqueue(connections, id, &ServerFrame::AuthSuccess);
        enqueue(connections, id, &ServerFrame::UserList { users });
        broadcast_locked(
            rooms,
            connections,
            &identity.tenant_key,
            &ServerFrame::UserJoined {
                email: identity.email.clone(),
                display_name: identity.display_name.clone(),
            },
            Some(id),
        );

        Registration {
            id,
            receiver: rx,
            evicted: stale,
        }
    }

    /// Removes a connection from its room and announces `user_left` to the
    /// remaining members. Deletes the room when it empties.
    ///
    /// Idempotent: returns `false` (and does nothing) when the connection
    /// was already removed, e.g. by an eviction.
    pub fn disconnect(&self, id: ConnectionId) -> bool {
        let mut state = self.state.lock().unwrap();
        let RelayState { rooms, connections } = &mut *state;

        let Some(entry) = connections.remove(&id) else {
            return false;
        };
        let tenant_key = entry.identity.tenant_key.clone();

        let mut remaining = false;
        if let Some(room) = rooms.get_mut(&tenant_key) {
            room.remove(&id);
            if room.is_empty() {
                rooms.remove(&tenant_key);
            } else {
                remaining = true;
            }
        }
        if remaining {
            broadcast_locked(
                rooms,
                connections,
                &tenant_key,
                &ServerFrame::UserLeft {
                    email: entry.identity.email.clone(),
                },
                None,
            );
        }

        let connected_secs = (Utc::now() - entry.joined_at).num_seconds();
        debug!(connection = %id, email = %entry.identity.email, connected_secs, "session ended");
        true
    }

    /// Relays an envelope from `id` to every other member of its room,
    /// stamping the sender identity and an ISO-8601 server timestamp.
    /// Returns `false` when the connection is not registered.
    pub fn relay_message(&self, id: ConnectionId, payload: String, iv: String) -> bool {
        let mut state = self.state.lock().unwrap();
        let RelayState { rooms, connections } = &mut *state;

        let Some(entry) = connections.get(&id) else {
            return false;
        };
        let tenant_key = entry.identity.tenant_key.clone();
        let frame = ServerFrame::Message {
            from: entry.identity.email.clone(),
            payload,
            iv,
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        };
        broadcast_locked(rooms, connections, &tenant_key, &frame, Some(id));
        true
    }

    /// Current members of a room, deduplicated by email.
    pub fn presence_snapshot(&self, tenant_key: &str) -> Vec<UserEntry> {
        let state = self.state.lock().unwrap();
        snapshot_locked(&state.rooms, &state.connections, tenant_key)
    }

    /// Live connection and room counts.
    pub fn stats(&self) -> RelayStats {
        let state = self.state.lock().unwrap();
        RelayStats {
            connections: state.connections.len(),
            rooms: state.rooms.len(),
        }
    }
}

impl Default for RelayCore {
    fn default() -> Self {
        Self::new()
    }
}

/// Sends `frame` to every live member of the room except `exclude`.
/// Receivers that are gone or backed up are skipped; a broadcast never
/// fails the caller.
fn broadcast_locked(
    rooms: &HashMap<String, HashSet<ConnectionId>>,
    connections: &HashMap<ConnectionId, ConnectionEntry>,
    tenant_key: &str,
    frame: &ServerFrame,
    exclude: Option<ConnectionId>,
) {
    let Some(room) = rooms.get(tenant_key) else {
        return;
    };
    let Ok(json) = serde_json::to_string(frame) else {
        return;
    };
    for cid in room {
        if Some(*cid) == exclude {
            continue;
        }
        if let Some(entry) = connections.get(cid) {
            let _ = entry.sender.try_send(RoomMessage { data: json.clone() });
        }
    }
}

fn snapshot_locked(
    rooms: &HashMap<String, HashSet<ConnectionId>>,
    connections: &HashMap<ConnectionId, ConnectionEntry>,
    tenant_key: &str,
) -> Vec<UserEntry> {
    let mut seen = HashSet::new();
    let mut users = Vec::new();
    if let Some(room) = rooms.get(tenant_key) {
        for cid in room {
            if let Some(entry) = connections.get(cid) {
                if seen.insert(entry.identity.email.clone()) {
                    users.push(UserEntry {
                        email: entry.identity.email.clone(),
                        display_name: entry.identity.display_name.clone(),
                    });
                }
            }
        }
    }
    users
}

fn enqueue(
    connections: &HashMap<ConnectionId, ConnectionEntry>,
    id: ConnectionId,
    frame: &ServerFrame,
) {
    if let Some(entry) = connections.get(&id) {
        if let Ok(json) = serde_json::to_string(frame) {
            let _ = entry.sender.try_send(RoomMessage { data: json });
        }
    }
}
