//! Server state management.
//!
//! Tracks open connections and the rooms they are bound to. Nothing here is
//! persisted: a room exists while at least one connection is bound to it.
//!
//! Room membership is an attribute of the connection (`Connection::membership`).
//! Each room additionally keeps the senders of its members so a broadcast only
//! needs that one room entry. Holding the entry while fanning out serializes
//! broadcasts within a room; different rooms never contend.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::RelayError;
use crate::protocol::{ServerMessage, ToggleKind};

/// Default maximum members per room.
const DEFAULT_MAX_ROOM_SIZE: usize = 50;

/// Default WebSocket keep-alive ping interval in seconds.
const DEFAULT_PING_INTERVAL_SECS: u64 = 30;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub port: u16,
    /// Joins beyond this many members are rejected.
    pub max_room_size: usize,
    /// Seconds between WebSocket pings to each client. 0 disables pings.
    pub ping_interval_secs: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            max_room_size: DEFAULT_MAX_ROOM_SIZE,
            ping_interval_secs: DEFAULT_PING_INTERVAL_SECS,
        }
    }
}

/// A connected client's sender channel.
pub type ClientSender = mpsc::UnboundedSender<ServerMessage>;

/// Opaque per-connection identifier assigned on upgrade.
pub type ConnectionId = Uuid;

/// The room and peer id a connection last joined with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Membership {
    pub room_id: String,
    pub peer_id: String,
}

/// One open WebSocket connection.
pub struct Connection {
    pub sender: ClientSender,
    pub membership: Option<Membership>,
    pub connected_at: DateTime<Utc>,
}

struct Member {
    peer_id: String,
    sender: ClientSender,
}

/// A room's broadcast group.
pub struct Room {
    members: HashMap<ConnectionId, Member>,
    pub created_at: DateTime<Utc>,
}

impl Room {
    fn new() -> Self {
        Self {
            members: HashMap::new(),
            created_at: Utc::now(),
        }
    }

    /// Send `message` to every member except `except`. Returns how many
    /// members it was handed to.
    fn broadcast(&self, except: ConnectionId, message: &ServerMessage) -> usize {
        let mut delivered = 0;
        for (conn_id, member) in &self.members {
            if *conn_id == except {
                continue;
            }
            // A closed channel means that member's handler is already tearing down.
            if member.sender.send(message.clone()).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }
}

/// Result of a successful `join`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    /// Bound to the room; `notified` other members received `user-connected`.
    Joined { notified: usize },
    /// The connection was already bound to this room under this peer id.
    AlreadyJoined,
}

/// Shared server state.
#[derive(Clone)]
pub struct RelayState {
    /// Connection ID → connection.
    pub connections: Arc<DashMap<ConnectionId, Connection>>,

    /// Room ID → broadcast group. Empty rooms are removed.
    pub rooms: Arc<DashMap<String, Room>>,

    /// Server configuration.
    pub config: RelayConfig,
}

impl RelayState {
    /// Create a new relay state with the given configuration.
    pub fn new(config: RelayConfig) -> Self {
        Self {
            connections: Arc::new(DashMap::new()),
            rooms: Arc::new(DashMap::new()),
            config,
        }
    }

    // ── Connection Management ─────────────────────────────────────────────

    /// Register a freshly upgraded connection. It is not in any room yet.
    pub fn connect(&self, sender: ClientSender) -> ConnectionId {
        let conn_id = Uuid::new_v4();
        self.connections.insert(
            conn_id,
            Connection {
                sender,
                membership: None,
                connected_at: Utc::now(),
            },
        );
        tracing::debug!(conn = %conn_id, "Connection registered");
        conn_id
    }

    /// Tear down a connection. If it was still bound to a room, the remaining
    /// members receive `user-leave` for its peer id. Returns the membership
    /// that was dropped, so callers can tell whether a leave was synthesized.
    pub fn disconnect(&self, conn_id: ConnectionId) -> Option<Membership> {
        let (_, connection) = self.connections.remove(&conn_id)?;
        let membership = connection.membership?;

        tracing::info!(
            conn = %conn_id,
            connected_secs = (Utc::now() - connection.connected_at).num_seconds(),
            room_id = membership.room_id.as_str(),
            peer_id = membership.peer_id.as_str(),
            "Connection dropped without leaving, synthesizing user-leave"
        );
        self.remove_member(&membership, conn_id);
        Some(membership)
    }

    /// Send a message to one connection. Returns true if it was queued.
    pub fn send_to(&self, conn_id: ConnectionId, message: ServerMessage) -> bool {
        match self.connections.get(&conn_id) {
            Some(connection) => connection.sender.send(message).is_ok(),
            None => false,
        }
    }

    /// The room and peer id a connection is currently bound to.
    pub fn membership(&self, conn_id: ConnectionId) -> Option<Membership> {
        self.connections
            .get(&conn_id)
            .and_then(|c| c.membership.clone())
    }

    // ── Room Operations ───────────────────────────────────────────────────

    /// Bind a connection to a room and announce it to the other members.
    ///
    /// The joiner is acknowledged with `joined` but is not told who is
    /// already present; existing members are expected to call it.
    pub fn join(
        &self,
        conn_id: ConnectionId,
        room_id: &str,
        peer_id: &str,
    ) -> Result<JoinOutcome, RelayError> {
        RelayError::require(room_id, "room_id")?;
        RelayError::require(peer_id, "peer_id")?;

        let (sender, current) = {
            let connection = self
                .connections
                .get(&conn_id)
                .ok_or(RelayError::UnknownConnection)?;
            (connection.sender.clone(), connection.membership.clone())
        };

        let requested = Membership {
            room_id: room_id.to_string(),
            peer_id: peer_id.to_string(),
        };

        if current.as_ref() == Some(&requested) {
            tracing::debug!(
                conn = %conn_id,
                room_id = room_id,
                "Duplicate join ignored"
            );
            self.ack_join(conn_id, &requested);
            return Ok(JoinOutcome::AlreadyJoined);
        }

        if current.is_some() {
            // One membership per connection: moving rooms leaves the old one.
            self.leave_current(conn_id);
        }

        let notified = {
            let mut room = self
                .rooms
                .entry(room_id.to_string())
                .or_insert_with(Room::new);

            if room.members.len() >= self.config.max_room_size {
                tracing::warn!(room_id = room_id, "Room full");
                return Err(RelayError::RoomFull {
                    room_id: room_id.to_string(),
                    max: self.config.max_room_size,
                });
            }

            room.members.insert(
                conn_id,
                Member {
                    peer_id: peer_id.to_string(),
                    sender,
                },
            );

            let notified = room.broadcast(
                conn_id,
                &ServerMessage::UserConnected {
                    peer_id: peer_id.to_string(),
                },
            );

            tracing::info!(
                room_id = room_id,
                peer_id = peer_id,
                member_count = room.members.len(),
                "Peer joined room"
            );
            notified
        };

        if let Some(mut connection) = self.connections.get_mut(&conn_id) {
            connection.membership = Some(requested.clone());
        }
        self.ack_join(conn_id, &requested);

        Ok(JoinOutcome::Joined { notified })
    }

    /// Rebroadcast a media toggle to the other members of the room.
    ///
    /// The claimed media state is not tracked. The claimed peer id must be
    /// the one this connection joined the room with.
    pub fn toggle(
        &self,
        conn_id: ConnectionId,
        kind: ToggleKind,
        peer_id: &str,
        room_id: &str,
    ) -> Result<usize, RelayError> {
        RelayError::require(room_id, "room_id")?;
        RelayError::require(peer_id, "peer_id")?;
        self.check_bound(conn_id, room_id, peer_id)?;

        let delivered = self
            .rooms
            .get(room_id)
            .map(|room| room.broadcast(conn_id, &kind.broadcast(peer_id)))
            .unwrap_or(0);

        tracing::debug!(
            room_id = room_id,
            peer_id = peer_id,
            kind = ?kind,
            delivered = delivered,
            "Toggle relayed"
        );
        Ok(delivered)
    }

    /// Explicitly leave a room. Returns false when the connection had already
    /// left (the call is a no-op then).
    pub fn leave(
        &self,
        conn_id: ConnectionId,
        peer_id: &str,
        room_id: &str,
    ) -> Result<bool, RelayError> {
        RelayError::require(room_id, "room_id")?;
        RelayError::require(peer_id, "peer_id")?;

        match self.membership(conn_id) {
            None => {
                if !self.connections.contains_key(&conn_id) {
                    return Err(RelayError::UnknownConnection);
                }
                tracing::debug!(conn = %conn_id, room_id = room_id, "Repeated leave ignored");
                Ok(false)
            }
            Some(_) => {
                self.check_bound(conn_id, room_id, peer_id)?;
                Ok(self.leave_current(conn_id).is_some())
            }
        }
    }

    // ── Stats ─────────────────────────────────────────────────────────────

    /// Number of open connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Number of non-empty rooms.
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Number of room memberships across all rooms.
    pub fn member_count(&self) -> usize {
        self.rooms.iter().map(|room| room.members.len()).sum()
    }

    /// Peer ids currently bound to a room, sorted.
    pub fn room_members(&self, room_id: &str) -> Vec<String> {
        let mut peers: Vec<String> = self
            .rooms
            .get(room_id)
            .map(|room| room.members.values().map(|m| m.peer_id.clone()).collect())
            .unwrap_or_default();
        peers.sort();
        peers
    }

    // ── Internals ─────────────────────────────────────────────────────────

    fn check_bound(
        &self,
        conn_id: ConnectionId,
        room_id: &str,
        peer_id: &str,
    ) -> Result<(), RelayError> {
        let membership = self
            .membership(conn_id)
            .filter(|m| m.room_id == room_id)
            .ok_or_else(|| RelayError::NotInRoom(room_id.to_string()))?;

        if membership.peer_id != peer_id {
            return Err(RelayError::PeerMismatch {
                claimed: peer_id.to_string(),
                bound: membership.peer_id,
            });
        }
        Ok(())
    }

    /// Clear the connection's membership and announce the departure.
    fn leave_current(&self, conn_id: ConnectionId) -> Option<Membership> {
        let membership = self
            .connections
            .get_mut(&conn_id)
            .and_then(|mut connection| connection.membership.take())?;

        self.remove_member(&membership, conn_id);
        Some(membership)
    }

    fn remove_member(&self, membership: &Membership, conn_id: ConnectionId) {
        let (remaining, created_at) = match self.rooms.get_mut(&membership.room_id) {
            Some(mut room) => {
                room.members.remove(&conn_id);
                room.broadcast(
                    conn_id,
                    &ServerMessage::UserLeave {
                        peer_id: membership.peer_id.clone(),
                    },
                );
                (room.members.len(), room.created_at)
            }
            None => return,
        };

        tracing::info!(
            room_id = membership.room_id.as_str(),
            peer_id = membership.peer_id.as_str(),
            remaining = remaining,
            "Peer left room"
        );

        if remaining == 0 {
            self.rooms
                .remove_if(&membership.room_id, |_, room| room.members.is_empty());
            tracing::debug!(
                room_id = membership.room_id.as_str(),
                lifetime_secs = (Utc::now() - created_at).num_seconds(),
                "Removed empty room"
            );
        }
    }

    fn ack_join(&self, conn_id: ConnectionId, membership: &Membership) {
        self.send_to(
            conn_id,
            ServerMessage::Joined {
                room_id: membership.room_id.clone(),
                peer_id: membership.peer_id.clone(),
            },
        );
    }
}
