//! Relay protocol message definitions.
//!
//! The relay speaks a small JSON-over-WebSocket protocol. Every frame is a
//! text frame carrying one object with a `type` tag. Event names follow the
//! room wire vocabulary (`join-room`, `user-connected`, `user-toggle-audio`,
//! ...); field names are snake_case.
//!
//! The relay never carries media or session negotiation. It only fans out
//! presence and media-toggle notices to the other members of a room.

use serde::{Deserialize, Serialize};

// ── Client → Relay ────────────────────────────────────────────────────────────

/// Messages sent from a client to the relay server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Bind this connection to a room under the given peer id.
    /// Other members receive `user-connected`.
    JoinRoom { room_id: String, peer_id: String },

    /// The sender flipped its local audio track.
    UserToggleAudio { peer_id: String, room_id: String },

    /// The sender flipped its local video track.
    UserToggleVideo { peer_id: String, room_id: String },

    /// Explicitly leave the room. Other members receive `user-leave`.
    UserLeave { peer_id: String, room_id: String },

    /// Application-level keep-alive.
    Ping,
}

impl ClientMessage {
    /// Wire name of the event, used in logs and error messages.
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::JoinRoom { .. } => "join-room",
            Self::UserToggleAudio { .. } => "user-toggle-audio",
            Self::UserToggleVideo { .. } => "user-toggle-video",
            Self::UserLeave { .. } => "user-leave",
            Self::Ping => "ping",
        }
    }
}

// ── Relay → Client ────────────────────────────────────────────────────────────

/// Messages sent from the relay server to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// A new peer joined a room this connection is bound to.
    UserConnected { peer_id: String },

    /// A room member toggled audio.
    UserToggleAudio { peer_id: String },

    /// A room member toggled video.
    UserToggleVideo { peer_id: String },

    /// A room member left, explicitly or by disconnecting.
    UserLeave { peer_id: String },

    /// Acknowledgement of a `join-room`, sent to the joiner only.
    Joined { room_id: String, peer_id: String },

    /// Keep-alive response.
    Pong,

    /// A request from this connection was rejected. Never broadcast.
    Error { message: String },
}

// ── Supporting Types ──────────────────────────────────────────────────────────

/// Which media track a toggle refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleKind {
    Audio,
    Video,
}

impl ToggleKind {
    /// Build the rebroadcast event for this toggle.
    pub fn broadcast(self, peer_id: &str) -> ServerMessage {
        match self {
            Self::Audio => ServerMessage::UserToggleAudio {
                peer_id: peer_id.to_string(),
            },
            Self::Video => ServerMessage::UserToggleVideo {
                peer_id: peer_id.to_string(),
            },
        }
    }
}
