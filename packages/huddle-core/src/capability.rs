//! Capabilities the room client drives but does not implement.
//!
//! ```text
//! ┌──────────────┐  request_stream / toggle_*   ┌────────────────┐
//! │              │─────────────────────────────►│ MediaProvider  │──► MediaEvent
//! │              │                              └────────────────┘
//! │  RoomClient  │  open / call / answer / ...  ┌────────────────┐
//! │              │─────────────────────────────►│ PeerTransport  │──► TransportEvent
//! │              │                              └────────────────┘
//! │              │  join-room / toggles / leave ┌────────────────┐
//! │              │─────────────────────────────►│   RelaySink    │──► RelayEvent
//! └──────────────┘                              └────────────────┘
//! ```
//!
//! Calls never block and never report results inline (apart from the track
//! toggles and `send_data`). Outcomes come back later as events, delivered to
//! the room client by its runtime.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::Result;
use crate::relay_client::RelayClientMessage;

// ── Shared Types ──────────────────────────────────────────────────────────────

/// Opaque reference to a media stream owned by the media layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamHandle(pub String);

impl fmt::Display for StreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which media track an operation refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackKind {
    Audio,
    Video,
}

/// The local capture stream and the actual state of its tracks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalStream {
    pub handle: StreamHandle,
    pub audio_enabled: bool,
    /// False when the stream has no video track or it is disabled.
    pub video_enabled: bool,
}

/// What to capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
}

impl MediaConstraints {
    pub const AUDIO_VIDEO: MediaConstraints = MediaConstraints {
        audio: true,
        video: true,
    };

    pub const AUDIO_ONLY: MediaConstraints = MediaConstraints {
        audio: true,
        video: false,
    };
}

/// Why local capture failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    /// No device matches the constraints (e.g. no camera).
    #[error("no matching capture device")]
    NotFound,

    #[error("capture permission denied")]
    PermissionDenied,

    #[error("{0}")]
    Other(String),
}

// ── Media ─────────────────────────────────────────────────────────────────────

/// Local capture.
pub trait MediaProvider: Send {
    /// Start acquiring a stream. Answers with `MediaEvent::StreamReady` or
    /// `MediaEvent::StreamFailed`.
    fn request_stream(&mut self, constraints: MediaConstraints);

    /// Flip the local audio track. Returns the new enabled state, or `None`
    /// if there is no audio track.
    fn toggle_audio_track(&mut self) -> Option<bool>;

    /// Flip the local video track. Returns the new enabled state, or `None`
    /// if there is no video track.
    fn toggle_video_track(&mut self) -> Option<bool>;

    /// Stop capture and release devices.
    fn release(&mut self);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaEvent {
    StreamReady(LocalStream),
    StreamFailed {
        constraints: MediaConstraints,
        error: MediaError,
    },
}

// ── Peer Transport ────────────────────────────────────────────────────────────

/// The peer-connection capability: identity, media sessions and data
/// channels, all addressed by remote peer id.
pub trait PeerTransport: Send {
    /// Connect to the signaling backend and request a fresh identity.
    /// Answers with `TransportEvent::Open` or `TransportEvent::Error`.
    fn open(&mut self);

    /// Re-establish the backend connection, keeping the current identity.
    fn reconnect(&mut self);

    /// Place a media call to `remote`.
    fn call(&mut self, remote: &str, stream: &StreamHandle);

    /// Answer an incoming call from `remote`.
    fn answer(&mut self, remote: &str, stream: &StreamHandle);

    /// Open a data channel on the session with `remote`.
    fn open_data_channel(&mut self, remote: &str);

    /// Send a text payload on the data channel to `remote`.
    fn send_data(&mut self, remote: &str, payload: &str) -> Result<()>;

    fn close_session(&mut self, remote: &str);

    fn close_data_channel(&mut self, remote: &str);

    /// Release the identity and every session.
    fn destroy(&mut self);
}

/// Events reported by a `PeerTransport`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The identity is ready.
    Open { peer_id: String },
    /// `remote` offers a media session.
    IncomingCall { remote: String },
    /// The media stream of `remote` arrived on our session with it.
    RemoteStream { remote: String, stream: StreamHandle },
    SessionClosed { remote: String },
    SessionError { remote: String, error: String },
    ChannelOpen { remote: String },
    ChannelMessage { remote: String, payload: String },
    ChannelClosed { remote: String },
    /// Lost the signaling backend. The identity is still valid.
    Disconnected,
    /// Capability-level failure (identity or backend).
    Error { message: String },
}

// ── Relay ─────────────────────────────────────────────────────────────────────

/// Outbound side of the relay connection.
pub trait RelaySink: Send {
    fn is_connected(&self) -> bool;

    /// Queue a message for the relay. Returns false if the connection is
    /// gone for good.
    fn send(&self, message: RelayClientMessage) -> bool;
}
