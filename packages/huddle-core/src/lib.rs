//! # Huddle Core
//!
//! Client side of a small-group video room: identity bootstrap, room join
//! through the signaling relay, one media session per remote peer, presence
//! and text chat over per-peer data channels.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         HUDDLE CORE MODULES                             │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────┐  ┌──────────────┐    │
//! │  │  Bootstrap  │  │   Session   │  │  Presence   │  │     Chat     │    │
//! │  │             │  │             │  │             │  │              │    │
//! │  │ - Identity  │  │ - Call      │  │ - Local     │  │ - Channels   │    │
//! │  │ - Backoff   │  │ - Answer    │  │ - Remotes   │  │ - Broadcast  │    │
//! │  │ - Join      │  │ - Retry     │  │ - Toggles   │  │ - Log        │    │
//! │  └──────┬──────┘  └──────┬──────┘  └──────┬──────┘  └──────┬───────┘    │
//! │         │                │                │                │            │
//! │         └────────────────┴───────┬────────┴────────────────┘            │
//! │                                  │                                      │
//! │                          ┌───────▼───────┐                              │
//! │                          │  RoomClient   │◄──── RoomRuntime (tokio)     │
//! │                          └───────┬───────┘                              │
//! │                                  │                                      │
//! │  ┌──────────────────┐   ┌────────▼─────────┐   ┌──────────────────┐     │
//! │  │  MediaProvider   │   │  PeerTransport   │   │  RelayConnection │     │
//! │  │  (capture)       │   │  (peer sessions) │   │  (WebSocket)     │     │
//! │  └──────────────────┘   └──────────────────┘   └──────────────────┘     │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Hierarchy
//!
//! - [`error`] - Error type for the whole library
//! - [`config`] - Client configuration and backoff policies
//! - [`capability`] - Media, peer transport and relay seams
//! - [`relay_client`] - Reconnecting WebSocket link to the relay
//! - [`bootstrap`] - Identity acquisition and room join
//! - [`session`] - Per-peer media sessions
//! - [`presence`] - Who is in the room and their track state
//! - [`chat`] - Data channels and the message log
//! - [`room`] - The event dispatcher tying it together
//! - [`runtime`] - Runs a room on a tokio task

pub mod bootstrap;
pub mod capability;
pub mod chat;
pub mod config;
pub mod error;
pub mod presence;
pub mod relay_client;
pub mod room;
pub mod runtime;
pub mod session;
pub mod time;

#[cfg(test)]
mod mesh_tests;
#[cfg(test)]
mod testing;

// ============================================================================
// RE-EXPORTS
// ============================================================================

pub use capability::{
    LocalStream, MediaConstraints, MediaError, MediaEvent, MediaProvider, PeerTransport,
    RelaySink, StreamHandle, TrackKind, TransportEvent,
};
pub use chat::ChatMessage;
pub use config::{BackoffPolicy, ClientConfig};
pub use error::{Error, Result};
pub use presence::PresenceView;
pub use relay_client::{RelayConnection, RelayEvent, RelayStatus};
pub use room::{ClientEvent, RoomClient, RoomNotice, RoomSnapshot};
pub use runtime::{RoomHandle, RoomRuntime};

/// Returns the version of Huddle Core
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
