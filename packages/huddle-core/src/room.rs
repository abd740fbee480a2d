//! # Room Client
//!
//! Owns everything one participant keeps about a room and is the single
//! place events are dispatched.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                            ROOM CLIENT                                  │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │   RelayEvent ─────┐                                                     │
//! │   TransportEvent ─┼──► handle() ──► Bootstrap    (identity, join)       │
//! │   MediaEvent ─────┤                 SessionTable (one per peer)         │
//! │   TimerEvent ─────┘                 PresenceStore (who, what state)     │
//! │                                     ChatManager  (channels, log)        │
//! │                                                                         │
//! │   UI ──► toggle_audio / toggle_video / send_chat / leave / snapshot     │
//! │                                                                         │
//! │   RoomNotice ──► broadcast subscribers                                  │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Existing members call a newcomer when the relay announces it; the newcomer
//! only answers. Nothing here awaits, so each event is applied completely
//! before the next one is looked at.

use std::time::Duration;

use serde::Serialize;
use tokio::sync::broadcast;

use crate::bootstrap::{Bootstrap, JoinState, Recovery};
use crate::capability::{
    LocalStream, MediaConstraints, MediaError, MediaEvent, MediaProvider, PeerTransport,
    RelaySink, TrackKind, TransportEvent,
};
use crate::chat::{ChatManager, ChatMessage};
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::presence::{PresenceStore, PresenceView};
use crate::relay_client::{RelayClientMessage, RelayEvent, RelayServerMessage, RelayStatus};
use crate::session::{ErrorOutcome, SessionTable, StreamOutcome};

// ── Events ────────────────────────────────────────────────────────────────────

/// Everything the room client reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Relay(RelayEvent),
    Transport(TransportEvent),
    Media(MediaEvent),
    Timer(TimerEvent),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerEvent {
    BootstrapRetry { attempt: u32 },
}

/// A timer the runtime should start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledTimer {
    pub delay: Duration,
    pub event: TimerEvent,
}

/// Non-fatal, user-facing events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomNotice {
    IdentityReady { peer_id: String },
    Joined { room_id: String, peer_id: String },
    /// A session became active and the peer is now visible.
    PeerJoined { peer_id: String },
    PeerLeft { peer_id: String },
    MessageReceived(ChatMessage),
    BootstrapFailed { message: String },
    RelayDegraded { reason: Option<String> },
    RelayRestored,
    RelayRejected { message: String },
    /// No camera; continuing with audio only.
    AudioOnlyFallback,
    MediaUnavailable { reason: String },
    SessionFailed { peer_id: String, attempts: u32 },
    Left,
}

/// Read-only view for rendering.
#[derive(Debug, Clone, Serialize)]
pub struct RoomSnapshot {
    pub room_id: String,
    pub local_peer_id: Option<String>,
    pub highlighted: Option<PresenceView>,
    pub others: Vec<PresenceView>,
    pub messages: Vec<ChatMessage>,
    pub chat_connected: bool,
    pub connected_peers: Vec<String>,
    pub relay_status: RelayStatus,
    pub left: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MediaState {
    Idle,
    Requesting(MediaConstraints),
    Ready,
    Unavailable,
}

// ── Room Client ───────────────────────────────────────────────────────────────

pub struct RoomClient {
    config: ClientConfig,
    relay: Box<dyn RelaySink>,
    transport: Box<dyn PeerTransport>,
    media: Box<dyn MediaProvider>,

    bootstrap: Bootstrap,
    sessions: SessionTable,
    presence: PresenceStore,
    chat: ChatManager,

    media_state: MediaState,
    local_stream: Option<LocalStream>,
    /// Peers announced before local media was ready; called once it is.
    deferred_calls: Vec<String>,
    /// Offers received before local media was ready; answered once it is.
    held_offers: Vec<String>,

    relay_status: RelayStatus,
    notices: broadcast::Sender<RoomNotice>,
    scheduled: Vec<ScheduledTimer>,
    left: bool,
}

impl RoomClient {
    pub fn new(
        config: ClientConfig,
        relay: Box<dyn RelaySink>,
        transport: Box<dyn PeerTransport>,
        media: Box<dyn MediaProvider>,
    ) -> Result<Self> {
        config.validate()?;
        let (notices, _) = broadcast::channel(config.notice_capacity);

        Ok(Self {
            bootstrap: Bootstrap::new(config.room_id.clone(), config.bootstrap_backoff),
            sessions: SessionTable::new(config.max_session_retries),
            presence: PresenceStore::new(),
            chat: ChatManager::new(config.display_name.clone(), config.max_message_len),
            config,
            relay,
            transport,
            media,
            media_state: MediaState::Idle,
            local_stream: None,
            deferred_calls: Vec::new(),
            held_offers: Vec::new(),
            relay_status: RelayStatus::Connecting,
            notices,
            scheduled: Vec::new(),
            left: false,
        })
    }

    /// Request the identity and local media.
    pub fn start(&mut self) -> Result<()> {
        if self.left {
            return Err(Error::TornDown);
        }
        self.bootstrap.activate(self.transport.as_mut())?;
        if self.media_state == MediaState::Idle {
            self.request_media(MediaConstraints::AUDIO_VIDEO);
        }
        Ok(())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RoomNotice> {
        self.notices.subscribe()
    }

    pub(crate) fn notice_sender(&self) -> broadcast::Sender<RoomNotice> {
        self.notices.clone()
    }

    /// Timers requested since the last call.
    pub fn take_scheduled(&mut self) -> Vec<ScheduledTimer> {
        std::mem::take(&mut self.scheduled)
    }

    // ── Dispatch ──────────────────────────────────────────────────────────

    pub fn handle(&mut self, event: ClientEvent) {
        if self.left {
            tracing::trace!(?event, "Event after leave ignored");
            return;
        }
        match event {
            ClientEvent::Relay(event) => self.handle_relay(event),
            ClientEvent::Transport(event) => self.handle_transport(event),
            ClientEvent::Media(event) => self.handle_media(event),
            ClientEvent::Timer(TimerEvent::BootstrapRetry { attempt }) => {
                self.bootstrap.on_retry_timer(attempt, self.transport.as_mut());
            }
        }
    }

    fn handle_relay(&mut self, event: RelayEvent) {
        match event {
            RelayEvent::Connected => {
                if self.relay_status == RelayStatus::Disconnected {
                    self.notify(RoomNotice::RelayRestored);
                }
                self.relay_status = RelayStatus::Connected;
                self.bootstrap.on_relay_connected(self.relay.as_ref());
            }

            RelayEvent::Disconnected { reason } => {
                if self.relay_status == RelayStatus::Connected {
                    tracing::warn!(reason = reason.as_deref().unwrap_or("closed"), "Relay lost");
                    self.notify(RoomNotice::RelayDegraded { reason });
                }
                self.relay_status = RelayStatus::Disconnected;
                self.bootstrap.on_relay_disconnected();
            }

            RelayEvent::Message(message) => match message {
                RelayServerMessage::Joined { room_id, peer_id } => {
                    self.bootstrap.on_join_confirmed(&room_id, &peer_id);
                    self.notify(RoomNotice::Joined { room_id, peer_id });
                }
                RelayServerMessage::UserConnected { peer_id } => self.on_peer_announced(&peer_id),
                RelayServerMessage::UserToggleAudio { peer_id } => {
                    self.presence.apply_toggle(&peer_id, TrackKind::Audio);
                }
                RelayServerMessage::UserToggleVideo { peer_id } => {
                    self.presence.apply_toggle(&peer_id, TrackKind::Video);
                }
                RelayServerMessage::UserLeave { peer_id } => {
                    self.teardown_peer(&peer_id);
                }
                RelayServerMessage::Pong => {}
                RelayServerMessage::Error { message } => {
                    tracing::warn!(message = message.as_str(), "Relay rejected a request");
                    self.notify(RoomNotice::RelayRejected { message });
                }
            },
        }
    }

    fn handle_transport(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Open { peer_id } => {
                let first = self.bootstrap.peer_id().is_none();
                self.bootstrap.on_identity(&peer_id, self.relay.as_ref());
                if let (true, Some(id)) = (first, self.bootstrap.peer_id()) {
                    let id = id.to_string();
                    self.presence.set_local_id(&id);
                    self.chat.set_local_id(&id);
                    self.notify(RoomNotice::IdentityReady { peer_id: id });
                }
            }

            TransportEvent::IncomingCall { remote } => {
                if self.is_local(&remote) {
                    return;
                }
                match self.local_stream.as_ref() {
                    Some(local) => {
                        self.sessions
                            .answer(&remote, &local.handle, self.transport.as_mut());
                    }
                    None => {
                        tracing::debug!(remote = remote.as_str(), "Holding offer until media is ready");
                        push_unique(&mut self.held_offers, remote);
                    }
                }
            }

            TransportEvent::RemoteStream { remote, stream } => {
                match self.sessions.on_remote_stream(&remote, stream.clone()) {
                    StreamOutcome::Activated(direction) => {
                        self.presence.upsert_remote(&remote, stream);
                        self.chat.attach(&remote, direction, self.transport.as_mut());
                        self.notify(RoomNotice::PeerJoined { peer_id: remote });
                    }
                    StreamOutcome::Replaced => {
                        self.presence.upsert_remote(&remote, stream);
                    }
                    StreamOutcome::Unknown => {}
                }
            }

            TransportEvent::SessionClosed { remote } => {
                self.teardown_peer(&remote);
            }

            TransportEvent::SessionError { remote, error } => {
                tracing::warn!(remote = remote.as_str(), error = error.as_str(), "Session error");
                match self.sessions.on_error(&remote, self.transport.as_mut()) {
                    ErrorOutcome::Retrying { .. } | ErrorOutcome::Unknown => {}
                    ErrorOutcome::Failed {
                        was_active: true, ..
                    } => {
                        self.teardown_peer(&remote);
                    }
                    ErrorOutcome::Failed {
                        attempts,
                        was_active: false,
                    } => {
                        self.chat.cleanup(&remote, self.transport.as_mut());
                        self.notify(RoomNotice::SessionFailed {
                            peer_id: remote,
                            attempts,
                        });
                    }
                }
            }

            // Channel events only count while a session with the peer exists.
            TransportEvent::ChannelOpen { remote } => {
                if !self.sessions.contains(&remote) {
                    tracing::debug!(remote = remote.as_str(), "Channel open without session ignored");
                    return;
                }
                self.chat.on_channel_open(&remote, self.transport.as_mut());
            }

            TransportEvent::ChannelMessage { remote, payload } => {
                if !self.sessions.contains(&remote) {
                    tracing::debug!(remote = remote.as_str(), "Chat payload without session dropped");
                    return;
                }
                if let Some(message) = self.chat.on_receive(&remote, &payload) {
                    self.notify(RoomNotice::MessageReceived(message));
                }
            }

            TransportEvent::ChannelClosed { remote } => {
                self.chat.on_channel_closed(&remote);
            }

            TransportEvent::Disconnected => {
                self.bootstrap.on_disconnected(self.transport.as_mut());
            }

            TransportEvent::Error { message } => match self.bootstrap.on_failure(&message) {
                Recovery::RetryAfter { delay, attempt } => {
                    self.scheduled.push(ScheduledTimer {
                        delay,
                        event: TimerEvent::BootstrapRetry { attempt },
                    });
                }
                Recovery::Exhausted(err) => {
                    self.notify(RoomNotice::BootstrapFailed {
                        message: err.to_string(),
                    });
                }
                Recovery::Ignored => {}
            },
        }
    }

    fn handle_media(&mut self, event: MediaEvent) {
        match event {
            MediaEvent::StreamReady(stream) => {
                tracing::info!(stream = %stream.handle, video = stream.video_enabled, "Local media ready");
                self.media_state = MediaState::Ready;
                self.presence.set_local_stream(&stream);
                let handle = stream.handle.clone();
                self.local_stream = Some(stream);

                for remote in std::mem::take(&mut self.held_offers) {
                    self.sessions.answer(&remote, &handle, self.transport.as_mut());
                }
                for remote in std::mem::take(&mut self.deferred_calls) {
                    self.sessions.initiate(&remote, &handle, self.transport.as_mut());
                }
            }

            MediaEvent::StreamFailed { constraints, error } => {
                if error == MediaError::NotFound && constraints.video {
                    tracing::warn!("No camera found, falling back to audio only");
                    self.request_media(MediaConstraints::AUDIO_ONLY);
                    self.notify(RoomNotice::AudioOnlyFallback);
                } else {
                    tracing::error!(error = %error, "Local media unavailable");
                    self.media_state = MediaState::Unavailable;
                    self.notify(RoomNotice::MediaUnavailable {
                        reason: error.to_string(),
                    });
                }
            }
        }
    }

    fn request_media(&mut self, constraints: MediaConstraints) {
        self.media_state = MediaState::Requesting(constraints);
        self.media.request_stream(constraints);
    }

    /// The relay announced a newcomer; call it once local media is ready.
    fn on_peer_announced(&mut self, remote: &str) {
        if self.is_local(remote) || self.sessions.contains(remote) {
            return;
        }
        match self.local_stream.as_ref() {
            Some(local) => {
                self.sessions
                    .initiate(remote, &local.handle, self.transport.as_mut());
            }
            None => {
                tracing::debug!(remote = remote, "Deferring call until media is ready");
                push_unique(&mut self.deferred_calls, remote.to_string());
            }
        }
    }

    /// Remove every trace of `remote`: channel, presence entry, session.
    /// Returns false if there was nothing to remove.
    fn teardown_peer(&mut self, remote: &str) -> bool {
        self.deferred_calls.retain(|p| p != remote);
        self.held_offers.retain(|p| p != remote);

        let had_channel = self.chat.cleanup(remote, self.transport.as_mut());
        let had_entry = self.presence.remove(remote).is_some();
        let had_session = self.sessions.close(remote, self.transport.as_mut()).is_some();

        if had_entry || had_session {
            tracing::info!(remote = remote, "Peer removed");
            self.notify(RoomNotice::PeerLeft {
                peer_id: remote.to_string(),
            });
        }
        had_channel || had_entry || had_session
    }

    // ── UI Actions ────────────────────────────────────────────────────────

    /// Flip the local audio track. Returns whether audio is now enabled.
    pub fn toggle_audio(&mut self) -> Result<bool> {
        self.toggle_track(TrackKind::Audio)
    }

    /// Flip the local video track. Returns whether video is now enabled.
    pub fn toggle_video(&mut self) -> Result<bool> {
        self.toggle_track(TrackKind::Video)
    }

    fn toggle_track(&mut self, kind: TrackKind) -> Result<bool> {
        if self.left {
            return Err(Error::TornDown);
        }
        let Some(local) = self.local_stream.as_mut() else {
            return Err(Error::MediaNotReady);
        };

        let toggled = match kind {
            TrackKind::Audio => self.media.toggle_audio_track(),
            TrackKind::Video => self.media.toggle_video_track(),
        };
        let enabled = toggled.ok_or_else(|| {
            Error::MediaUnavailable(format!("no local {:?} track", kind).to_lowercase())
        })?;

        match kind {
            TrackKind::Audio => local.audio_enabled = enabled,
            TrackKind::Video => local.video_enabled = enabled,
        }
        self.presence.set_local_track(kind, enabled);

        match self.bootstrap.peer_id() {
            Some(peer_id) if self.relay.is_connected() => {
                let peer_id = peer_id.to_string();
                let room_id = self.config.room_id.clone();
                self.relay.send(match kind {
                    TrackKind::Audio => RelayClientMessage::UserToggleAudio { peer_id, room_id },
                    TrackKind::Video => RelayClientMessage::UserToggleVideo { peer_id, room_id },
                });
            }
            _ => tracing::debug!(?kind, "Toggle not announced, relay or identity unavailable"),
        }
        Ok(enabled)
    }

    /// Ask for local media again after it became unavailable. Returns false
    /// if media is not in the failed state.
    pub fn retry_media(&mut self) -> Result<bool> {
        if self.left {
            return Err(Error::TornDown);
        }
        if self.media_state != MediaState::Unavailable {
            return Ok(false);
        }
        tracing::info!("Retrying local media");
        self.request_media(MediaConstraints::AUDIO_VIDEO);
        Ok(true)
    }

    /// Send a chat message to every connected peer.
    pub fn send_chat(&mut self, text: &str) -> Result<ChatMessage> {
        if self.left {
            return Err(Error::TornDown);
        }
        self.chat.send(text, self.transport.as_mut())
    }

    /// Leave the room and release everything. Safe to call more than once;
    /// returns false if already left.
    pub fn leave(&mut self) -> bool {
        if self.left {
            return false;
        }
        self.left = true;

        if let Some(peer_id) = self.bootstrap.peer_id() {
            if self.bootstrap.join_state() != JoinState::NotSent && self.relay.is_connected() {
                self.relay.send(RelayClientMessage::UserLeave {
                    peer_id: peer_id.to_string(),
                    room_id: self.config.room_id.clone(),
                });
            }
        }

        self.chat.cleanup_all(self.transport.as_mut());
        self.sessions.close_all(self.transport.as_mut());
        self.presence.clear_remotes();
        self.deferred_calls.clear();
        self.held_offers.clear();
        self.scheduled.clear();

        if self.media_state != MediaState::Idle {
            self.media.release();
        }
        self.bootstrap.teardown(self.transport.as_mut());

        tracing::info!(room_id = self.config.room_id.as_str(), "Left room");
        self.notify(RoomNotice::Left);
        true
    }

    pub fn snapshot(&self) -> RoomSnapshot {
        RoomSnapshot {
            room_id: self.config.room_id.clone(),
            local_peer_id: self.bootstrap.peer_id().map(str::to_string),
            highlighted: self.presence.highlighted(),
            others: self.presence.others(),
            messages: self.chat.messages().to_vec(),
            chat_connected: self.chat.is_connected(),
            connected_peers: self.chat.connected_peers(),
            relay_status: self.relay_status,
            left: self.left,
        }
    }

    // ── Accessors ─────────────────────────────────────────────────────────

    pub fn peer_id(&self) -> Option<&str> {
        self.bootstrap.peer_id()
    }

    pub fn room_id(&self) -> &str {
        &self.config.room_id
    }

    pub fn relay_status(&self) -> RelayStatus {
        self.relay_status
    }

    pub fn is_left(&self) -> bool {
        self.left
    }

    pub fn sessions(&self) -> &SessionTable {
        &self.sessions
    }

    pub fn presence(&self) -> &PresenceStore {
        &self.presence
    }

    pub fn chat(&self) -> &ChatManager {
        &self.chat
    }

    fn is_local(&self, peer_id: &str) -> bool {
        self.bootstrap.peer_id() == Some(peer_id)
    }

    fn notify(&self, notice: RoomNotice) {
        // No subscribers is fine.
        let _ = self.notices.send(notice);
    }
}

impl Drop for RoomClient {
    fn drop(&mut self) {
        self.leave();
    }
}

fn push_unique(list: &mut Vec<String>, peer_id: String) {
    if !list.contains(&peer_id) {
        list.push(peer_id);
    }
}
