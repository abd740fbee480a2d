//! # Chat Channels
//!
//! One data channel per peer session, plus the local message log.
//!
//! ## Channel Lifecycle
//!
//! ```text
//!   attach ──► Connecting ──ChannelOpen──► Open ──ChannelClosed──► Closed
//!                  │                        ▲
//!                  └── sends are queued ────┘ flushed in order on open
//!
//!   ChannelOpen before attach ──► Open
//!   cleanup (any state) ──► discarded
//! ```
//!
//! Only the side that placed the call opens the channel; the answering side
//! waits for the transport to report it.
//!
//! ## Payload
//!
//! Messages travel as JSON:
//!
//! ```json
//! {"type":"chat","id":"…","sender_id":"…","sender_name":"…","text":"…","timestamp":0}
//! ```
//!
//! A payload that is not valid JSON is taken as the message text.

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::capability::PeerTransport;
use crate::error::{Error, Result};
use crate::session::Direction;
use crate::time::now_timestamp_millis;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelState {
    Connecting,
    Open,
    Closed,
}

#[derive(Debug)]
pub struct ChatChannel {
    pub remote_id: String,
    pub state: ChannelState,
    /// Serialized payloads waiting for the channel to open.
    pending: VecDeque<String>,
}

impl ChatChannel {
    fn new(remote_id: &str, state: ChannelState) -> Self {
        Self {
            remote_id: remote_id.to_string(),
            state,
            pending: VecDeque::new(),
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// One entry of the local message log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    /// Unique within this client.
    pub id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub text: String,
    /// Unix millis: send time for own messages, receipt time otherwise.
    pub timestamp: i64,
    pub own: bool,
}

/// Chat message as carried on a data channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatPayload {
    pub id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub text: String,
    pub timestamp: i64,
}

/// Everything that can travel on a data channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DataMessage {
    Chat(ChatPayload),
}

pub struct ChatManager {
    local_id: Option<String>,
    display_name: String,
    max_len: usize,
    channels: HashMap<String, ChatChannel>,
    log: Vec<ChatMessage>,
}

impl ChatManager {
    pub fn new(display_name: impl Into<String>, max_len: usize) -> Self {
        Self {
            local_id: None,
            display_name: display_name.into(),
            max_len,
            channels: HashMap::new(),
            log: Vec::new(),
        }
    }

    pub fn set_local_id(&mut self, peer_id: &str) {
        self.local_id = Some(peer_id.to_string());
    }

    /// Bind a channel to the session with `remote`. The initiator opens it;
    /// the answerer waits for `on_channel_open`.
    pub fn attach(&mut self, remote: &str, direction: Direction, transport: &mut dyn PeerTransport) {
        if let Some(channel) = self.channels.get(remote) {
            if channel.state != ChannelState::Closed {
                tracing::debug!(remote = remote, state = ?channel.state, "Channel already attached");
                return;
            }
        }

        self.channels
            .insert(remote.to_string(), ChatChannel::new(remote, ChannelState::Connecting));
        if direction == Direction::Initiated {
            transport.open_data_channel(remote);
        }
        tracing::debug!(remote = remote, ?direction, "Chat channel attached");
    }

    /// The transport reports the channel to `remote` ready. Flushes the queue.
    pub fn on_channel_open(&mut self, remote: &str, transport: &mut dyn PeerTransport) {
        let channel = self
            .channels
            .entry(remote.to_string())
            .or_insert_with(|| ChatChannel::new(remote, ChannelState::Connecting));
        channel.state = ChannelState::Open;
        tracing::info!(remote = remote, queued = channel.pending.len(), "Chat channel open");

        while let Some(payload) = channel.pending.pop_front() {
            if let Err(e) = transport.send_data(remote, &payload) {
                tracing::warn!(remote = remote, error = %e, "Dropped queued chat payload");
            }
        }
    }

    pub fn on_channel_closed(&mut self, remote: &str) {
        if let Some(channel) = self.channels.get_mut(remote) {
            channel.state = ChannelState::Closed;
            channel.pending.clear();
            tracing::info!(remote = remote, "Chat channel closed");
        }
    }

    /// Send `text` to every peer. Open channels transmit now, connecting
    /// ones queue it. Fails if no channel is open.
    pub fn send(&mut self, text: &str, transport: &mut dyn PeerTransport) -> Result<ChatMessage> {
        let text = text.trim();
        if text.is_empty() {
            return Err(Error::EmptyMessage);
        }
        let len = text.chars().count();
        if len > self.max_len {
            return Err(Error::MessageTooLong {
                len,
                max: self.max_len,
            });
        }
        if !self.is_connected() {
            return Err(Error::NoOpenChannel);
        }
        let sender_id = self.local_id.clone().ok_or(Error::IdentityUnavailable)?;

        let message = ChatMessage {
            id: Uuid::new_v4().to_string(),
            sender_id: sender_id.clone(),
            sender_name: self.display_name.clone(),
            text: text.to_string(),
            timestamp: now_timestamp_millis(),
            own: true,
        };
        let payload = serde_json::to_string(&DataMessage::Chat(ChatPayload {
            id: message.id.clone(),
            sender_id,
            sender_name: message.sender_name.clone(),
            text: message.text.clone(),
            timestamp: message.timestamp,
        }))?;

        for (remote, channel) in self.channels.iter_mut() {
            match channel.state {
                ChannelState::Open => {
                    if let Err(e) = transport.send_data(remote, &payload) {
                        tracing::warn!(remote = remote.as_str(), error = %e, "Chat send failed");
                    }
                }
                ChannelState::Connecting => channel.pending.push_back(payload.clone()),
                ChannelState::Closed => {}
            }
        }

        self.log.push(message.clone());
        Ok(message)
    }

    /// Append a message received from `remote`. Returns it, or `None` if the
    /// payload carried no text.
    pub fn on_receive(&mut self, remote: &str, payload: &str) -> Option<ChatMessage> {
        let (sender_name, text) = match serde_json::from_str::<DataMessage>(payload) {
            Ok(DataMessage::Chat(chat)) => {
                let name = if chat.sender_name.trim().is_empty() {
                    remote.to_string()
                } else {
                    chat.sender_name
                };
                (name, chat.text)
            }
            Err(_) => (remote.to_string(), payload.to_string()),
        };

        if text.trim().is_empty() {
            tracing::debug!(remote = remote, "Ignoring empty chat payload");
            return None;
        }

        let message = ChatMessage {
            id: Uuid::new_v4().to_string(),
            sender_id: remote.to_string(),
            sender_name,
            text,
            timestamp: now_timestamp_millis(),
            own: false,
        };
        self.log.push(message.clone());
        Some(message)
    }

    /// Close and discard the channel to `remote`. Returns true if one existed.
    pub fn cleanup(&mut self, remote: &str, transport: &mut dyn PeerTransport) -> bool {
        match self.channels.remove(remote) {
            Some(channel) => {
                if channel.state != ChannelState::Closed {
                    transport.close_data_channel(remote);
                }
                true
            }
            None => false,
        }
    }

    pub fn cleanup_all(&mut self, transport: &mut dyn PeerTransport) {
        let remotes: Vec<String> = self.channels.keys().cloned().collect();
        for remote in remotes {
            self.cleanup(&remote, transport);
        }
    }

    /// True iff at least one channel is open.
    pub fn is_connected(&self) -> bool {
        self.channels.values().any(|c| c.state == ChannelState::Open)
    }

    /// Peers with an open channel, sorted.
    pub fn connected_peers(&self) -> Vec<String> {
        let mut peers: Vec<String> = self
            .channels
            .values()
            .filter(|c| c.state == ChannelState::Open)
            .map(|c| c.remote_id.clone())
            .collect();
        peers.sort();
        peers
    }

    pub fn channel(&self, remote: &str) -> Option<&ChatChannel> {
        self.channels.get(remote)
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.log
    }
}
