//! Client configuration.
//!
//! Every field has a default, so a config can be deserialized from a partial
//! JSON document. Durations are stored as milliseconds.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default maximum chat message length, in characters.
pub const DEFAULT_MAX_MESSAGE_LEN: usize = 300;

/// Exponential backoff: `initial`, doubling per attempt, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffPolicy {
    pub initial_ms: u64,
    pub max_ms: u64,
    /// Attempts before giving up. 0 retries forever.
    pub max_attempts: u32,
}

impl BackoffPolicy {
    /// Identity bootstrap: 2 s doubling to 30 s, five attempts.
    pub const BOOTSTRAP: BackoffPolicy = BackoffPolicy {
        initial_ms: 2_000,
        max_ms: 30_000,
        max_attempts: 5,
    };

    /// Relay reconnection: 1 s doubling to 30 s, forever.
    pub const RELAY: BackoffPolicy = BackoffPolicy {
        initial_ms: 1_000,
        max_ms: 30_000,
        max_attempts: 0,
    };

    /// Delay to wait after the `attempt`-th failure (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(32);
        let ms = self
            .initial_ms
            .saturating_mul(1u64 << exp)
            .min(self.max_ms);
        Duration::from_millis(ms)
    }

    /// Whether another attempt may follow the `attempt`-th failure.
    pub fn allows_retry(&self, attempt: u32) -> bool {
        self.max_attempts == 0 || attempt < self.max_attempts
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::BOOTSTRAP
    }
}

/// Configuration for one room client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// WebSocket URL of the relay, e.g. `ws://localhost:8080/ws`
    pub relay_url: String,
    /// Room to join
    pub room_id: String,
    /// Name shown next to this client's chat messages
    pub display_name: String,
    pub max_message_len: usize,
    pub bootstrap_backoff: BackoffPolicy,
    pub relay_backoff: BackoffPolicy,
    /// Re-placements of a call this client initiated before giving up
    pub max_session_retries: u32,
    /// Capacity of the notice broadcast channel
    pub notice_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            relay_url: "ws://localhost:8080/ws".to_string(),
            room_id: String::new(),
            display_name: String::new(),
            max_message_len: DEFAULT_MAX_MESSAGE_LEN,
            bootstrap_backoff: BackoffPolicy::BOOTSTRAP,
            relay_backoff: BackoffPolicy::RELAY,
            max_session_retries: 1,
            notice_capacity: 64,
        }
    }
}

impl ClientConfig {
    /// Config for `room_id` on the relay at `relay_url`, everything else default.
    pub fn new(relay_url: impl Into<String>, room_id: impl Into<String>) -> Self {
        Self {
            relay_url: relay_url.into(),
            room_id: room_id.into(),
            ..Self::default()
        }
    }

    /// Set the chat display name.
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.room_id.trim().is_empty() {
            return Err(Error::InvalidConfig("room_id is empty".into()));
        }
        if !(self.relay_url.starts_with("ws://") || self.relay_url.starts_with("wss://")) {
            return Err(Error::InvalidConfig(format!(
                "relay_url must be a ws:// or wss:// URL, got '{}'",
                self.relay_url
            )));
        }
        if self.max_message_len == 0 {
            return Err(Error::InvalidConfig("max_message_len must be positive".into()));
        }
        if self.notice_capacity == 0 {
            return Err(Error::InvalidConfig("notice_capacity must be positive".into()));
        }
        Ok(())
    }
}
