//! # Identity & Transport Bootstrap
//!
//! Obtains the peer identity from the transport and joins the room with it,
//! exactly once per client lifetime.
//!
//! ## Flow
//!
//! ```text
//!   activate ──► open() ──► Opening ──Open(peer_id)──► Ready ──► join-room
//!                              │                          │
//!                        Error │                          │ Disconnected
//!                              ▼                          ▼
//!                   retry after backoff            reconnect() (same id)
//!                   or BootstrapFailed
//! ```
//!
//! The join needs both the identity and an open relay connection; whichever
//! arrives second sends it. If the relay drops before confirming the join,
//! it is sent again on the next connection.

use std::time::Duration;

use crate::capability::{PeerTransport, RelaySink};
use crate::config::BackoffPolicy;
use crate::error::{Error, Result};
use crate::relay_client::RelayClientMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapState {
    Idle,
    /// Waiting for the transport to open. `attempt` is 1-based.
    Opening { attempt: u32 },
    /// Attempt `attempt` failed; a retry timer is pending.
    Backoff { attempt: u32 },
    Ready,
    /// Identity known, backend connection being re-established.
    Reconnecting { attempt: u32 },
    Failed,
    TornDown,
}

/// Whether and how the join reached the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinState {
    NotSent,
    Sent,
    Confirmed,
}

/// What the caller should do after a capability failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recovery {
    /// Fire `on_retry_timer(attempt)` after `delay`.
    RetryAfter { delay: Duration, attempt: u32 },
    /// No more attempts.
    Exhausted(Error),
    Ignored,
}

pub struct Bootstrap {
    room_id: String,
    backoff: BackoffPolicy,
    state: BootstrapState,
    peer_id: Option<String>,
    join: JoinState,
}

impl Bootstrap {
    pub fn new(room_id: impl Into<String>, backoff: BackoffPolicy) -> Self {
        Self {
            room_id: room_id.into(),
            backoff,
            state: BootstrapState::Idle,
            peer_id: None,
            join: JoinState::NotSent,
        }
    }

    /// Request an identity. Only the first call does anything.
    pub fn activate(&mut self, transport: &mut dyn PeerTransport) -> Result<()> {
        match self.state {
            BootstrapState::TornDown => Err(Error::TornDown),
            BootstrapState::Idle => {
                self.state = BootstrapState::Opening { attempt: 1 };
                tracing::info!(room_id = self.room_id.as_str(), "Requesting peer identity");
                transport.open();
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// The transport produced `peer_id`. Sends the join if the relay is up.
    pub fn on_identity(&mut self, peer_id: &str, relay: &dyn RelaySink) {
        if self.state == BootstrapState::TornDown {
            return;
        }
        match self.peer_id.as_deref() {
            Some(current) if current != peer_id => {
                tracing::warn!(
                    current = current,
                    offered = peer_id,
                    "Transport offered a new identity, keeping the first"
                );
            }
            Some(_) => {}
            None => {
                tracing::info!(peer_id = peer_id, "Peer identity ready");
                self.peer_id = Some(peer_id.to_string());
            }
        }
        self.state = BootstrapState::Ready;
        self.try_join(relay);
    }

    /// The relay connection (re)opened. Sends the join unless it already
    /// went out on this connection or was confirmed.
    pub fn on_relay_connected(&mut self, relay: &dyn RelaySink) {
        if self.join == JoinState::NotSent {
            self.try_join(relay);
        }
    }

    /// The relay connection dropped. An unconfirmed join is sent again on
    /// the next connection.
    pub fn on_relay_disconnected(&mut self) {
        if self.join == JoinState::Sent {
            tracing::info!("Relay dropped before confirming the join, will rejoin");
            self.join = JoinState::NotSent;
        }
    }

    /// The relay acknowledged a join.
    pub fn on_join_confirmed(&mut self, room_id: &str, peer_id: &str) {
        if room_id == self.room_id && self.peer_id.as_deref() == Some(peer_id) {
            self.join = JoinState::Confirmed;
            tracing::info!(room_id = room_id, peer_id = peer_id, "Join confirmed");
        }
    }

    /// Send the join if identity and relay are both available and it has
    /// not been sent. Returns true if sent now.
    fn try_join(&mut self, relay: &dyn RelaySink) -> bool {
        if self.join != JoinState::NotSent || self.state == BootstrapState::TornDown {
            return false;
        }
        let Some(peer_id) = self.peer_id.clone() else {
            return false;
        };
        if !relay.is_connected() {
            tracing::debug!("Relay not connected, deferring join");
            return false;
        }

        let sent = relay.send(RelayClientMessage::JoinRoom {
            room_id: self.room_id.clone(),
            peer_id,
        });
        if sent {
            self.join = JoinState::Sent;
        }
        sent
    }

    /// A capability-level failure.
    pub fn on_failure(&mut self, reason: &str) -> Recovery {
        let attempt = match self.state {
            BootstrapState::Opening { attempt } | BootstrapState::Reconnecting { attempt } => {
                attempt
            }
            _ => {
                tracing::debug!(state = ?self.state, reason = reason, "Transport error ignored");
                return Recovery::Ignored;
            }
        };

        if self.backoff.allows_retry(attempt) {
            let delay = self.backoff.delay_for(attempt);
            self.state = BootstrapState::Backoff { attempt };
            tracing::warn!(
                attempt = attempt,
                backoff_ms = delay.as_millis() as u64,
                reason = reason,
                "Transport bootstrap failed, retrying"
            );
            Recovery::RetryAfter {
                delay,
                attempt: attempt + 1,
            }
        } else {
            self.state = BootstrapState::Failed;
            tracing::error!(attempts = attempt, reason = reason, "Transport bootstrap gave up");
            Recovery::Exhausted(Error::BootstrapFailed {
                attempts: attempt,
                reason: reason.to_string(),
            })
        }
    }

    /// A retry timer fired. Stale timers are ignored.
    pub fn on_retry_timer(&mut self, attempt: u32, transport: &mut dyn PeerTransport) {
        match self.state {
            BootstrapState::Backoff { attempt: failed } if failed + 1 == attempt => {}
            _ => return,
        }

        if self.peer_id.is_some() {
            self.state = BootstrapState::Reconnecting { attempt };
            transport.reconnect();
        } else {
            self.state = BootstrapState::Opening { attempt };
            transport.open();
        }
    }

    /// The transport lost its backend. Reconnect without a new identity.
    pub fn on_disconnected(&mut self, transport: &mut dyn PeerTransport) {
        if self.state == BootstrapState::Ready {
            tracing::info!("Transport disconnected, reconnecting");
            self.state = BootstrapState::Reconnecting { attempt: 1 };
            transport.reconnect();
        }
    }

    /// Release the capability. Returns false if already torn down.
    pub fn teardown(&mut self, transport: &mut dyn PeerTransport) -> bool {
        if self.state == BootstrapState::TornDown {
            return false;
        }
        let was_active = self.state != BootstrapState::Idle;
        self.state = BootstrapState::TornDown;
        if was_active {
            transport.destroy();
        }
        true
    }

    pub fn state(&self) -> BootstrapState {
        self.state
    }

    pub fn join_state(&self) -> JoinState {
        self.join
    }

    pub fn peer_id(&self) -> Option<&str> {
        self.peer_id.as_deref()
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn is_torn_down(&self) -> bool {
        self.state == BootstrapState::TornDown
    }
}
