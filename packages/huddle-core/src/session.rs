//! # Session Table
//!
//! One media session per remote peer, owned by this client.
//!
//! ## State Machine
//!
//! ```text
//!                 initiate / answer          remote stream
//!   (none) ─────────────────────► Pending ─────────────────► Active
//!                                    │  ▲                       │
//!                       error, retry │  │ re-call               │
//!                       left (init.) └──┘                       │
//!                                    │                          │
//!        close / error (exhausted)   ▼                          ▼
//!                                 (removed) ◄──── close / error ─┘
//! ```
//!
//! A closed session is removed from the table, so a second close for the
//! same peer finds nothing and does nothing.
//!
//! ## Retry
//!
//! Only sessions this client initiated are retried, up to `max_retries`
//! re-calls. The answering side never retries; the caller owns that.

use std::collections::HashMap;

use serde::Serialize;

use crate::capability::{PeerTransport, StreamHandle};

/// Who placed the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Initiated,
    Answered,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Pending,
    Active,
    Closed,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub remote_id: String,
    pub direction: Direction,
    pub local_stream: StreamHandle,
    pub remote_stream: Option<StreamHandle>,
    pub state: SessionState,
    /// Establishment attempts so far, starting at 1.
    pub attempts: u32,
}

/// Outcome of a remote stream arriving.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    /// The session went `pending → active`.
    Activated(Direction),
    /// An active session got a new stream.
    Replaced,
    /// No session with that peer.
    Unknown,
}

/// Outcome of a session error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorOutcome {
    /// The call was placed again.
    Retrying { attempt: u32 },
    /// The session was closed and removed.
    Failed {
        attempts: u32,
        /// It had reached `active` before failing.
        was_active: bool,
    },
    Unknown,
}

pub struct SessionTable {
    sessions: HashMap<String, Session>,
    max_retries: u32,
}

impl SessionTable {
    pub fn new(max_retries: u32) -> Self {
        Self {
            sessions: HashMap::new(),
            max_retries,
        }
    }

    /// Call `remote`. Returns false if a session with it already exists.
    pub fn initiate(
        &mut self,
        remote: &str,
        local_stream: &StreamHandle,
        transport: &mut dyn PeerTransport,
    ) -> bool {
        self.open(remote, Direction::Initiated, local_stream, transport)
    }

    /// Answer an offer from `remote`. Returns false if a session with it
    /// already exists.
    pub fn answer(
        &mut self,
        remote: &str,
        local_stream: &StreamHandle,
        transport: &mut dyn PeerTransport,
    ) -> bool {
        self.open(remote, Direction::Answered, local_stream, transport)
    }

    fn open(
        &mut self,
        remote: &str,
        direction: Direction,
        local_stream: &StreamHandle,
        transport: &mut dyn PeerTransport,
    ) -> bool {
        if let Some(existing) = self.sessions.get(remote) {
            tracing::debug!(
                remote = remote,
                existing = ?existing.direction,
                requested = ?direction,
                "Session already exists"
            );
            return false;
        }

        match direction {
            Direction::Initiated => transport.call(remote, local_stream),
            Direction::Answered => transport.answer(remote, local_stream),
        }
        self.sessions.insert(
            remote.to_string(),
            Session {
                remote_id: remote.to_string(),
                direction,
                local_stream: local_stream.clone(),
                remote_stream: None,
                state: SessionState::Pending,
                attempts: 1,
            },
        );
        tracing::info!(remote = remote, ?direction, "Session pending");
        true
    }

    pub fn on_remote_stream(&mut self, remote: &str, stream: StreamHandle) -> StreamOutcome {
        let Some(session) = self.sessions.get_mut(remote) else {
            tracing::debug!(remote = remote, "Stream for unknown session ignored");
            return StreamOutcome::Unknown;
        };

        session.remote_stream = Some(stream);
        match session.state {
            SessionState::Pending => {
                session.state = SessionState::Active;
                tracing::info!(remote = remote, direction = ?session.direction, "Session active");
                StreamOutcome::Activated(session.direction)
            }
            _ => StreamOutcome::Replaced,
        }
    }

    /// Handle an establishment or runtime error on the session with `remote`.
    pub fn on_error(&mut self, remote: &str, transport: &mut dyn PeerTransport) -> ErrorOutcome {
        let Some(session) = self.sessions.get_mut(remote) else {
            return ErrorOutcome::Unknown;
        };

        let retryable = session.direction == Direction::Initiated
            && session.state == SessionState::Pending
            && session.attempts <= self.max_retries;
        if retryable {
            session.attempts += 1;
            transport.close_session(remote);
            transport.call(remote, &session.local_stream);
            tracing::info!(remote = remote, attempt = session.attempts, "Retrying session");
            return ErrorOutcome::Retrying {
                attempt: session.attempts,
            };
        }

        let attempts = session.attempts;
        let was_active = session.state == SessionState::Active;
        self.close(remote, transport);
        ErrorOutcome::Failed {
            attempts,
            was_active,
        }
    }

    /// Close and forget the session with `remote`. Returns it, marked
    /// `Closed`, or `None` if there was none.
    pub fn close(&mut self, remote: &str, transport: &mut dyn PeerTransport) -> Option<Session> {
        let mut session = self.sessions.remove(remote)?;
        session.state = SessionState::Closed;
        transport.close_session(remote);
        tracing::info!(remote = remote, "Session closed");
        Some(session)
    }

    /// Close every session. Returns the remote ids that were open.
    pub fn close_all(&mut self, transport: &mut dyn PeerTransport) -> Vec<String> {
        let remotes: Vec<String> = self.sessions.keys().cloned().collect();
        for remote in &remotes {
            self.close(remote, transport);
        }
        remotes
    }

    pub fn get(&self, remote: &str) -> Option<&Session> {
        self.sessions.get(remote)
    }

    pub fn contains(&self, remote: &str) -> bool {
        self.sessions.contains_key(remote)
    }

    pub fn state_of(&self, remote: &str) -> Option<SessionState> {
        self.sessions.get(remote).map(|s| s.state)
    }

    /// Remote ids of active sessions, sorted.
    pub fn active_peers(&self) -> Vec<String> {
        let mut peers: Vec<String> = self
            .sessions
            .values()
            .filter(|s| s.state == SessionState::Active)
            .map(|s| s.remote_id.clone())
            .collect();
        peers.sort();
        peers
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
