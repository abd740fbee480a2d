//! Rejection reasons for client requests.
//!
//! A `RelayError` is never broadcast. The handler turns it into a
//! `ServerMessage::Error` addressed to the offending connection only, and the
//! connection stays open.

use thiserror::Error;

/// Why the relay refused a client request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    /// The frame was not valid JSON or not a known event.
    #[error("Invalid message format: {0}")]
    Malformed(String),

    /// A required identifier was empty.
    #[error("Missing {0}")]
    MissingField(&'static str),

    /// The room already holds the maximum number of members.
    #[error("Room '{room_id}' is full ({max} participants)")]
    RoomFull { room_id: String, max: usize },

    /// The connection is not bound to the room named in the request.
    #[error("Not a member of room '{0}'")]
    NotInRoom(String),

    /// The request names a peer id other than the one this connection joined with.
    #[error("Peer id '{claimed}' does not match this connection ('{bound}')")]
    PeerMismatch { claimed: String, bound: String },

    /// The connection was already cleaned up.
    #[error("Unknown connection")]
    UnknownConnection,
}

impl RelayError {
    /// Reject empty or whitespace-only identifiers.
    pub fn require(value: &str, field: &'static str) -> Result<(), RelayError> {
        if value.trim().is_empty() {
            Err(RelayError::MissingField(field))
        } else {
            Ok(())
        }
    }
}
