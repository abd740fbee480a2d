//! # Error Handling
//!
//! Error types for Huddle Core.
//!
//! ## Error Hierarchy
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           ERROR HIERARCHY                               │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Error (top-level)                                                     │
//! │  │                                                                      │
//! │  ├── Bootstrap Errors (100-199)                                        │
//! │  │   ├── TornDown              - Client already left the room          │
//! │  │   ├── BootstrapFailed       - Identity retries exhausted            │
//! │  │   └── IdentityUnavailable   - No peer identity yet                  │
//! │  │                                                                      │
//! │  ├── Media Errors (300-399)                                            │
//! │  │   ├── MediaNotReady         - Local stream not acquired yet         │
//! │  │   └── MediaUnavailable      - Capture failed with no fallback       │
//! │  │                                                                      │
//! │  ├── Chat Errors (500-599)                                             │
//! │  │   ├── NoOpenChannel         - Nobody to deliver to                  │
//! │  │   ├── EmptyMessage          - Text is blank after trimming          │
//! │  │   ├── MessageTooLong        - Text exceeds the configured limit     │
//! │  │   └── ChannelSendFailed     - One data channel refused a payload    │
//! │  │                                                                      │
//! │  └── Internal Errors (900-999)                                         │
//! │      ├── SerializationError    - JSON encode/decode failure            │
//! │      ├── InvalidConfig         - Rejected client configuration         │
//! │      └── RuntimeStopped        - Room runtime is no longer running     │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Failures local to one peer pair or one channel are absorbed by the room
//! client and surfaced as notices. Only the errors above that reach a caller
//! of a UI action are returned as `Err`.

use thiserror::Error;

/// Result type alias for Huddle Core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Huddle Core
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    // ========================================================================
    // Bootstrap Errors (100-199)
    // ========================================================================

    /// The client already left; it cannot be activated again
    #[error("This room client has already left the room.")]
    TornDown,

    /// The transport never produced an identity
    #[error("Could not obtain a peer identity after {attempts} attempts: {reason}")]
    BootstrapFailed { attempts: u32, reason: String },

    /// The operation needs the local peer identity
    #[error("No peer identity yet.")]
    IdentityUnavailable,

    // ========================================================================
    // Media Errors (300-399)
    // ========================================================================

    /// Local media has not been acquired yet
    #[error("Local media is not ready.")]
    MediaNotReady,

    /// Local media could not be acquired
    #[error("Local media unavailable: {0}")]
    MediaUnavailable(String),

    // ========================================================================
    // Chat Errors (500-599)
    // ========================================================================

    /// No chat channel is open
    #[error("No open chat channel.")]
    NoOpenChannel,

    /// Message text is empty
    #[error("Message is empty.")]
    EmptyMessage,

    /// Message text is longer than allowed
    #[error("Message is {len} characters, the limit is {max}.")]
    MessageTooLong { len: usize, max: usize },

    /// A data channel refused a payload
    #[error("Failed to send to {peer_id}: {reason}")]
    ChannelSendFailed { peer_id: String, reason: String },

    // ========================================================================
    // Internal Errors (900-999)
    // ========================================================================

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The room runtime has exited
    #[error("Room runtime is not running.")]
    RuntimeStopped,
}

impl Error {
    /// Get the error code for FFI
    pub fn code(&self) -> i32 {
        match self {
            // Bootstrap (100-199)
            Error::TornDown => 100,
            Error::BootstrapFailed { .. } => 101,
            Error::IdentityUnavailable => 102,

            // Media (300-399)
            Error::MediaNotReady => 300,
            Error::MediaUnavailable(_) => 301,

            // Chat (500-599)
            Error::NoOpenChannel => 500,
            Error::EmptyMessage => 501,
            Error::MessageTooLong { .. } => 502,
            Error::ChannelSendFailed { .. } => 503,

            // Internal (900-999)
            Error::SerializationError(_) => 900,
            Error::InvalidConfig(_) => 901,
            Error::RuntimeStopped => 902,
        }
    }

    /// Check if this error is recoverable (can retry)
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::MediaNotReady | Error::NoOpenChannel | Error::ChannelSendFailed { .. }
        )
    }
}

// ============================================================================
// ERROR CONVERSIONS
// ============================================================================

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::SerializationError(err.to_string())
    }
}

// ============================================================================
// TESTS
// ============================================================================
