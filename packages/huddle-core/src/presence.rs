//! # Presence & Media State
//!
//! Who is visible and in what state. The local entry holds the actual state
//! of the local tracks; remote entries hold the state their owners announced
//! through relay toggles.
//!
//! Remote entries are only created for sessions that are `active`. The room
//! client keeps that invariant by calling `upsert_remote` from the stream
//! callback and `remove` from session teardown.

use serde::Serialize;

use crate::capability::{LocalStream, StreamHandle, TrackKind};

/// Stored state of one participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceEntry {
    pub peer_id: String,
    pub stream: StreamHandle,
    pub muted: bool,
    pub video_enabled: bool,
}

/// What the UI renders for one participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PresenceView {
    pub peer_id: String,
    pub stream: StreamHandle,
    pub muted: bool,
    pub video_enabled: bool,
    pub is_local: bool,
}

impl PresenceView {
    fn remote(entry: &PresenceEntry) -> Self {
        Self {
            peer_id: entry.peer_id.clone(),
            stream: entry.stream.clone(),
            muted: entry.muted,
            video_enabled: entry.video_enabled,
            is_local: false,
        }
    }
}

#[derive(Debug, Default)]
pub struct PresenceStore {
    local_id: Option<String>,
    local: Option<PresenceEntry>,
    /// Remote entries in arrival order.
    remotes: Vec<PresenceEntry>,
}

impl PresenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the local identity. The local entry, if any, takes it.
    pub fn set_local_id(&mut self, peer_id: &str) {
        self.local_id = Some(peer_id.to_string());
        if let Some(local) = self.local.as_mut() {
            local.peer_id = peer_id.to_string();
        }
        // The local id never has a remote entry.
        self.remotes.retain(|e| e.peer_id != peer_id);
    }

    /// Create or overwrite the local entry from the stream's actual track state.
    pub fn set_local_stream(&mut self, stream: &LocalStream) {
        self.local = Some(PresenceEntry {
            peer_id: self.local_id.clone().unwrap_or_default(),
            stream: stream.handle.clone(),
            muted: !stream.audio_enabled,
            video_enabled: stream.video_enabled,
        });
    }

    /// Record the actual state of a local track after a toggle.
    pub fn set_local_track(&mut self, kind: TrackKind, enabled: bool) {
        if let Some(local) = self.local.as_mut() {
            match kind {
                TrackKind::Audio => local.muted = !enabled,
                TrackKind::Video => local.video_enabled = enabled,
            }
        }
    }

    /// Insert or refresh a remote participant. New entries start unmuted with
    /// video on; an existing entry keeps its flags and takes the new handle.
    /// Returns true if the entry is new.
    pub fn upsert_remote(&mut self, peer_id: &str, stream: StreamHandle) -> bool {
        if self.local_id.as_deref() == Some(peer_id) {
            tracing::warn!(peer_id = peer_id, "Ignoring remote stream for local id");
            return false;
        }
        match self.remotes.iter_mut().find(|e| e.peer_id == peer_id) {
            Some(entry) => {
                entry.stream = stream;
                false
            }
            None => {
                self.remotes.push(PresenceEntry {
                    peer_id: peer_id.to_string(),
                    stream,
                    muted: false,
                    video_enabled: true,
                });
                true
            }
        }
    }

    /// Flip the displayed flag of a remote peer after a relayed toggle.
    /// Returns false for unknown peers and the local id.
    pub fn apply_toggle(&mut self, peer_id: &str, kind: TrackKind) -> bool {
        if self.local_id.as_deref() == Some(peer_id) {
            return false;
        }
        match self.remotes.iter_mut().find(|e| e.peer_id == peer_id) {
            Some(entry) => {
                match kind {
                    TrackKind::Audio => entry.muted = !entry.muted,
                    TrackKind::Video => entry.video_enabled = !entry.video_enabled,
                }
                true
            }
            None => {
                tracing::debug!(peer_id = peer_id, ?kind, "Toggle for unknown peer ignored");
                false
            }
        }
    }

    pub fn remove(&mut self, peer_id: &str) -> Option<PresenceEntry> {
        let index = self.remotes.iter().position(|e| e.peer_id == peer_id)?;
        Some(self.remotes.remove(index))
    }

    /// Drop every remote entry.
    pub fn clear_remotes(&mut self) {
        self.remotes.clear();
    }

    /// Actual local state, as transmitted.
    pub fn local(&self) -> Option<&PresenceEntry> {
        self.local.as_ref()
    }

    pub fn remote(&self, peer_id: &str) -> Option<&PresenceEntry> {
        self.remotes.iter().find(|e| e.peer_id == peer_id)
    }

    pub fn remote_ids(&self) -> Vec<String> {
        self.remotes.iter().map(|e| e.peer_id.clone()).collect()
    }

    /// The self-preview. Always muted so local audio never plays back.
    pub fn highlighted(&self) -> Option<PresenceView> {
        self.local.as_ref().map(|local| PresenceView {
            peer_id: local.peer_id.clone(),
            stream: local.stream.clone(),
            muted: true,
            video_enabled: local.video_enabled,
            is_local: true,
        })
    }

    /// Everyone else, in arrival order.
    pub fn others(&self) -> Vec<PresenceView> {
        self.remotes.iter().map(PresenceView::remote).collect()
    }
}
