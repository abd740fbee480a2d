//! In-memory capabilities for tests.
//!
//! Each fake records what it was asked to do in a shared log; the log half
//! stays with the test while the fake itself is handed to the code under
//! test.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::capability::{
    LocalStream, MediaConstraints, MediaProvider, PeerTransport, RelaySink, StreamHandle,
};
use crate::error::{Error, Result};
use crate::relay_client::RelayClientMessage;

// ── Transport ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    Open,
    Reconnect,
    Call(String),
    Answer(String),
    OpenDataChannel(String),
    SendData(String, String),
    CloseSession(String),
    CloseDataChannel(String),
    Destroy,
}

#[derive(Default)]
struct TransportInner {
    calls: Vec<TransportCall>,
    failing: HashSet<String>,
}

#[derive(Clone, Default)]
pub struct TransportLog(Arc<Mutex<TransportInner>>);

impl TransportLog {
    pub fn calls(&self) -> Vec<TransportCall> {
        self.0.lock().calls.clone()
    }

    /// Remove and return everything recorded so far.
    pub fn take_calls(&self) -> Vec<TransportCall> {
        std::mem::take(&mut self.0.lock().calls)
    }

    /// Payloads successfully sent to `remote`.
    pub fn sent_to(&self, remote: &str) -> Vec<String> {
        self.0
            .lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                TransportCall::SendData(to, payload) if to == remote => Some(payload.clone()),
                _ => None,
            })
            .collect()
    }

    /// Make every `send_data` to `remote` fail.
    pub fn fail_sends_to(&self, remote: &str) {
        self.0.lock().failing.insert(remote.to_string());
    }
}

pub struct FakeTransport {
    log: TransportLog,
}

impl FakeTransport {
    pub fn new() -> (Self, TransportLog) {
        let log = TransportLog::default();
        (Self { log: log.clone() }, log)
    }

    fn record(&self, call: TransportCall) {
        self.log.0.lock().calls.push(call);
    }
}

impl PeerTransport for FakeTransport {
    fn open(&mut self) {
        self.record(TransportCall::Open);
    }

    fn reconnect(&mut self) {
        self.record(TransportCall::Reconnect);
    }

    fn call(&mut self, remote: &str, _stream: &StreamHandle) {
        self.record(TransportCall::Call(remote.to_string()));
    }

    fn answer(&mut self, remote: &str, _stream: &StreamHandle) {
        self.record(TransportCall::Answer(remote.to_string()));
    }

    fn open_data_channel(&mut self, remote: &str) {
        self.record(TransportCall::OpenDataChannel(remote.to_string()));
    }

    fn send_data(&mut self, remote: &str, payload: &str) -> Result<()> {
        if self.log.0.lock().failing.contains(remote) {
            return Err(Error::ChannelSendFailed {
                peer_id: remote.to_string(),
                reason: "channel refused".to_string(),
            });
        }
        self.record(TransportCall::SendData(remote.to_string(), payload.to_string()));
        Ok(())
    }

    fn close_session(&mut self, remote: &str) {
        self.record(TransportCall::CloseSession(remote.to_string()));
    }

    fn close_data_channel(&mut self, remote: &str) {
        self.record(TransportCall::CloseDataChannel(remote.to_string()));
    }

    fn destroy(&mut self) {
        self.record(TransportCall::Destroy);
    }
}

// ── Relay ─────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct RelayInner {
    connected: bool,
    sent: Vec<RelayClientMessage>,
}

#[derive(Clone, Default)]
pub struct RelayLog(Arc<Mutex<RelayInner>>);

impl RelayLog {
    pub fn sent(&self) -> Vec<RelayClientMessage> {
        self.0.lock().sent.clone()
    }

    pub fn take_sent(&self) -> Vec<RelayClientMessage> {
        std::mem::take(&mut self.0.lock().sent)
    }

    pub fn set_connected(&self, connected: bool) {
        self.0.lock().connected = connected;
    }
}

pub struct FakeRelay {
    log: RelayLog,
}

impl FakeRelay {
    pub fn new(connected: bool) -> (Self, RelayLog) {
        let log = RelayLog::default();
        log.set_connected(connected);
        (Self { log: log.clone() }, log)
    }
}

impl RelaySink for FakeRelay {
    fn is_connected(&self) -> bool {
        self.log.0.lock().connected
    }

    fn send(&self, message: RelayClientMessage) -> bool {
        self.log.0.lock().sent.push(message);
        true
    }
}

// ── Media ─────────────────────────────────────────────────────────────────────

struct MediaInner {
    requests: Vec<MediaConstraints>,
    audio: Option<bool>,
    video: Option<bool>,
    released: u32,
}

#[derive(Clone)]
pub struct MediaLog(Arc<Mutex<MediaInner>>);

impl MediaLog {
    pub fn requests(&self) -> Vec<MediaConstraints> {
        self.0.lock().requests.clone()
    }

    pub fn take_requests(&self) -> Vec<MediaConstraints> {
        std::mem::take(&mut self.0.lock().requests)
    }

    /// Actual state of the audio track, `None` if there is none.
    pub fn audio_enabled(&self) -> Option<bool> {
        self.0.lock().audio
    }

    pub fn released(&self) -> u32 {
        self.0.lock().released
    }
}

pub struct FakeMedia {
    log: MediaLog,
}

impl FakeMedia {
    /// Media with enabled audio and video tracks.
    pub fn new() -> (Self, MediaLog) {
        let log = MediaLog(Arc::new(Mutex::new(MediaInner {
            requests: Vec::new(),
            audio: Some(true),
            video: Some(true),
            released: 0,
        })));
        (Self { log: log.clone() }, log)
    }
}

impl MediaProvider for FakeMedia {
    fn request_stream(&mut self, constraints: MediaConstraints) {
        let mut inner = self.log.0.lock();
        if !constraints.video {
            inner.video = None;
        }
        inner.requests.push(constraints);
    }

    fn toggle_audio_track(&mut self) -> Option<bool> {
        let mut inner = self.log.0.lock();
        let flipped = !inner.audio?;
        inner.audio = Some(flipped);
        Some(flipped)
    }

    fn toggle_video_track(&mut self) -> Option<bool> {
        let mut inner = self.log.0.lock();
        let flipped = !inner.video?;
        inner.video = Some(flipped);
        Some(flipped)
    }

    fn release(&mut self) {
        self.log.0.lock().released += 1;
    }
}

/// A ready local stream with both tracks enabled.
pub fn local_stream(name: &str) -> LocalStream {
    LocalStream {
        handle: StreamHandle(name.to_string()),
        audio_enabled: true,
        video_enabled: true,
    }
}
