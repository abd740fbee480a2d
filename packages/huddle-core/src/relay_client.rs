//! # Relay Client
//!
//! WebSocket client for the Huddle relay server.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  RelayClientMessage  ┌──────────────────┐   text frames   ┌─────────┐
//! │ RelayHandle  │─────────────────────►│ connection task  │◄───────────────►│  relay  │
//! │ (RelaySink)  │                      │ (reconnect loop) │                 └─────────┘
//! └──────────────┘                      └────────┬─────────┘
//!                                                │ RelayEvent
//!                                                ▼
//!                                          room runtime
//! ```
//!
//! The task owns the socket. Outbound messages queued while the relay is
//! unreachable are held and flushed, in order, on the next connection.
//! Dropping every `RelayHandle` flushes what is queued and ends the task.

use std::collections::VecDeque;
use std::sync::Arc;

use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{
    connect_async, tungstenite::Message as WsMessage, MaybeTlsStream, WebSocketStream,
};

use crate::capability::RelaySink;
use crate::config::BackoffPolicy;

// ── Wire Protocol ─────────────────────────────────────────────────────────────

/// Messages sent from client to relay server.
/// Must match the relay server's `ClientMessage` enum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum RelayClientMessage {
    JoinRoom { room_id: String, peer_id: String },
    UserToggleAudio { peer_id: String, room_id: String },
    UserToggleVideo { peer_id: String, room_id: String },
    UserLeave { peer_id: String, room_id: String },
    Ping,
}

/// Messages received from the relay server.
/// Must match the relay server's `ServerMessage` enum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum RelayServerMessage {
    UserConnected { peer_id: String },
    UserToggleAudio { peer_id: String },
    UserToggleVideo { peer_id: String },
    UserLeave { peer_id: String },
    Joined { room_id: String, peer_id: String },
    Pong,
    Error { message: String },
}

// ── Connection State ──────────────────────────────────────────────────────────

/// Relay connectivity as seen by this client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayStatus {
    Connecting,
    Connected,
    Disconnected,
}

/// Events emitted by the connection task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    /// A WebSocket to the relay is open.
    Connected,
    /// The connection closed or an attempt failed. A retry is scheduled.
    Disconnected { reason: Option<String> },
    /// A message from the relay.
    Message(RelayServerMessage),
}

/// Cheap, cloneable handle to a running relay connection.
#[derive(Clone)]
pub struct RelayHandle {
    outbound: mpsc::UnboundedSender<RelayClientMessage>,
    status: Arc<RwLock<RelayStatus>>,
}

impl RelayHandle {
    pub fn status(&self) -> RelayStatus {
        *self.status.read()
    }
}

impl RelaySink for RelayHandle {
    fn is_connected(&self) -> bool {
        self.status() == RelayStatus::Connected
    }

    fn send(&self, message: RelayClientMessage) -> bool {
        self.outbound.send(message).is_ok()
    }
}

/// The background task that keeps a WebSocket to the relay open.
pub struct RelayConnection;

impl RelayConnection {
    /// Start connecting to `url`. Must be called inside a tokio runtime.
    pub fn spawn(
        url: impl Into<String>,
        backoff: BackoffPolicy,
    ) -> (RelayHandle, mpsc::UnboundedReceiver<RelayEvent>) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let status = Arc::new(RwLock::new(RelayStatus::Connecting));

        let task = ConnectionTask {
            url: url.into(),
            backoff,
            outbound_rx,
            event_tx,
            status: status.clone(),
            pending: VecDeque::new(),
        };
        tokio::spawn(task.run());

        (
            RelayHandle {
                outbound: outbound_tx,
                status,
            },
            event_rx,
        )
    }
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How one connected session ended.
enum SessionEnd {
    /// All handles dropped and the queue was flushed.
    OwnerGone,
    /// Socket closed or failed.
    Lost(Option<String>),
}

struct ConnectionTask {
    url: String,
    backoff: BackoffPolicy,
    outbound_rx: mpsc::UnboundedReceiver<RelayClientMessage>,
    event_tx: mpsc::UnboundedSender<RelayEvent>,
    status: Arc<RwLock<RelayStatus>>,
    /// Messages accepted while no socket was open.
    pending: VecDeque<RelayClientMessage>,
}

impl ConnectionTask {
    async fn run(mut self) {
        let mut failures: u32 = 0;

        loop {
            *self.status.write() = RelayStatus::Connecting;
            tracing::info!(url = self.url.as_str(), "Connecting to relay...");

            let reason = match connect_async(self.url.as_str()).await {
                Ok((ws_stream, _)) => {
                    failures = 0;
                    *self.status.write() = RelayStatus::Connected;
                    tracing::info!(url = self.url.as_str(), "Relay connected");
                    let _ = self.event_tx.send(RelayEvent::Connected);

                    match self.drive(ws_stream).await {
                        SessionEnd::OwnerGone => {
                            *self.status.write() = RelayStatus::Disconnected;
                            tracing::info!("Relay handle dropped, connection task exiting");
                            return;
                        }
                        SessionEnd::Lost(reason) => reason,
                    }
                }
                Err(e) => Some(e.to_string()),
            };

            *self.status.write() = RelayStatus::Disconnected;
            failures = failures.saturating_add(1);
            if self
                .event_tx
                .send(RelayEvent::Disconnected {
                    reason: reason.clone(),
                })
                .is_err()
            {
                // Nobody is listening any more.
                return;
            }

            if !self.backoff.allows_retry(failures) {
                tracing::warn!(attempts = failures, "Giving up on relay connection");
                return;
            }

            let delay = self.backoff.delay_for(failures);
            tracing::info!(
                url = self.url.as_str(),
                reason = reason.as_deref().unwrap_or("closed"),
                backoff_ms = delay.as_millis() as u64,
                "Reconnecting to relay after backoff..."
            );
            if !self.wait(delay).await {
                return;
            }
        }
    }

    /// Sleep for `delay` while buffering outbound messages.
    /// Returns false if every handle was dropped in the meantime.
    async fn wait(&mut self, delay: std::time::Duration) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return true,
                msg = self.outbound_rx.recv() => match msg {
                    Some(msg) => self.pending.push_back(msg),
                    None => return false,
                },
            }
        }
    }

    async fn drive(&mut self, ws_stream: WsStream) -> SessionEnd {
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        while let Some(msg) = self.pending.pop_front() {
            if let Err(e) = send_json(&mut ws_sender, &msg).await {
                self.pending.push_front(msg);
                return SessionEnd::Lost(Some(e));
            }
        }

        loop {
            tokio::select! {
                msg = self.outbound_rx.recv() => match msg {
                    Some(msg) => {
                        if let Err(e) = send_json(&mut ws_sender, &msg).await {
                            self.pending.push_back(msg);
                            return SessionEnd::Lost(Some(e));
                        }
                    }
                    None => {
                        let _ = ws_sender.close().await;
                        return SessionEnd::OwnerGone;
                    }
                },

                frame = ws_receiver.next() => match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        match serde_json::from_str::<RelayServerMessage>(&text) {
                            Ok(msg) => {
                                let _ = self.event_tx.send(RelayEvent::Message(msg));
                            }
                            Err(e) => {
                                tracing::warn!(error = %e, "Failed to parse relay message");
                            }
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => {
                        return SessionEnd::Lost(Some("closed by relay".to_string()));
                    }
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "Relay WebSocket error");
                        return SessionEnd::Lost(Some(e.to_string()));
                    }
                    // tungstenite answers pings itself
                    Some(Ok(_)) => {}
                },
            }
        }
    }
}

async fn send_json(
    ws_sender: &mut SplitSink<WsStream, WsMessage>,
    msg: &RelayClientMessage,
) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    ws_sender
        .send(WsMessage::Text(json))
        .await
        .map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    #[test]
    fn test_client_messages_match_relay_wire_names() {
        let join = RelayClientMessage::JoinRoom {
            room_id: "r1".to_string(),
            peer_id: "peer-a".to_string(),
        };
        assert_eq!(
            serde_json::to_string(&join).unwrap(),
            r#"{"type":"join-room","room_id":"r1","peer_id":"peer-a"}"#
        );

        let leave = RelayClientMessage::UserLeave {
            peer_id: "peer-a".to_string(),
            room_id: "r1".to_string(),
        };
        assert!(serde_json::to_string(&leave)
            .unwrap()
            .contains("\"type\":\"user-leave\""));
    }

    #[test]
    fn test_server_messages_parse() {
        let msg: RelayServerMessage =
            serde_json::from_str(r#"{"type":"user-connected","peer_id":"peer-b"}"#).unwrap();
        assert_eq!(
            msg,
            RelayServerMessage::UserConnected {
                peer_id: "peer-b".to_string()
            }
        );

        let msg: RelayServerMessage =
            serde_json::from_str(r#"{"type":"joined","room_id":"r1","peer_id":"peer-a"}"#)
                .unwrap();
        assert!(matches!(msg, RelayServerMessage::Joined { .. }));
    }

    #[tokio::test]
    async fn test_queued_message_is_flushed_and_reply_surfaces() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        // Minimal relay: answer ping with pong.
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            while let Some(Ok(frame)) = ws.next().await {
                if let WsMessage::Text(text) = frame {
                    let msg: RelayClientMessage = serde_json::from_str(&text).unwrap();
                    if msg == RelayClientMessage::Ping {
                        let pong = serde_json::to_string(&RelayServerMessage::Pong).unwrap();
                        ws.send(WsMessage::Text(pong)).await.unwrap();
                    }
                }
            }
        });

        let (handle, mut events) =
            RelayConnection::spawn(format!("ws://{}", addr), BackoffPolicy::RELAY);
        assert!(handle.send(RelayClientMessage::Ping));

        let timeout = std::time::Duration::from_secs(5);
        let first = tokio::time::timeout(timeout, events.recv()).await.unwrap();
        assert_eq!(first, Some(RelayEvent::Connected));
        assert!(handle.is_connected());

        let second = tokio::time::timeout(timeout, events.recv()).await.unwrap();
        assert_eq!(second, Some(RelayEvent::Message(RelayServerMessage::Pong)));
    }

    #[tokio::test]
    async fn test_unreachable_relay_reports_disconnected() {
        // Bind then drop to get a port nobody listens on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (handle, mut events) = RelayConnection::spawn(
            format!("ws://{}", addr),
            BackoffPolicy {
                initial_ms: 10,
                max_ms: 10,
                max_attempts: 1,
            },
        );

        let event = tokio::time::timeout(std::time::Duration::from_secs(5), events.recv())
            .await
            .unwrap();
        assert!(matches!(event, Some(RelayEvent::Disconnected { .. })));
        assert!(!handle.is_connected());
    }
}
