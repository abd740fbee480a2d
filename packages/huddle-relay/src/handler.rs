//! WebSocket connection handler.
//!
//! Manages individual WebSocket connections: parsing client messages,
//! routing them through the relay state, and sending responses.

use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::error::RelayError;
use crate::protocol::{ClientMessage, ServerMessage, ToggleKind};
use crate::state::{ConnectionId, JoinOutcome, RelayState};

/// Handle a single WebSocket connection.
///
/// This function runs for the lifetime of the connection:
/// 1. Registers the connection and spawns a sender task that owns the socket's write half
/// 2. Processes incoming messages until the connection closes
/// 3. Drops the connection, which announces `user-leave` if it never left explicitly
pub async fn handle_websocket(socket: WebSocket, state: RelayState) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Create the outbound channel for this client
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();
    let conn_id = state.connect(tx);
    tracing::info!(conn = %conn_id, "WebSocket connected");

    // ── Sender Task ───────────────────────────────────────────────────────

    let ping_interval = state.config.ping_interval_secs;
    let sender_task = tokio::spawn(async move {
        let mut ping = (ping_interval > 0)
            .then(|| tokio::time::interval(Duration::from_secs(ping_interval)));

        loop {
            let outbound = tokio::select! {
                msg = rx.recv() => match msg {
                    Some(msg) => match serde_json::to_string(&msg) {
                        Ok(json) => Message::Text(json),
                        Err(e) => {
                            tracing::error!("Failed to serialize server message: {}", e);
                            continue;
                        }
                    },
                    None => break,
                },
                _ = async {
                    match ping.as_mut() {
                        Some(interval) => { interval.tick().await; }
                        None => std::future::pending::<()>().await,
                    }
                } => Message::Ping(Vec::new()),
            };

            if ws_sender.send(outbound).await.is_err() {
                break; // Connection closed
            }
        }
    });

    // ── Process Messages ──────────────────────────────────────────────────

    while let Some(msg_result) = ws_receiver.next().await {
        match msg_result {
            Ok(Message::Text(text)) => {
                handle_text(&state, conn_id, &text);
            }
            Ok(Message::Close(_)) => {
                tracing::info!(conn = %conn_id, "Client sent close frame");
                break;
            }
            Err(e) => {
                tracing::warn!(conn = %conn_id, error = %e, "WebSocket error");
                break;
            }
            _ => {} // axum answers pings itself
        }
    }

    // ── Cleanup ───────────────────────────────────────────────────────────

    state.disconnect(conn_id);
    sender_task.abort();
    tracing::info!(conn = %conn_id, "WebSocket disconnected");
}

/// Parse and dispatch one text frame. Rejections go back to the sender only.
pub fn handle_text(state: &RelayState, conn_id: ConnectionId, text: &str) {
    let result = serde_json::from_str::<ClientMessage>(text)
        .map_err(|e| RelayError::Malformed(e.to_string()))
        .and_then(|msg| {
            let event = msg.event_name();
            handle_client_message(state, conn_id, msg).map_err(|e| {
                tracing::debug!(conn = %conn_id, event = event, error = %e, "Request rejected");
                e
            })
        });

    if let Err(e) = result {
        if let RelayError::Malformed(_) = e {
            tracing::warn!(conn = %conn_id, error = %e, "Failed to parse client message");
        }
        state.send_to(
            conn_id,
            ServerMessage::Error {
                message: e.to_string(),
            },
        );
    }
}

/// Handle a parsed client message.
fn handle_client_message(
    state: &RelayState,
    conn_id: ConnectionId,
    msg: ClientMessage,
) -> Result<(), RelayError> {
    match msg {
        ClientMessage::JoinRoom { room_id, peer_id } => {
            if let JoinOutcome::Joined { notified } = state.join(conn_id, &room_id, &peer_id)? {
                tracing::debug!(conn = %conn_id, notified = notified, "Join announced");
            }
        }

        ClientMessage::UserToggleAudio { peer_id, room_id } => {
            state.toggle(conn_id, ToggleKind::Audio, &peer_id, &room_id)?;
        }

        ClientMessage::UserToggleVideo { peer_id, room_id } => {
            state.toggle(conn_id, ToggleKind::Video, &peer_id, &room_id)?;
        }

        ClientMessage::UserLeave { peer_id, room_id } => {
            state.leave(conn_id, &peer_id, &room_id)?;
        }

        ClientMessage::Ping => {
            state.send_to(conn_id, ServerMessage::Pong);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::RelayConfig;

    fn connect(state: &RelayState) -> (ConnectionId, mpsc::UnboundedReceiver<ServerMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (state.connect(tx), rx)
    }

    #[test]
    fn test_malformed_frame_is_rejected_to_sender_only() {
        let state = RelayState::new(RelayConfig::default());
        let (a, mut rx_a) = connect(&state);
        let (b, mut rx_b) = connect(&state);
        handle_text(&state, a, r#"{"type":"join-room","room_id":"r1","peer_id":"peer-a"}"#);
        handle_text(&state, b, r#"{"type":"join-room","room_id":"r1","peer_id":"peer-b"}"#);
        while rx_a.try_recv().is_ok() {}
        while rx_b.try_recv().is_ok() {}

        handle_text(&state, b, "not json");
        handle_text(&state, b, r#"{"type":"user-toggle-audio","peer_id":"peer-b"}"#);

        for _ in 0..2 {
            match rx_b.try_recv().unwrap() {
                ServerMessage::Error { message } => {
                    assert!(message.starts_with("Invalid message format"))
                }
                other => panic!("Expected Error, got {:?}", other),
            }
        }
        assert!(rx_a.try_recv().is_err());
    }

    #[test]
    fn test_join_with_blank_room_is_rejected() {
        let state = RelayState::new(RelayConfig::default());
        let (a, mut rx_a) = connect(&state);

        handle_text(&state, a, r#"{"type":"join-room","room_id":"","peer_id":"peer-a"}"#);

        match rx_a.try_recv().unwrap() {
            ServerMessage::Error { message } => assert_eq!(message, "Missing room_id"),
            other => panic!("Expected Error, got {:?}", other),
        }
        assert_eq!(state.room_count(), 0);
    }

    #[test]
    fn test_ping_pong() {
        let state = RelayState::new(RelayConfig::default());
        let (a, mut rx_a) = connect(&state);
        handle_text(&state, a, r#"{"type":"ping"}"#);
        assert_eq!(rx_a.try_recv().unwrap(), ServerMessage::Pong);
    }

    #[test]
    fn test_dispatch_toggle_video_and_leave() {
        let state = RelayState::new(RelayConfig::default());
        let (a, mut rx_a) = connect(&state);
        let (b, _rx_b) = connect(&state);
        handle_text(&state, a, r#"{"type":"join-room","room_id":"r1","peer_id":"peer-a"}"#);
        handle_text(&state, b, r#"{"type":"join-room","room_id":"r1","peer_id":"peer-b"}"#);
        while rx_a.try_recv().is_ok() {}

        handle_text(&state, b, r#"{"type":"user-toggle-video","peer_id":"peer-b","room_id":"r1"}"#);
        handle_text(&state, b, r#"{"type":"user-leave","peer_id":"peer-b","room_id":"r1"}"#);

        assert_eq!(
            rx_a.try_recv().unwrap(),
            ServerMessage::UserToggleVideo {
                peer_id: "peer-b".to_string()
            }
        );
        assert_eq!(
            rx_a.try_recv().unwrap(),
            ServerMessage::UserLeave {
                peer_id: "peer-b".to_string()
            }
        );
        assert!(state.membership(b).is_none());
    }
}
