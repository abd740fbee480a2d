//! Several room clients wired together in memory.
//!
//! The mesh plays the relay (room membership and rebroadcast) and the peer
//! transport (calls, streams and data channels between nodes), turning what
//! each fake recorded into events for the node on the other end. `pump`
//! keeps delivering until nothing new is produced.

use std::collections::VecDeque;

use tokio::sync::broadcast;

use crate::capability::{MediaEvent, StreamHandle, TransportEvent};
use crate::config::ClientConfig;
use crate::relay_client::{RelayClientMessage, RelayEvent, RelayServerMessage};
use crate::room::{ClientEvent, RoomClient, RoomNotice};
use crate::session::Direction;
use crate::testing::{
    local_stream, FakeMedia, FakeRelay, FakeTransport, MediaLog, RelayLog, TransportCall,
    TransportLog,
};

const ROOM: &str = "standup";
const MAX_ROUNDS: usize = 100;

struct Node {
    id: String,
    client: RoomClient,
    relay: RelayLog,
    transport: TransportLog,
    media: MediaLog,
    notices: broadcast::Receiver<RoomNotice>,
    /// Every relay message delivered to this node.
    relay_seen: Vec<RelayServerMessage>,
    alive: bool,
}

#[derive(Default)]
struct Mesh {
    nodes: Vec<Node>,
    members: Vec<String>,
    /// Peers the relay announced as gone, in order.
    leaves: Vec<String>,
    queue: VecDeque<(usize, ClientEvent)>,
}

impl Mesh {
    fn new() -> Self {
        Self::default()
    }

    /// Start a client with identity `id` and let the mesh settle.
    fn join(&mut self, id: &str, name: &str) -> usize {
        let (relay, relay_log) = FakeRelay::new(true);
        let (transport, transport_log) = FakeTransport::new();
        let (media, media_log) = FakeMedia::new();
        let config = ClientConfig::new("ws://relay/ws", ROOM).with_display_name(name);
        let mut client =
            RoomClient::new(config, Box::new(relay), Box::new(transport), Box::new(media))
                .unwrap();
        let notices = client.subscribe();
        client.start().unwrap();

        let index = self.nodes.len();
        self.nodes.push(Node {
            id: id.to_string(),
            client,
            relay: relay_log,
            transport: transport_log,
            media: media_log,
            notices,
            relay_seen: Vec::new(),
            alive: true,
        });
        self.queue
            .push_back((index, ClientEvent::Relay(RelayEvent::Connected)));
        self.pump();
        index
    }

    /// Drop the node's relay socket without a goodbye.
    fn disconnect(&mut self, index: usize) {
        self.nodes[index].alive = false;
        let id = self.nodes[index].id.clone();
        self.remove_member(&id);
        self.pump();
    }

    fn leave(&mut self, index: usize) {
        assert!(self.nodes[index].client.leave());
        self.pump();
    }

    fn pump(&mut self) {
        for _ in 0..MAX_ROUNDS {
            self.collect();
            if self.queue.is_empty() {
                return;
            }
            while let Some((index, event)) = self.queue.pop_front() {
                let node = &mut self.nodes[index];
                if node.alive {
                    node.client.handle(event);
                }
            }
        }
        panic!("mesh did not settle after {} rounds", MAX_ROUNDS);
    }

    fn collect(&mut self) {
        for index in 0..self.nodes.len() {
            let node = &self.nodes[index];
            let sent = node.relay.take_sent();
            let calls = node.transport.take_calls();
            let requests = node.media.take_requests();
            if !node.alive {
                continue;
            }

            for message in sent {
                self.on_relay_message(index, message);
            }
            for call in calls {
                self.on_transport_call(index, call);
            }
            for _ in requests {
                let stream = local_stream(&format!("cam-{}", self.nodes[index].id));
                self.queue
                    .push_back((index, ClientEvent::Media(MediaEvent::StreamReady(stream))));
            }
        }
    }

    // ── Relay ─────────────────────────────────────────────────────────────

    fn on_relay_message(&mut self, from: usize, message: RelayClientMessage) {
        match message {
            RelayClientMessage::JoinRoom { room_id, peer_id } => {
                assert_eq!(room_id, ROOM);
                if !self.members.contains(&peer_id) {
                    self.broadcast(
                        &peer_id,
                        RelayServerMessage::UserConnected {
                            peer_id: peer_id.clone(),
                        },
                    );
                    self.members.push(peer_id.clone());
                }
                self.deliver_relay(from, RelayServerMessage::Joined { room_id, peer_id });
            }
            RelayClientMessage::UserToggleAudio { peer_id, .. } => {
                let message = RelayServerMessage::UserToggleAudio {
                    peer_id: peer_id.clone(),
                };
                self.broadcast(&peer_id, message);
            }
            RelayClientMessage::UserToggleVideo { peer_id, .. } => {
                let message = RelayServerMessage::UserToggleVideo {
                    peer_id: peer_id.clone(),
                };
                self.broadcast(&peer_id, message);
            }
            RelayClientMessage::UserLeave { peer_id, .. } => self.remove_member(&peer_id),
            RelayClientMessage::Ping => self.deliver_relay(from, RelayServerMessage::Pong),
        }
    }

    fn remove_member(&mut self, peer_id: &str) {
        let Some(pos) = self.members.iter().position(|m| m == peer_id) else {
            return;
        };
        self.members.remove(pos);
        self.leaves.push(peer_id.to_string());
        self.broadcast(
            peer_id,
            RelayServerMessage::UserLeave {
                peer_id: peer_id.to_string(),
            },
        );
    }

    fn broadcast(&mut self, sender: &str, message: RelayServerMessage) {
        for member in self.members.clone() {
            if member == sender {
                continue;
            }
            if let Some(index) = self.index_of(&member) {
                self.deliver_relay(index, message.clone());
            }
        }
    }

    fn deliver_relay(&mut self, index: usize, message: RelayServerMessage) {
        self.nodes[index].relay_seen.push(message.clone());
        self.queue
            .push_back((index, ClientEvent::Relay(RelayEvent::Message(message))));
    }

    // ── Transport ─────────────────────────────────────────────────────────

    fn on_transport_call(&mut self, from: usize, call: TransportCall) {
        let me = self.nodes[from].id.clone();
        match call {
            TransportCall::Open | TransportCall::Reconnect => {
                self.push_transport(from, TransportEvent::Open { peer_id: me });
            }
            TransportCall::Call(remote) => {
                self.send_to(&remote, TransportEvent::IncomingCall { remote: me });
            }
            TransportCall::Answer(remote) => {
                self.send_to(
                    &remote,
                    TransportEvent::RemoteStream {
                        remote: me.clone(),
                        stream: StreamHandle(format!("cam-{}", me)),
                    },
                );
                self.push_transport(
                    from,
                    TransportEvent::RemoteStream {
                        stream: StreamHandle(format!("cam-{}", remote)),
                        remote,
                    },
                );
            }
            TransportCall::OpenDataChannel(remote) => {
                self.push_transport(
                    from,
                    TransportEvent::ChannelOpen {
                        remote: remote.clone(),
                    },
                );
                self.send_to(&remote, TransportEvent::ChannelOpen { remote: me });
            }
            TransportCall::SendData(remote, payload) => {
                self.send_to(&remote, TransportEvent::ChannelMessage { remote: me, payload });
            }
            TransportCall::CloseSession(remote) => {
                self.send_to(&remote, TransportEvent::SessionClosed { remote: me });
            }
            TransportCall::CloseDataChannel(remote) => {
                self.send_to(&remote, TransportEvent::ChannelClosed { remote: me });
            }
            TransportCall::Destroy => {}
        }
    }

    fn send_to(&mut self, peer_id: &str, event: TransportEvent) {
        if let Some(index) = self.index_of(peer_id) {
            if self.nodes[index].alive {
                self.push_transport(index, event);
            }
        }
    }

    fn push_transport(&mut self, index: usize, event: TransportEvent) {
        self.queue.push_back((index, ClientEvent::Transport(event)));
    }

    // ── Inspection ────────────────────────────────────────────────────────

    fn index_of(&self, peer_id: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n.id == peer_id)
    }

    fn client(&self, index: usize) -> &RoomClient {
        &self.nodes[index].client
    }

    fn client_mut(&mut self, index: usize) -> &mut RoomClient {
        &mut self.nodes[index].client
    }

    /// Ids of the remote peers `index` shows, sorted.
    fn visible(&self, index: usize) -> Vec<String> {
        let mut ids: Vec<String> = self
            .client(index)
            .snapshot()
            .others
            .into_iter()
            .map(|v| v.peer_id)
            .collect();
        ids.sort();
        ids
    }

    fn drain_notices(&mut self, index: usize) -> Vec<RoomNotice> {
        let mut out = Vec::new();
        while let Ok(notice) = self.nodes[index].notices.try_recv() {
            out.push(notice);
        }
        out
    }

    /// Every live node shows exactly the other live members.
    fn assert_presence_settled(&self) {
        for (index, node) in self.nodes.iter().enumerate() {
            if !node.alive || node.client.is_left() {
                continue;
            }
            let mut expected: Vec<String> = self
                .members
                .iter()
                .filter(|m| **m != node.id)
                .cloned()
                .collect();
            expected.sort();
            assert_eq!(self.visible(index), expected, "presence of {}", node.id);
            assert_eq!(
                node.client.snapshot().connected_peers,
                expected,
                "chat peers of {}",
                node.id
            );
        }
    }
}

fn peer_left_count(notices: &[RoomNotice], peer_id: &str) -> usize {
    notices
        .iter()
        .filter(|n| matches!(n, RoomNotice::PeerLeft { peer_id: p } if p == peer_id))
        .count()
}

#[test]
fn test_existing_member_calls_newcomer() {
    let mut mesh = Mesh::new();
    let a = mesh.join("peer-a", "Ada");
    let b = mesh.join("peer-b", "Bo");

    assert!(mesh.nodes[a]
        .relay_seen
        .contains(&RelayServerMessage::UserConnected {
            peer_id: "peer-b".into()
        }));
    assert!(!mesh.nodes[b]
        .relay_seen
        .iter()
        .any(|m| matches!(m, RelayServerMessage::UserConnected { .. })));

    assert_eq!(
        mesh.client(a).sessions().get("peer-b").unwrap().direction,
        Direction::Initiated
    );
    assert_eq!(
        mesh.client(b).sessions().get("peer-a").unwrap().direction,
        Direction::Answered
    );
    assert_eq!(mesh.visible(a), vec!["peer-b"]);
    assert_eq!(mesh.visible(b), vec!["peer-a"]);
    assert!(mesh.client(a).chat().is_connected());
    assert!(mesh.client(b).chat().is_connected());
    mesh.assert_presence_settled();
}

#[test]
fn test_ungraceful_disconnect_cleans_up_remaining_member() {
    let mut mesh = Mesh::new();
    let a = mesh.join("peer-a", "Ada");
    let b = mesh.join("peer-b", "Bo");
    mesh.drain_notices(a);

    mesh.disconnect(b);

    assert_eq!(mesh.leaves, vec!["peer-b"]);
    assert_eq!(peer_left_count(&mesh.drain_notices(a), "peer-b"), 1);
    assert!(mesh.visible(a).is_empty());
    assert!(mesh.client(a).sessions().is_empty());
    assert!(!mesh.client(a).chat().is_connected());
    mesh.assert_presence_settled();
}

#[test]
fn test_chat_reaches_every_member() {
    let mut mesh = Mesh::new();
    let a = mesh.join("peer-a", "Ada");
    let b = mesh.join("peer-b", "Bo");
    let c = mesh.join("peer-c", "Cy");
    mesh.assert_presence_settled();
    mesh.drain_notices(a);
    mesh.drain_notices(b);

    let sent = tokio_test::assert_ok!(mesh.client_mut(c).send_chat("hello"));
    assert!(sent.own);
    mesh.pump();

    for index in [a, b] {
        let messages = mesh.client(index).snapshot().messages;
        assert_eq!(messages.len(), 1);
        let received = &messages[0];
        assert_eq!(received.sender_id, "peer-c");
        assert_eq!(received.sender_name, "Cy");
        assert_eq!(received.text, "hello");
        assert!(!received.own);

        let notices = mesh.drain_notices(index);
        assert!(notices
            .iter()
            .any(|n| matches!(n, RoomNotice::MessageReceived(m) if m.text == "hello")));
    }
    assert_eq!(mesh.client(c).snapshot().messages, vec![sent]);
}

#[test]
fn test_leave_then_disconnect_announces_once() {
    let mut mesh = Mesh::new();
    let a = mesh.join("peer-a", "Ada");
    let b = mesh.join("peer-b", "Bo");
    let c = mesh.join("peer-c", "Cy");
    mesh.drain_notices(a);
    mesh.drain_notices(b);

    mesh.leave(c);
    mesh.disconnect(c);

    assert_eq!(mesh.leaves, vec!["peer-c"]);
    for index in [a, b] {
        let leaves_seen = mesh.nodes[index]
            .relay_seen
            .iter()
            .filter(|m| matches!(m, RelayServerMessage::UserLeave { .. }))
            .count();
        assert_eq!(leaves_seen, 1);
        assert_eq!(peer_left_count(&mesh.drain_notices(index), "peer-c"), 1);
    }
    assert_eq!(mesh.visible(a), vec!["peer-b"]);
    assert_eq!(mesh.visible(b), vec!["peer-a"]);
    assert!(!mesh.client_mut(c).leave());
    mesh.assert_presence_settled();
}

#[test]
fn test_toggle_propagates_to_others() {
    let mut mesh = Mesh::new();
    let a = mesh.join("peer-a", "Ada");
    let b = mesh.join("peer-b", "Bo");

    assert!(!mesh.client_mut(a).toggle_audio().unwrap());
    mesh.pump();

    let seen_by_b = mesh.client(b).snapshot().others;
    assert_eq!(seen_by_b.len(), 1);
    assert!(seen_by_b[0].muted);
    assert!(seen_by_b[0].video_enabled);
    assert!(mesh.client(a).snapshot().others.iter().all(|v| !v.muted));
}

#[test]
fn test_churn_settles_to_live_members() {
    let mut mesh = Mesh::new();
    let a = mesh.join("peer-a", "Ada");
    let b = mesh.join("peer-b", "Bo");
    mesh.disconnect(b);
    let c = mesh.join("peer-c", "Cy");
    let d = mesh.join("peer-d", "Di");
    mesh.leave(a);
    mesh.disconnect(a);
    let e = mesh.join("peer-e", "Ed");

    assert_eq!(mesh.members, vec!["peer-c", "peer-d", "peer-e"]);
    assert_eq!(mesh.visible(c), vec!["peer-d", "peer-e"]);
    assert_eq!(mesh.visible(d), vec!["peer-c", "peer-e"]);
    assert_eq!(mesh.visible(e), vec!["peer-c", "peer-d"]);
    mesh.assert_presence_settled();
}
