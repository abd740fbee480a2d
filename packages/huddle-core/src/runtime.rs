//! # Room Runtime
//!
//! Drives one `RoomClient` from a single task.
//!
//! ```text
//! ┌─────────────────┐
//! │  RelayEvent rx  │──────┐
//! └─────────────────┘      │        ┌─────────────────────────┐
//! ┌─────────────────┐      │        │                         │
//! │ TransportEvent  │──────┤        │  tokio::select! {       │
//! └─────────────────┘      ├───────►│    relay / transport /  │──► RoomClient::handle
//! ┌─────────────────┐      │        │    media / timer /      │
//! │  MediaEvent rx  │──────┤        │    command              │
//! └─────────────────┘      │        │  }                      │
//! ┌─────────────────┐      │        └─────────────────────────┘
//! │  RoomCommand    │──────┘                    │
//! │  (RoomHandle)   │                           ▼
//! └─────────────────┘                  timers → tokio::time::sleep
//! ```
//!
//! The runtime owns every receiver, so dropping it (or sending `Leave`)
//! unsubscribes from all of them at once.

use tokio::sync::{broadcast, mpsc, oneshot};

use crate::capability::{MediaEvent, MediaProvider, PeerTransport, TransportEvent};
use crate::chat::ChatMessage;
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::relay_client::{RelayConnection, RelayEvent};
use crate::room::{ClientEvent, RoomClient, RoomNotice, RoomSnapshot, TimerEvent};

/// Requests from the UI to the running room.
#[derive(Debug)]
pub enum RoomCommand {
    ToggleAudio {
        reply: oneshot::Sender<Result<bool>>,
    },
    ToggleVideo {
        reply: oneshot::Sender<Result<bool>>,
    },
    SendChat {
        text: String,
        reply: oneshot::Sender<Result<ChatMessage>>,
    },
    RetryMedia {
        reply: oneshot::Sender<Result<bool>>,
    },
    Snapshot {
        reply: oneshot::Sender<RoomSnapshot>,
    },
    Leave,
}

/// UI-side handle to a running room.
#[derive(Clone)]
pub struct RoomHandle {
    commands: mpsc::Sender<RoomCommand>,
    notices: broadcast::Sender<RoomNotice>,
}

impl RoomHandle {
    pub fn subscribe(&self) -> broadcast::Receiver<RoomNotice> {
        self.notices.subscribe()
    }

    pub async fn toggle_audio(&self) -> Result<bool> {
        self.request(|reply| RoomCommand::ToggleAudio { reply }).await?
    }

    pub async fn toggle_video(&self) -> Result<bool> {
        self.request(|reply| RoomCommand::ToggleVideo { reply }).await?
    }

    pub async fn send_chat(&self, text: impl Into<String>) -> Result<ChatMessage> {
        let text = text.into();
        self.request(|reply| RoomCommand::SendChat { text, reply })
            .await?
    }

    /// Ask for local media again after it became unavailable.
    pub async fn retry_media(&self) -> Result<bool> {
        self.request(|reply| RoomCommand::RetryMedia { reply }).await?
    }

    pub async fn snapshot(&self) -> Result<RoomSnapshot> {
        self.request(|reply| RoomCommand::Snapshot { reply }).await
    }

    /// Ask the runtime to leave and stop. Leaving twice is harmless.
    pub async fn leave(&self) {
        let _ = self.commands.send(RoomCommand::Leave).await;
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> RoomCommand,
    ) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(build(reply))
            .await
            .map_err(|_| Error::RuntimeStopped)?;
        rx.await.map_err(|_| Error::RuntimeStopped)
    }
}

pub struct RoomRuntime {
    client: RoomClient,
    relay_rx: mpsc::UnboundedReceiver<RelayEvent>,
    transport_rx: mpsc::UnboundedReceiver<TransportEvent>,
    media_rx: mpsc::UnboundedReceiver<MediaEvent>,
    command_rx: mpsc::Receiver<RoomCommand>,
    timer_tx: mpsc::UnboundedSender<TimerEvent>,
    timer_rx: mpsc::UnboundedReceiver<TimerEvent>,
}

impl RoomRuntime {
    /// Wrap a client and the receivers its capabilities report into.
    pub fn new(
        client: RoomClient,
        relay_rx: mpsc::UnboundedReceiver<RelayEvent>,
        transport_rx: mpsc::UnboundedReceiver<TransportEvent>,
        media_rx: mpsc::UnboundedReceiver<MediaEvent>,
    ) -> (Self, RoomHandle) {
        let (command_tx, command_rx) = mpsc::channel(32);
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();
        let handle = RoomHandle {
            commands: command_tx,
            notices: client.notice_sender(),
        };
        (
            Self {
                client,
                relay_rx,
                transport_rx,
                media_rx,
                command_rx,
                timer_tx,
                timer_rx,
            },
            handle,
        )
    }

    /// Connect to the relay named in `config` and build a runtime around it.
    /// Must be called inside a tokio runtime.
    pub fn connect(
        config: ClientConfig,
        transport: Box<dyn PeerTransport>,
        transport_rx: mpsc::UnboundedReceiver<TransportEvent>,
        media: Box<dyn MediaProvider>,
        media_rx: mpsc::UnboundedReceiver<MediaEvent>,
    ) -> Result<(Self, RoomHandle)> {
        config.validate()?;
        let (relay, relay_rx) = RelayConnection::spawn(config.relay_url.clone(), config.relay_backoff);
        let client = RoomClient::new(config, Box::new(relay), transport, media)?;
        Ok(Self::new(client, relay_rx, transport_rx, media_rx))
    }

    /// Run until `Leave`, until every `RoomHandle` is dropped, or until all
    /// event sources close. The client has left the room when this returns.
    pub async fn run(mut self) -> Result<()> {
        self.client.start()?;
        tracing::info!(room_id = self.client.room_id(), "Room runtime starting");

        loop {
            self.schedule_timers();

            // Events already queued are applied before the next command.
            tokio::select! {
                biased;

                Some(event) = self.relay_rx.recv() => {
                    self.client.handle(ClientEvent::Relay(event));
                }
                Some(event) = self.transport_rx.recv() => {
                    self.client.handle(ClientEvent::Transport(event));
                }
                Some(event) = self.media_rx.recv() => {
                    self.client.handle(ClientEvent::Media(event));
                }
                Some(event) = self.timer_rx.recv() => {
                    self.client.handle(ClientEvent::Timer(event));
                }
                command = self.command_rx.recv() => match command {
                    Some(RoomCommand::Leave) => {
                        tracing::info!("Leave requested, stopping room runtime");
                        break;
                    }
                    Some(command) => self.handle_command(command),
                    None => {
                        tracing::info!("All room handles dropped, stopping room runtime");
                        break;
                    }
                },
            }
        }

        self.client.leave();
        tracing::info!("Room runtime stopped");
        Ok(())
    }

    fn handle_command(&mut self, command: RoomCommand) {
        match command {
            RoomCommand::ToggleAudio { reply } => {
                let _ = reply.send(self.client.toggle_audio());
            }
            RoomCommand::ToggleVideo { reply } => {
                let _ = reply.send(self.client.toggle_video());
            }
            RoomCommand::SendChat { text, reply } => {
                let _ = reply.send(self.client.send_chat(&text));
            }
            RoomCommand::RetryMedia { reply } => {
                let _ = reply.send(self.client.retry_media());
            }
            RoomCommand::Snapshot { reply } => {
                let _ = reply.send(self.client.snapshot());
            }
            RoomCommand::Leave => {
                self.client.leave();
            }
        }
    }

    fn schedule_timers(&mut self) {
        for timer in self.client.take_scheduled() {
            let tx = self.timer_tx.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timer.delay).await;
                let _ = tx.send(timer.event);
            });
        }
    }
}
