//! Handle on the single real-time connection of a client.
//!
//! The connection itself runs in the `parley_net` connection task; this type
//! owns its command sender, tracks whether the socket is up and refuses to
//! emit while it is not.

use std::sync::{Mutex, MutexGuard};

use tokio::sync::{mpsc, oneshot};

use parley_net::{spawn_connection, SocketCommand, SocketNotification};
use parley_shared::protocol::OutboundEvent;
use parley_shared::{AccessToken, ChannelId, MessageId};

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};

/// A freshly started connection: its generation and notification stream.
#[derive(Debug)]
pub struct SocketSession {
    pub generation: u64,
    pub notifications: mpsc::Receiver<SocketNotification>,
}

#[derive(Default)]
struct RealtimeState {
    cmd_tx: Option<mpsc::Sender<SocketCommand>>,
    connected: bool,
    generation: u64,
    disposed: bool,
}

pub struct RealtimeClient {
    config: ClientConfig,
    http: reqwest::Client,
    state: Mutex<RealtimeState>,
}

impl RealtimeClient {
    pub fn new(config: ClientConfig, http: reqwest::Client) -> Self {
        Self {
            config,
            http,
            state: Mutex::new(RealtimeState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RealtimeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_connected(&self) -> bool {
        self.lock().connected
    }

    /// Whether a connection task is running (connected or reconnecting).
    pub fn is_active(&self) -> bool {
        self.lock()
            .cmd_tx
            .as_ref()
            .map(|tx| !tx.is_closed())
            .unwrap_or(false)
    }

    /// Start the connection. Returns `None` when one is already running.
    pub fn connect(&self, token: AccessToken) -> Result<Option<SocketSession>> {
        let mut state = self.lock();
        if state.disposed {
            return Err(ClientError::Disposed);
        }
        if state.cmd_tx.as_ref().is_some_and(|tx| !tx.is_closed()) {
            tracing::debug!("Realtime connection already running");
            return Ok(None);
        }

        let (cmd_tx, notifications) =
            spawn_connection(self.config.connection(token), self.http.clone());
        state.generation += 1;
        state.cmd_tx = Some(cmd_tx);
        state.connected = false;
        tracing::info!(generation = state.generation, "Realtime connection started");

        Ok(Some(SocketSession {
            generation: state.generation,
            notifications,
        }))
    }

    /// Stop the connection. No reconnection follows.
    pub fn disconnect(&self) {
        let tx = {
            let mut state = self.lock();
            state.connected = false;
            state.cmd_tx.take()
        };
        if let Some(tx) = tx {
            // Dropping the sender stops the task as well, so a full queue is fine.
            if let Err(e) = tx.try_send(SocketCommand::Shutdown) {
                tracing::debug!(error = %e, "Shutdown command not queued");
            }
            tracing::info!("Realtime connection stopped");
        }
    }

    /// Disconnect for good; later `connect` calls fail.
    pub fn dispose(&self) {
        self.disconnect();
        self.lock().disposed = true;
    }

    /// Whether `generation` is the running session.
    pub fn is_current(&self, generation: u64) -> bool {
        let state = self.lock();
        state.generation == generation && state.cmd_tx.is_some()
    }

    /// Record a connection status change reported by session `generation`.
    /// Reports from superseded sessions are ignored.
    pub fn mark_connected(&self, generation: u64, connected: bool) -> bool {
        let mut state = self.lock();
        if state.generation != generation || state.cmd_tx.is_none() {
            return false;
        }
        state.connected = connected;
        true
    }

    /// The notification stream of session `generation` has ended.
    pub fn finished(&self, generation: u64) {
        let mut state = self.lock();
        if state.generation == generation {
            state.connected = false;
            state.cmd_tx = None;
        }
    }

    /// Emit an event. Fails with `NotConnected` without sending anything
    /// while the socket is down.
    pub async fn emit(&self, event: OutboundEvent) -> Result<()> {
        let tx = {
            let state = self.lock();
            match (&state.cmd_tx, state.connected) {
                (Some(tx), true) => tx.clone(),
                _ => return Err(ClientError::NotConnected),
            }
        };

        let (reply, rx) = oneshot::channel();
        let name = event.name();
        tx.send(SocketCommand::Emit {
            event: name.to_string(),
            payload: event.payload(),
            reply,
        })
        .await
        .map_err(|_| ClientError::NotConnected)?;

        match rx.await {
            Ok(Ok(())) => {
                tracing::trace!(event = name, "Event emitted");
                Ok(())
            }
            Ok(Err(parley_net::NetError::NotConnected)) | Err(_) => Err(ClientError::NotConnected),
            Ok(Err(e)) => Err(e.into()),
        }
    }

    pub async fn send_message(&self, content: &str, channel_id: ChannelId) -> Result<()> {
        self.emit(OutboundEvent::SendMessage {
            content: content.to_string(),
            channel_id,
        })
        .await
    }

    pub async fn delete_message(&self, message_id: MessageId) -> Result<()> {
        self.emit(OutboundEvent::DeleteMessage { message_id }).await
    }

    pub async fn set_typing(&self, is_typing: bool, channel_id: Option<ChannelId>) -> Result<()> {
        self.emit(OutboundEvent::Typing {
            is_typing,
            channel_id,
        })
        .await
    }

    pub async fn join_room(&self, room: &str) -> Result<()> {
        self.emit(OutboundEvent::JoinRoom {
            room: room.to_string(),
        })
        .await
    }

    pub async fn leave_room(&self, room: &str) -> Result<()> {
        self.emit(OutboundEvent::LeaveRoom {
            room: room.to_string(),
        })
        .await
    }

    pub async fn join_channel(&self, channel_id: ChannelId) -> Result<()> {
        self.emit(OutboundEvent::JoinChannel { channel_id }).await
    }

    pub async fn request_online_users(&self) -> Result<()> {
        self.emit(OutboundEvent::GetOnlineUsers).await
    }
}
