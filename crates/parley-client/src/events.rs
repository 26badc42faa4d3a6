use std::time::Duration;

use serde::Serialize;
use tokio::sync::broadcast;

use parley_shared::{ChannelId, LocalId, MessageId};

/// Depth of the event channel; slow subscribers see `Lagged` past this.
const EVENT_BUFFER: usize = 256;

/// State changes published to whatever renders the client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    SessionChanged { authenticated: bool },
    /// The server refused the session; the UI should show the login page.
    AuthRequired,
    ConnectionChanged { connected: bool },
    Reconnecting { attempt: u32, delay: Duration },
    ChannelsUpdated,
    ChannelSwitched { channel_id: ChannelId },
    MessageAdded { channel_id: ChannelId, message_id: MessageId },
    MessageQueued { channel_id: ChannelId, local_id: LocalId },
    MessageRemoved { channel_id: ChannelId, message_id: MessageId },
    MessageConfirmed { channel_id: ChannelId, local_id: LocalId, message_id: MessageId },
    MessageFailed { channel_id: ChannelId, local_id: LocalId, error: String },
    MessagesLoaded { channel_id: ChannelId, count: usize },
    HistoryLoaded { channel_id: ChannelId, count: usize, has_more: bool },
    MembersUpdated { channel_id: ChannelId },
    PresenceUpdated { online: usize },
    TypingChanged { channel_id: Option<ChannelId>, names: Vec<String> },
    SystemNotice { text: String },
    Error { message: String },
}

/// Fan-out of [`ClientEvent`]s to any number of subscribers.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ClientEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_BUFFER);
        Self { tx }
    }

    pub fn emit(&self, event: ClientEvent) {
        if let Err(e) = self.tx.send(event) {
            tracing::trace!(event = ?e.0, "No event subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
