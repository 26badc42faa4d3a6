use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::*;
use crate::error::ProtocolError;
use crate::models::{Message, PresenceEntry};
use crate::types::{ChannelId, MessageId, UserId};

/// Application events received over the real-time connection.
///
/// Connection lifecycle (`connect`, `disconnect`, `connect_error`) is reported
/// by the transport layer and is not part of this enum.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    NewMessage(Message),
    MessageDeleted(MessageDeleted),
    UserJoined(PresenceNotice),
    UserLeft(PresenceNotice),
    OnlineUsers(Vec<PresenceEntry>),
    UserTyping(TypingNotice),
    Error(ServerNotice),
    Status(ServerNotice),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageDeleted {
    pub message_id: MessageId,
    #[serde(default)]
    pub channel_id: Option<ChannelId>,
}

/// Payload of `user_joined` / `user_left`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PresenceNotice {
    pub user_id: UserId,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl PresenceNotice {
    pub fn name(&self) -> &str {
        match self.display_name.as_deref() {
            Some(n) if !n.is_empty() => n,
            _ => &self.username,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TypingNotice {
    #[serde(default)]
    pub user_id: Option<UserId>,
    #[serde(default)]
    pub username: Option<String>,
    pub display_name: String,
    pub is_typing: bool,
    #[serde(default)]
    pub channel_id: Option<ChannelId>,
}

/// `{ "message": "..." }` payload of `error` and `status`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerNotice {
    #[serde(default)]
    pub message: String,
}

impl InboundEvent {
    /// Decode a named event. Unknown event names yield `Ok(None)`; a known
    /// event with a malformed payload is an error.
    pub fn parse(name: &str, payload: Value) -> Result<Option<Self>, ProtocolError> {
        let event = match name {
            EVENT_NEW_MESSAGE => Self::NewMessage(decode(name, payload)?),
            EVENT_MESSAGE_DELETED => Self::MessageDeleted(decode(name, payload)?),
            EVENT_USER_JOINED => Self::UserJoined(decode(name, payload)?),
            EVENT_USER_LEFT => Self::UserLeft(decode(name, payload)?),
            EVENT_ONLINE_USERS => Self::OnlineUsers(decode(name, payload)?),
            EVENT_USER_TYPING => Self::UserTyping(decode(name, payload)?),
            EVENT_ERROR => Self::Error(decode_notice(name, payload)?),
            EVENT_STATUS => Self::Status(decode_notice(name, payload)?),
            _ => return Ok(None),
        };
        Ok(Some(event))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::NewMessage(_) => EVENT_NEW_MESSAGE,
            Self::MessageDeleted(_) => EVENT_MESSAGE_DELETED,
            Self::UserJoined(_) => EVENT_USER_JOINED,
            Self::UserLeft(_) => EVENT_USER_LEFT,
            Self::OnlineUsers(_) => EVENT_ONLINE_USERS,
            Self::UserTyping(_) => EVENT_USER_TYPING,
            Self::Error(_) => EVENT_ERROR,
            Self::Status(_) => EVENT_STATUS,
        }
    }
}

fn decode<T: for<'de> Deserialize<'de>>(event: &str, payload: Value) -> Result<T, ProtocolError> {
    serde_json::from_value(payload).map_err(|source| ProtocolError::InvalidPayload {
        event: event.to_string(),
        source,
    })
}

/// Error and status notices are sometimes bare strings.
fn decode_notice(event: &str, payload: Value) -> Result<ServerNotice, ProtocolError> {
    match payload {
        Value::String(message) => Ok(ServerNotice { message }),
        other => decode(event, other),
    }
}

/// Application events sent over the real-time connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundEvent {
    SendMessage {
        content: String,
        channel_id: ChannelId,
    },
    DeleteMessage {
        message_id: MessageId,
    },
    Typing {
        is_typing: bool,
        channel_id: Option<ChannelId>,
    },
    JoinRoom {
        room: String,
    },
    LeaveRoom {
        room: String,
    },
    JoinChannel {
        channel_id: ChannelId,
    },
    GetOnlineUsers,
}

impl OutboundEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SendMessage { .. } => EVENT_SEND_MESSAGE,
            Self::DeleteMessage { .. } => EVENT_DELETE_MESSAGE,
            Self::Typing { .. } => EVENT_TYPING,
            Self::JoinRoom { .. } => EVENT_JOIN_ROOM,
            Self::LeaveRoom { .. } => EVENT_LEAVE_ROOM,
            Self::JoinChannel { .. } => EVENT_JOIN_CHANNEL,
            Self::GetOnlineUsers => EVENT_GET_ONLINE_USERS,
        }
    }

    /// JSON argument of the event, `None` for argument-less events.
    pub fn payload(&self) -> Option<Value> {
        let value = match self {
            Self::SendMessage {
                content,
                channel_id,
            } => serde_json::json!({ "content": content, "channel_id": channel_id }),
            Self::DeleteMessage { message_id } => serde_json::json!({ "message_id": message_id }),
            Self::Typing {
                is_typing,
                channel_id: Some(channel_id),
            } => serde_json::json!({ "is_typing": is_typing, "channel_id": channel_id }),
            Self::Typing {
                is_typing,
                channel_id: None,
            } => serde_json::json!({ "is_typing": is_typing }),
            Self::JoinRoom { room } | Self::LeaveRoom { room } => {
                serde_json::json!({ "room": room })
            }
            Self::JoinChannel { channel_id } => serde_json::json!({ "channel_id": channel_id }),
            Self::GetOnlineUsers => return None,
        };
        Some(value)
    }
}
