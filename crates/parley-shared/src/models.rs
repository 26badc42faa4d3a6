//! Domain models exchanged with the chat backend.
//!
//! Every struct derives `Serialize` and `Deserialize`; field names follow the
//! backend's JSON so the same types serve REST bodies and socket payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_MAX_MEMBERS, GUEST_DISPLAY_NAME};
use crate::time::server_timestamp;
use crate::types::{ChannelId, LocalId, MessageId, UserId};

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

/// Account record returned by registration and the auth endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub username: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl User {
    /// `"first last"`, or the username when both names are blank.
    pub fn full_name(&self) -> String {
        let full = format!("{} {}", self.first_name, self.last_name);
        let full = full.trim();
        if full.is_empty() {
            self.username.clone()
        } else {
            full.to_string()
        }
    }

    pub fn is_admin(&self) -> bool {
        self.roles.iter().any(|r| r == "Admin")
    }
}

/// Extended profile of the signed-in user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserProfile {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub user_id: Option<UserId>,
    pub username: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub is_online: bool,
    #[serde(default, with = "server_timestamp::option")]
    pub last_seen: Option<DateTime<Utc>>,
    #[serde(default)]
    pub message_count: u64,
    #[serde(default, with = "server_timestamp::option")]
    pub join_date: Option<DateTime<Utc>>,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_language")]
    pub language: String,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_language() -> String {
    "en".to_string()
}

impl UserProfile {
    /// Display name with the same fallback chain the UI uses.
    pub fn display_name(&self) -> String {
        if let Some(name) = self.display_name.as_deref().filter(|n| !n.trim().is_empty()) {
            return name.to_string();
        }
        let full = format!(
            "{} {}",
            self.first_name.as_deref().unwrap_or_default(),
            self.last_name.as_deref().unwrap_or_default()
        );
        let full = full.trim();
        if !full.is_empty() {
            return full.to_string();
        }
        if !self.username.is_empty() {
            return self.username.clone();
        }
        GUEST_DISPLAY_NAME.to_string()
    }
}

// ---------------------------------------------------------------------------
// Channels
// ---------------------------------------------------------------------------

/// Summary of the newest message in a channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LastMessage {
    pub id: MessageId,
    pub content: String,
    pub sender_name: String,
    #[serde(with = "server_timestamp")]
    pub created_on: DateTime<Utc>,
}

impl From<&Message> for LastMessage {
    fn from(m: &Message) -> Self {
        Self {
            id: m.id,
            content: m.content.clone(),
            sender_name: m.sender_name.clone(),
            created_on: m.created_on,
        }
    }
}

/// A chat channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Channel {
    pub id: ChannelId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub is_private: bool,
    #[serde(default = "default_true")]
    pub is_active: bool,
    pub creator_id: UserId,
    #[serde(default)]
    pub creator_name: Option<String>,
    #[serde(default = "default_max_members")]
    pub max_members: u32,
    #[serde(default)]
    pub member_count: Option<u32>,
    #[serde(with = "server_timestamp")]
    pub created_on: DateTime<Utc>,
    #[serde(default, alias = "lastMessage")]
    pub last_message: Option<LastMessage>,
}

fn default_true() -> bool {
    true
}

fn default_max_members() -> u32 {
    DEFAULT_MAX_MEMBERS
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum MemberRole {
    Member,
    Admin,
    Owner,
}

impl MemberRole {
    pub fn can_manage(&self) -> bool {
        matches!(self, Self::Admin | Self::Owner)
    }
}

/// Membership of a user in a channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChannelMember {
    pub id: i64,
    pub channel_id: ChannelId,
    pub user_id: UserId,
    pub username: String,
    #[serde(default)]
    pub display_name: Option<String>,
    pub role: MemberRole,
    #[serde(default, with = "server_timestamp::option")]
    pub joined_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    #[default]
    Text,
    Image,
    File,
    #[serde(other)]
    Other,
}

/// A message as stored by the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub content: String,
    pub sender_id: UserId,
    #[serde(default)]
    pub sender_name: String,
    #[serde(default)]
    pub sender_first_name: Option<String>,
    #[serde(default)]
    pub sender_last_name: Option<String>,
    #[serde(default)]
    pub message_type: MessageType,
    #[serde(default)]
    pub attachment_path: Option<String>,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default)]
    pub reply_to_id: Option<MessageId>,
    pub channel_id: ChannelId,
    #[serde(with = "server_timestamp")]
    pub created_on: DateTime<Utc>,
    #[serde(default, with = "server_timestamp::option")]
    pub changed_on: Option<DateTime<Utc>>,
    /// Echo of the client id supplied on send, when the server relays it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<LocalId>,
}

// ---------------------------------------------------------------------------
// Presence
// ---------------------------------------------------------------------------

/// One entry of the online-users snapshot.
///
/// The socket snapshot carries `connected_at`, the REST endpoint `last_seen`;
/// both land in `last_seen`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PresenceEntry {
    pub user_id: UserId,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default = "default_true")]
    pub is_online: bool,
    #[serde(default, alias = "connected_at", with = "server_timestamp::option")]
    pub last_seen: Option<DateTime<Utc>>,
}

impl PresenceEntry {
    pub fn name(&self) -> &str {
        match self.display_name.as_deref() {
            Some(n) if !n.is_empty() => n,
            _ => &self.username,
        }
    }
}
