//! Request and response bodies of the REST endpoints.
//!
//! Each endpoint has an explicit schema; responses are validated here instead
//! of being picked apart field by field by the callers.

use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_MAX_MEMBERS, LOGIN_PROVIDER};
use crate::models::{Channel, Message, MessageType, User, UserProfile};
use crate::types::{ChannelId, LocalId, MessageId};

// ---------------------------------------------------------------------------
// Envelopes
// ---------------------------------------------------------------------------

/// `{ "result": [...] }` list responses.
#[derive(Debug, Clone, Deserialize)]
pub struct ListResponse<T> {
    #[serde(default = "Vec::new")]
    pub result: Vec<T>,
    #[serde(default)]
    pub count: Option<u64>,
}

/// `{ "result": {...} }` single-item responses.
#[derive(Debug, Clone, Deserialize)]
pub struct ItemResponse<T> {
    pub result: T,
}

/// Error body returned with non-2xx statuses. The backend is not consistent
/// about the field name, so all three are accepted.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub msg: Option<String>,
}

impl ErrorBody {
    pub fn into_message(self) -> Option<String> {
        self.message
            .or(self.error)
            .or(self.msg)
            .filter(|m| !m.trim().is_empty())
    }
}

// ---------------------------------------------------------------------------
// Auth & registration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
    pub provider: String,
}

impl LoginRequest {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            provider: LOGIN_PROVIDER.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegisterRequest {
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password: String,
    /// Challenge-response token obtained from the CAPTCHA widget.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recaptcha_response: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub user: Option<User>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UsernameCheck {
    pub username: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmailCheck {
    pub email: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AvailabilityResponse {
    #[serde(default)]
    pub available: Option<bool>,
    #[serde(default)]
    pub message: Option<String>,
}

// ---------------------------------------------------------------------------
// Profile
// ---------------------------------------------------------------------------

/// Partial profile update; absent fields are left untouched by the server.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProfilePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProfileUpdateResponse {
    #[serde(default)]
    pub data: Option<UserProfile>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OnlineStatusRequest {
    pub is_online: bool,
}

// ---------------------------------------------------------------------------
// Channels
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct CreateChannelRequest {
    pub name: String,
    pub description: String,
    pub is_private: bool,
    pub max_members: u32,
}

impl CreateChannelRequest {
    /// Public channel with an empty description and the default member cap.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            is_private: false,
            max_members: DEFAULT_MAX_MEMBERS,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateChannelResponse {
    #[serde(default, alias = "data")]
    pub result: Option<Channel>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Settings update for a channel; only present fields are sent and applied.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ChannelPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_private: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_members: Option<u32>,
}

impl ChannelPatch {
    pub fn apply_to(&self, channel: &mut Channel) {
        if let Some(ref name) = self.name {
            channel.name = name.clone();
        }
        if let Some(ref description) = self.description {
            channel.description = Some(description.clone());
        }
        if let Some(is_private) = self.is_private {
            channel.is_private = is_private;
        }
        if let Some(is_active) = self.is_active {
            channel.is_active = is_active;
        }
        if let Some(max_members) = self.max_members {
            channel.max_members = max_members;
        }
    }
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct SendMessageRequest {
    pub content: String,
    pub message_type: MessageType,
    pub reply_to_id: Option<MessageId>,
    pub channel_id: ChannelId,
    pub client_id: LocalId,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SendMessageResponse {
    pub data: Message,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct Pagination {
    #[serde(default)]
    pub per_page: u32,
    #[serde(default)]
    pub has_next: bool,
    #[serde(default)]
    pub next_before_id: Option<MessageId>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HistoryResponse {
    #[serde(default = "Vec::new")]
    pub result: Vec<Message>,
    #[serde(default)]
    pub pagination: Option<Pagination>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_body_field_precedence() {
        let body: ErrorBody =
            serde_json::from_value(serde_json::json!({ "error": "nope", "msg": "other" }))
                .unwrap();
        assert_eq!(body.into_message().as_deref(), Some("nope"));

        let blank: ErrorBody =
            serde_json::from_value(serde_json::json!({ "message": "  " })).unwrap();
        assert_eq!(blank.into_message(), None);
    }

    #[test]
    fn test_channel_patch_only_serialises_present_fields() {
        let patch = ChannelPatch {
            name: Some("ops".into()),
            ..Default::default()
        };
        assert_eq!(
            serde_json::to_value(&patch).unwrap(),
            serde_json::json!({ "name": "ops" })
        );
    }

    #[test]
    fn test_login_request_carries_provider() {
        let body = serde_json::to_value(LoginRequest::new("alice", "pw")).unwrap();
        assert_eq!(body["provider"], LOGIN_PROVIDER);
    }

    #[test]
    fn test_history_without_pagination() {
        let page: HistoryResponse = serde_json::from_value(serde_json::json!({})).unwrap();
        assert!(page.result.is_empty());
        assert!(page.pagination.is_none());
    }
}
