//! Typed REST client for the chat backend.
//!
//! Every call attaches the current bearer token when one is set. A 401 on an
//! authenticated call publishes [`ClientEvent::AuthRequired`].

use std::sync::{Arc, RwLock};
use std::time::Duration;

use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use url::Url;

use parley_shared::models::{Channel, ChannelMember, Message, PresenceEntry, UserProfile};
use parley_shared::rest::{
    AvailabilityResponse, ChannelPatch, CreateChannelRequest, CreateChannelResponse,
    EmailCheck, HistoryResponse, ItemResponse, ListResponse, LoginRequest, LoginResponse,
    OnlineStatusRequest, ProfilePatch, ProfileUpdateResponse, RegisterRequest,
    RegisterResponse, SendMessageRequest, SendMessageResponse, UsernameCheck,
};
use parley_shared::{AccessToken, ChannelId, MessageId};

use crate::error::ApiError;
use crate::events::{ClientEvent, EventBus};

#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base: Url,
    token: Arc<RwLock<Option<AccessToken>>>,
    events: EventBus,
}

impl ApiClient {
    pub fn new(base: Url, timeout: Duration, events: EventBus) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_http(http, base, events))
    }

    pub fn with_http(http: reqwest::Client, mut base: Url, events: EventBus) -> Self {
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Self {
            http,
            base,
            token: Arc::new(RwLock::new(None)),
            events,
        }
    }

    /// Underlying HTTP client, shared with the polling transport.
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    pub fn set_token(&self, token: Option<AccessToken>) {
        match self.token.write() {
            Ok(mut slot) => *slot = token,
            Err(poisoned) => *poisoned.into_inner() = token,
        }
    }

    pub fn token(&self) -> Option<AccessToken> {
        match self.token.read() {
            Ok(slot) => slot.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    // -----------------------------------------------------------------------
    // Auth & registration
    // -----------------------------------------------------------------------

    pub async fn login(&self, request: &LoginRequest) -> Result<LoginResponse, ApiError> {
        let req = self.request(Method::POST, "/api/v1/auth/login")?.json(request);
        self.fetch("login", req).await
    }

    pub async fn logout(&self) -> Result<(), ApiError> {
        let req = self.request(Method::POST, "/api/auth/logout")?;
        self.execute("logout", req).await.map(drop)
    }

    pub async fn me(&self) -> Result<UserProfile, ApiError> {
        let req = self.request(Method::GET, "/api/v1/userprofileapi/me")?;
        let body: ItemResponse<UserProfile> = self.fetch("me", req).await?;
        Ok(body.result)
    }

    pub async fn register(&self, request: &RegisterRequest) -> Result<RegisterResponse, ApiError> {
        let req = self
            .request(Method::POST, "/api/v1/register/signup")?
            .json(request);
        self.fetch("signup", req).await
    }

    pub async fn check_username(&self, username: &str) -> Result<AvailabilityResponse, ApiError> {
        let body = UsernameCheck {
            username: username.to_string(),
        };
        let req = self
            .request(Method::POST, "/api/v1/register/check-username")?
            .json(&body);
        self.fetch("check-username", req).await
    }

    pub async fn check_email(&self, email: &str) -> Result<AvailabilityResponse, ApiError> {
        let body = EmailCheck {
            email: email.to_string(),
        };
        let req = self
            .request(Method::POST, "/api/register/check-email")?
            .json(&body);
        self.fetch("check-email", req).await
    }

    // -----------------------------------------------------------------------
    // Profile & presence
    // -----------------------------------------------------------------------

    pub async fn update_profile(&self, patch: &ProfilePatch) -> Result<Option<UserProfile>, ApiError> {
        let req = self
            .request(Method::POST, "/api/v1/userprofileapi/update-profile")?
            .json(patch);
        let body: ProfileUpdateResponse = self.fetch("update-profile", req).await?;
        Ok(body.data)
    }

    pub async fn set_online_status(&self, is_online: bool) -> Result<(), ApiError> {
        let req = self
            .request(Method::POST, "/api/v1/userprofileapi/set-online-status")?
            .json(&OnlineStatusRequest { is_online });
        self.execute("set-online-status", req).await.map(drop)
    }

    pub async fn online_users(&self) -> Result<Vec<PresenceEntry>, ApiError> {
        let req = self.request(Method::GET, "/api/v1/userprofileapi/online-users")?;
        let body: ListResponse<PresenceEntry> = self.fetch("online-users", req).await?;
        Ok(body.result)
    }

    // -----------------------------------------------------------------------
    // Channels
    // -----------------------------------------------------------------------

    pub async fn public_channels(&self) -> Result<Vec<Channel>, ApiError> {
        let req = self.request(Method::GET, "/api/v1/chatchannelapi/public-channels")?;
        let body: ListResponse<Channel> = self.fetch("public-channels", req).await?;
        Ok(body.result)
    }

    pub async fn my_channels(&self) -> Result<Vec<Channel>, ApiError> {
        let req = self.request(Method::GET, "/api/v1/chatchannelapi/my-channels")?;
        let body: ListResponse<Channel> = self.fetch("my-channels", req).await?;
        Ok(body.result)
    }

    pub async fn create_channel(
        &self,
        request: &CreateChannelRequest,
    ) -> Result<CreateChannelResponse, ApiError> {
        let req = self
            .request(Method::POST, "/api/v1/chatchannelapi/create-channel")?
            .json(request);
        self.fetch("create-channel", req).await
    }

    pub async fn update_channel(&self, id: ChannelId, patch: &ChannelPatch) -> Result<(), ApiError> {
        let req = self
            .request(Method::PUT, &format!("/api/v1/chatchannelapi/{id}"))?
            .json(patch);
        self.execute("update-channel", req).await.map(drop)
    }

    pub async fn channel_members(&self, id: ChannelId) -> Result<Vec<ChannelMember>, ApiError> {
        let req = self.request(
            Method::GET,
            &format!("/api/v1/channelmemberapi/channel/{id}/members"),
        )?;
        let body: ListResponse<ChannelMember> = self.fetch("channel-members", req).await?;
        Ok(body.result)
    }

    // -----------------------------------------------------------------------
    // Messages
    // -----------------------------------------------------------------------

    pub async fn recent_messages(&self, channel: ChannelId, limit: u32) -> Result<Vec<Message>, ApiError> {
        let req = self
            .request(Method::GET, &format!("/api/v1/chatmessageapi/recent/{limit}"))?
            .query(&[("channel_id", channel.0)]);
        let body: ListResponse<Message> = self.fetch("recent-messages", req).await?;
        Ok(body.result)
    }

    pub async fn history(
        &self,
        channel: ChannelId,
        before_id: Option<MessageId>,
        per_page: u32,
    ) -> Result<HistoryResponse, ApiError> {
        let mut query = vec![
            ("channel_id", channel.0),
            ("per_page", i64::from(per_page)),
            ("page", 1),
        ];
        if let Some(before) = before_id {
            query.push(("before_id", before.0));
        }
        let req = self
            .request(Method::GET, "/api/v1/chatmessageapi/history")?
            .query(&query);
        self.fetch("history", req).await
    }

    pub async fn send_message(&self, request: &SendMessageRequest) -> Result<Message, ApiError> {
        let req = self
            .request(Method::POST, "/api/v1/chatmessageapi/send")?
            .json(request);
        let body: SendMessageResponse = self.fetch("send-message", req).await?;
        Ok(body.data)
    }

    pub async fn delete_message(&self, id: MessageId) -> Result<(), ApiError> {
        let req = self.request(Method::POST, &format!("/api/v1/chatmessageapi/delete/{id}"))?;
        self.execute("delete-message", req).await.map(drop)
    }

    // -----------------------------------------------------------------------
    // Plumbing
    // -----------------------------------------------------------------------

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, ApiError> {
        let url = self
            .base
            .join(path.trim_start_matches('/'))
            .map_err(|source| ApiError::Url {
                path: path.to_string(),
                source,
            })?;
        let mut req = self.http.request(method, url);
        if let Some(token) = self.token() {
            req = req.header(reqwest::header::AUTHORIZATION, token.bearer());
        }
        Ok(req)
    }

    async fn fetch<T: DeserializeOwned>(&self, endpoint: &str, req: RequestBuilder) -> Result<T, ApiError> {
        let body = self.execute(endpoint, req).await?;
        decode(endpoint, &body)
    }

    /// Send the request and return the body of a successful response.
    async fn execute(&self, endpoint: &str, req: RequestBuilder) -> Result<String, ApiError> {
        let authenticated = self.token().is_some();
        let response = req.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if status.is_success() {
            tracing::debug!(endpoint, status = status.as_u16(), "API call succeeded");
            return Ok(body);
        }

        let err = ApiError::from_status(status.as_u16(), &body);
        tracing::warn!(endpoint, status = status.as_u16(), error = %err, "API call failed");
        if err.is_unauthorized() && authenticated {
            self.events.emit(ClientEvent::AuthRequired);
        }
        Err(err)
    }
}

fn decode<T: DeserializeOwned>(endpoint: &str, body: &str) -> Result<T, ApiError> {
    serde_json::from_str(body).map_err(|source| ApiError::Decode {
        endpoint: endpoint.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_shared::models::MessageType;
    use parley_shared::LocalId;

    fn wire<T: serde::Serialize>(body: &T) -> serde_json::Value {
        serde_json::to_value(body).unwrap()
    }

    fn client(base: &str) -> ApiClient {
        ApiClient::with_http(
            reqwest::Client::new(),
            Url::parse(base).unwrap(),
            EventBus::new(),
        )
    }

    #[test]
    fn test_paths_are_joined_under_base() {
        let api = client("http://localhost:8080");
        let req = api
            .request(Method::GET, "/api/v1/userprofileapi/me")
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(req.url().as_str(), "http://localhost:8080/api/v1/userprofileapi/me");

        let prefixed = client("https://example.com/chat");
        let req = prefixed
            .request(Method::GET, "/api/v1/userprofileapi/me")
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(req.url().as_str(), "https://example.com/chat/api/v1/userprofileapi/me");
    }

    #[test]
    fn test_bearer_header_follows_token() {
        let api = client("http://localhost:8080");
        let req = api.request(Method::GET, "/x").unwrap().build().unwrap();
        assert!(req.headers().get("authorization").is_none());

        api.set_token(Some(AccessToken::new("a.b.c")));
        let req = api.request(Method::GET, "/x").unwrap().build().unwrap();
        assert_eq!(req.headers()["authorization"], "Bearer a.b.c");
    }

    #[test]
    fn test_send_request_shape() {
        let body = wire(&SendMessageRequest {
            content: "hello".into(),
            message_type: MessageType::Text,
            reply_to_id: None,
            channel_id: ChannelId(3),
            client_id: LocalId::new(),
        });
        assert_eq!(body["message_type"], "text");
        assert_eq!(body["channel_id"], 3);
        assert!(body["reply_to_id"].is_null());
        assert!(body["client_id"].is_string());
    }

    #[test]
    fn test_decode_error_names_endpoint() {
        let err = decode::<ItemResponse<UserProfile>>("me", "[]").unwrap_err();
        assert!(matches!(err, ApiError::Decode { ref endpoint, .. } if endpoint == "me"));
    }
}
