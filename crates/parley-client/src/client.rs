//! `ChatClient`: the facade tying session, real-time connection and stores
//! together.

use std::sync::Arc;

use tokio::sync::broadcast;

use parley_shared::models::UserProfile;
use parley_shared::ChannelId;
use parley_store::{SqliteTokenStore, TokenStorage};

use crate::api::ApiClient;
use crate::bridge;
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::events::{ClientEvent, EventBus};
use crate::guard::{self, RouteDecision};
use crate::realtime::RealtimeClient;
use crate::session::{RestoreOutcome, SessionManager};
use crate::stores::{ChannelStore, ChatStore};

/// Shared by the facade and the bridge task.
pub(crate) struct ClientInner {
    pub(crate) config: ClientConfig,
    pub(crate) events: EventBus,
    pub(crate) session: Arc<SessionManager>,
    pub(crate) realtime: Arc<RealtimeClient>,
    pub(crate) channels: ChannelStore,
    pub(crate) chat: ChatStore,
}

impl ClientInner {
    /// End the session locally after the server refused it.
    pub(crate) fn force_logout(&self) {
        tracing::warn!("Session rejected by server, logging out");
        self.realtime.disconnect();
        self.session.clear();
        self.channels.reset();
        self.chat.reset();
        self.events.emit(ClientEvent::AuthRequired);
    }
}

#[derive(Clone)]
pub struct ChatClient {
    inner: Arc<ClientInner>,
}

impl ChatClient {
    pub fn new(config: ClientConfig, storage: Arc<dyn TokenStorage>) -> Result<Self> {
        let events = EventBus::new();
        let api = ApiClient::new(config.api_base.clone(), config.request_timeout, events.clone())?;
        let session = Arc::new(SessionManager::new(api.clone(), storage, events.clone()));
        let realtime = Arc::new(RealtimeClient::new(config.clone(), api.http().clone()));
        let channels = ChannelStore::new(
            api.clone(),
            Arc::clone(&session),
            Arc::clone(&realtime),
            events.clone(),
        );
        let chat = ChatStore::new(api, events.clone());

        Ok(Self {
            inner: Arc::new(ClientInner {
                config,
                events,
                session,
                realtime,
                channels,
                chat,
            }),
        })
    }

    /// Client persisting its session in the SQLite database under
    /// `config.data_dir`.
    pub fn open(config: ClientConfig) -> Result<Self> {
        let storage = SqliteTokenStore::open(config.data_dir.as_deref())?;
        Self::new(config, Arc::new(storage))
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn session(&self) -> &SessionManager {
        &self.inner.session
    }

    pub fn realtime(&self) -> &RealtimeClient {
        &self.inner.realtime
    }

    pub fn channels(&self) -> &ChannelStore {
        &self.inner.channels
    }

    pub fn chat(&self) -> &ChatStore {
        &self.inner.chat
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.inner.events.subscribe()
    }

    pub fn guard(&self, route: &str) -> RouteDecision {
        guard::guard(route, self.inner.session.is_authenticated())
    }

    // -----------------------------------------------------------------------
    // Session
    // -----------------------------------------------------------------------

    /// Restore the persisted session and refresh the identity. Returns
    /// whether a usable session exists afterwards.
    pub async fn start(&self) -> Result<bool> {
        match self.inner.session.restore()? {
            RestoreOutcome::NoSession => Ok(false),
            RestoreOutcome::Rejected(e) => {
                tracing::info!(reason = %e, "Stored session unusable");
                self.inner.channels.reset();
                self.inner.chat.reset();
                self.inner.events.emit(ClientEvent::AuthRequired);
                Ok(false)
            }
            RestoreOutcome::Restored => {
                if let Err(e) = self.inner.session.refresh_identity().await {
                    tracing::warn!(error = %e, "Failed to refresh identity");
                }
                Ok(self.inner.session.is_authenticated())
            }
        }
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<Option<UserProfile>> {
        self.inner.session.login(username, password).await
    }

    /// Disconnect, end the session and clear every store. Never fails.
    pub async fn logout(&self) {
        self.inner.realtime.disconnect();
        self.inner.session.logout().await;
        self.inner.channels.reset();
        self.inner.chat.reset();
    }

    // -----------------------------------------------------------------------
    // Real-time
    // -----------------------------------------------------------------------

    /// Open the real-time connection. Returns `false` when there is no valid
    /// session; an expired token ends the session.
    pub fn connect(&self) -> Result<bool> {
        let Some(token) = self.inner.session.valid_token() else {
            if self.inner.session.is_authenticated() {
                self.inner.force_logout();
            } else {
                tracing::warn!("No session token, not connecting");
            }
            return Ok(false);
        };

        if let Some(socket) = self.inner.realtime.connect(token)? {
            bridge::spawn(Arc::clone(&self.inner), socket);
        }
        Ok(true)
    }

    pub fn disconnect(&self) {
        self.inner.realtime.disconnect();
        self.inner.chat.set_connected(false);
    }

    /// Shut the real-time client down for good.
    pub fn dispose(&self) {
        self.inner.realtime.dispose();
        self.inner.chat.set_connected(false);
    }

    // -----------------------------------------------------------------------
    // Convenience
    // -----------------------------------------------------------------------

    pub async fn set_typing(&self, is_typing: bool) -> Result<()> {
        let channel = self.inner.channels.current_channel_id();
        self.inner.realtime.set_typing(is_typing, channel).await
    }

    pub async fn join_room(&self, room: &str) -> Result<()> {
        self.inner.realtime.join_room(room).await
    }

    pub async fn leave_room(&self, room: &str) -> Result<()> {
        self.inner.realtime.leave_room(room).await
    }

    /// Post `content` over the socket instead of REST. No optimistic entry
    /// is created; the message shows up through `new_message`.
    pub async fn emit_message(&self, content: &str, channel_id: Option<ChannelId>) -> Result<()> {
        let content = content.trim();
        if content.is_empty() {
            return Err(ClientError::EmptyMessage);
        }
        let channel = channel_id
            .or_else(|| self.inner.channels.current_channel_id())
            .ok_or(ClientError::NoActiveChannel)?;
        self.inner.realtime.send_message(content, channel).await
    }

    #[cfg(test)]
    pub(crate) fn inner(&self) -> &Arc<ClientInner> {
        &self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_store::MemoryTokenStore;

    fn client() -> ChatClient {
        let config = ClientConfig {
            api_base: url::Url::parse("http://127.0.0.1:9").unwrap(),
            ..Default::default()
        };
        ChatClient::new(config, Arc::new(MemoryTokenStore::new())).unwrap()
    }

    #[tokio::test]
    async fn test_connect_without_session_returns_false() {
        let client = client();
        assert!(!client.connect().unwrap());
        assert!(!client.realtime().is_active());
    }

    #[tokio::test]
    async fn test_start_without_stored_token() {
        let client = client();
        assert!(!client.start().await.unwrap());
        assert_eq!(client.guard("/chat"), RouteDecision::RedirectToLogin);
        assert_eq!(client.guard("/login"), RouteDecision::Allow);
    }

    #[tokio::test]
    async fn test_emit_message_validates_before_sending() {
        let client = client();
        assert!(matches!(
            client.emit_message("  ", None).await,
            Err(ClientError::EmptyMessage)
        ));
        assert!(matches!(
            client.emit_message("hi", None).await,
            Err(ClientError::NoActiveChannel)
        ));
        assert!(matches!(
            client.emit_message("hi", Some(ChannelId(1))).await,
            Err(ClientError::NotConnected)
        ));
    }
}
