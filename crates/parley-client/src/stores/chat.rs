//! Connection status, presence, typing indicators and system notices.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use parley_shared::constants::MAX_SYSTEM_NOTICES;
use parley_shared::models::PresenceEntry;
use parley_shared::{ChannelId, UserId};

use crate::api::ApiClient;
use crate::error::{ClientError, Result};
use crate::events::{ClientEvent, EventBus};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemNotice {
    pub text: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Typist {
    user_id: Option<UserId>,
    name: String,
}

impl Typist {
    fn matches(&self, user_id: Option<UserId>, name: &str) -> bool {
        match (self.user_id, user_id) {
            (Some(a), Some(b)) => a == b,
            _ => self.name == name,
        }
    }
}

#[derive(Debug, Default)]
struct ChatState {
    connected: bool,
    online: Vec<PresenceEntry>,
    /// Keyed by channel; `None` collects notices that name no channel.
    typing: HashMap<Option<ChannelId>, Vec<Typist>>,
    notices: VecDeque<SystemNotice>,
    error: Option<String>,
}

pub struct ChatStore {
    api: ApiClient,
    events: EventBus,
    state: Mutex<ChatState>,
}

impl ChatStore {
    pub fn new(api: ApiClient, events: EventBus) -> Self {
        Self {
            api,
            events,
            state: Mutex::new(ChatState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ChatState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    // -----------------------------------------------------------------------
    // Connection
    // -----------------------------------------------------------------------

    pub fn is_connected(&self) -> bool {
        self.lock().connected
    }

    pub fn set_connected(&self, connected: bool) {
        let changed = {
            let mut state = self.lock();
            let changed = state.connected != connected;
            state.connected = connected;
            if !connected {
                state.typing.clear();
            }
            changed
        };
        if changed {
            self.events.emit(ClientEvent::ConnectionChanged { connected });
        }
    }

    // -----------------------------------------------------------------------
    // Presence
    // -----------------------------------------------------------------------

    pub fn online_users(&self) -> Vec<PresenceEntry> {
        self.lock().online.clone()
    }

    pub fn replace_presence(&self, users: Vec<PresenceEntry>) {
        let online = {
            let mut state = self.lock();
            state.online = users;
            state.online.len()
        };
        tracing::debug!(online, "Presence snapshot replaced");
        self.events.emit(ClientEvent::PresenceUpdated { online });
    }

    pub fn upsert_presence(&self, entry: PresenceEntry) {
        let online = {
            let mut state = self.lock();
            match state.online.iter_mut().find(|u| u.user_id == entry.user_id) {
                Some(existing) => *existing = entry,
                None => state.online.push(entry),
            }
            state.online.len()
        };
        self.events.emit(ClientEvent::PresenceUpdated { online });
    }

    pub fn remove_presence(&self, user_id: UserId) {
        let online = {
            let mut state = self.lock();
            state.online.retain(|u| u.user_id != user_id);
            state.online.len()
        };
        self.events.emit(ClientEvent::PresenceUpdated { online });
    }

    /// Reload the presence snapshot over REST.
    pub async fn fetch_online_users(&self) -> Result<()> {
        if self.api.token().is_none() {
            return Err(ClientError::NotAuthenticated);
        }
        match self.api.online_users().await {
            Ok(users) => {
                self.replace_presence(users);
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to fetch online users");
                Err(e.into())
            }
        }
    }

    // -----------------------------------------------------------------------
    // Typing
    // -----------------------------------------------------------------------

    pub fn typing_names(&self, channel_id: Option<ChannelId>) -> Vec<String> {
        self.lock()
            .typing
            .get(&channel_id)
            .map(|list| list.iter().map(|t| t.name.clone()).collect())
            .unwrap_or_default()
    }

    /// Apply a typing start/stop. Returns whether the set changed.
    pub fn set_typing(
        &self,
        channel_id: Option<ChannelId>,
        user_id: Option<UserId>,
        name: &str,
        is_typing: bool,
    ) -> bool {
        let names = {
            let mut state = self.lock();
            let present = state
                .typing
                .get(&channel_id)
                .is_some_and(|list| list.iter().any(|t| t.matches(user_id, name)));
            match (is_typing, present) {
                (true, false) => state.typing.entry(channel_id).or_default().push(Typist {
                    user_id,
                    name: name.to_string(),
                }),
                (false, true) => {
                    if let Some(list) = state.typing.get_mut(&channel_id) {
                        list.retain(|t| !t.matches(user_id, name));
                    }
                }
                _ => return false,
            }
            let names: Vec<String> = state
                .typing
                .get(&channel_id)
                .map(|list| list.iter().map(|t| t.name.clone()).collect())
                .unwrap_or_default();
            if names.is_empty() {
                state.typing.remove(&channel_id);
            }
            names
        };
        self.events
            .emit(ClientEvent::TypingChanged { channel_id, names });
        true
    }

    /// Someone who just sent a message is no longer typing.
    pub fn clear_typing_for(&self, channel_id: ChannelId, user_id: UserId, name: &str) {
        let changed: Vec<(Option<ChannelId>, Vec<String>)> = {
            let mut state = self.lock();
            let mut changed = Vec::new();
            for key in [Some(channel_id), None] {
                if let Some(list) = state.typing.get_mut(&key) {
                    let before = list.len();
                    list.retain(|t| !t.matches(Some(user_id), name));
                    if list.len() != before {
                        changed.push((key, list.iter().map(|t| t.name.clone()).collect()));
                    }
                    if list.is_empty() {
                        state.typing.remove(&key);
                    }
                }
            }
            changed
        };
        for (channel_id, names) in changed {
            self.events
                .emit(ClientEvent::TypingChanged { channel_id, names });
        }
    }

    // -----------------------------------------------------------------------
    // Notices & errors
    // -----------------------------------------------------------------------

    pub fn notices(&self) -> Vec<SystemNotice> {
        self.lock().notices.iter().cloned().collect()
    }

    pub fn push_notice(&self, text: impl Into<String>) {
        let text = text.into();
        {
            let mut state = self.lock();
            state.notices.push_back(SystemNotice {
                text: text.clone(),
                at: Utc::now(),
            });
            while state.notices.len() > MAX_SYSTEM_NOTICES {
                state.notices.pop_front();
            }
        }
        self.events.emit(ClientEvent::SystemNotice { text });
    }

    pub fn error(&self) -> Option<String> {
        self.lock().error.clone()
    }

    pub fn set_error(&self, message: impl Into<String>) {
        let message = message.into();
        self.lock().error = Some(message.clone());
        self.events.emit(ClientEvent::Error { message });
    }

    pub fn clear_error(&self) {
        self.lock().error = None;
    }

    pub fn reset(&self) {
        *self.lock() = ChatState::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ChatStore {
        let events = EventBus::new();
        let api = ApiClient::with_http(
            reqwest::Client::new(),
            url::Url::parse("http://127.0.0.1:9").unwrap(),
            events.clone(),
        );
        ChatStore::new(api, events)
    }

    fn presence(id: i64, name: &str) -> PresenceEntry {
        PresenceEntry {
            user_id: UserId(id),
            username: name.to_string(),
            display_name: None,
            is_online: true,
            last_seen: None,
        }
    }

    #[test]
    fn test_stop_for_absent_typist_leaves_no_entry() {
        let chat = store();
        assert!(!chat.set_typing(Some(ChannelId(4)), Some(UserId(2)), "Bob", false));
        assert!(!chat.lock().typing.contains_key(&Some(ChannelId(4))));
        assert!(chat.lock().typing.is_empty());
    }

    #[test]
    fn test_typing_start_then_stop_leaves_set_empty() {
        let chat = store();
        let channel = Some(ChannelId(1));
        assert!(chat.set_typing(channel, None, "Alice", true));
        assert!(!chat.set_typing(channel, None, "Alice", true));
        assert_eq!(chat.typing_names(channel), vec!["Alice".to_string()]);

        assert!(chat.set_typing(channel, None, "Alice", false));
        assert!(chat.typing_names(channel).is_empty());
    }

    #[test]
    fn test_typing_is_per_channel() {
        let chat = store();
        chat.set_typing(Some(ChannelId(1)), Some(UserId(2)), "Bob", true);
        assert!(chat.typing_names(Some(ChannelId(2))).is_empty());
        assert_eq!(chat.typing_names(Some(ChannelId(1))), vec!["Bob".to_string()]);
    }

    #[test]
    fn test_sending_clears_typing() {
        let chat = store();
        chat.set_typing(Some(ChannelId(1)), Some(UserId(2)), "Bob", true);
        chat.set_typing(None, Some(UserId(2)), "Bob", true);
        chat.clear_typing_for(ChannelId(1), UserId(2), "bob");
        assert!(chat.typing_names(Some(ChannelId(1))).is_empty());
        assert!(chat.typing_names(None).is_empty());
    }

    #[test]
    fn test_notices_are_bounded() {
        let chat = store();
        for i in 0..(MAX_SYSTEM_NOTICES + 5) {
            chat.push_notice(format!("notice {i}"));
        }
        let notices = chat.notices();
        assert_eq!(notices.len(), MAX_SYSTEM_NOTICES);
        assert_eq!(notices[0].text, "notice 5");
    }

    #[test]
    fn test_presence_upsert_and_remove() {
        let chat = store();
        chat.replace_presence(vec![presence(1, "alice"), presence(2, "bob")]);
        chat.upsert_presence(presence(2, "bobby"));
        chat.upsert_presence(presence(3, "carol"));
        chat.remove_presence(UserId(1));

        let names: Vec<String> = chat.online_users().iter().map(|u| u.username.clone()).collect();
        assert_eq!(names, vec!["bobby".to_string(), "carol".to_string()]);
    }

    #[test]
    fn test_disconnect_clears_typing() {
        let chat = store();
        chat.set_connected(true);
        chat.set_typing(None, None, "Alice", true);
        chat.set_connected(false);
        assert!(chat.typing_names(None).is_empty());
    }
}
