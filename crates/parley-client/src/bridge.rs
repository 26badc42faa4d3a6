//! Bridge between the connection task and the stores: consumes socket
//! notifications and applies them to client state.

use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use parley_net::{DisconnectReason, SocketNotification};
use parley_shared::models::PresenceEntry;
use parley_shared::protocol::InboundEvent;

use crate::client::ClientInner;
use crate::events::ClientEvent;
use crate::realtime::SocketSession;

pub(crate) fn spawn(inner: Arc<ClientInner>, session: SocketSession) -> JoinHandle<()> {
    tokio::spawn(notification_loop(inner, session))
}

async fn notification_loop(inner: Arc<ClientInner>, session: SocketSession) {
    let SocketSession {
        generation,
        mut notifications,
    } = session;
    info!(generation, "Realtime bridge started");

    while let Some(notification) = notifications.recv().await {
        match notification {
            SocketNotification::Connected { sid, transport } => {
                if !inner.realtime.mark_connected(generation, true) {
                    continue;
                }
                info!(sid = ?sid, transport = %transport, "Realtime connected");
                inner.chat.clear_error();
                inner.chat.set_connected(true);
                on_connected(Arc::clone(&inner));
            }

            SocketNotification::Disconnected { reason } => {
                if !inner.realtime.mark_connected(generation, false) {
                    debug!(generation, reason = ?reason, "Ignoring disconnect of a superseded session");
                    continue;
                }
                inner.chat.set_connected(false);
                match reason {
                    DisconnectReason::TransportLost(detail) => {
                        warn!(detail = %detail, "Realtime connection lost");
                        inner.chat.set_error(format!("Connection lost: {detail}"));
                    }
                    other => info!(reason = ?other, "Realtime disconnected"),
                }
            }

            SocketNotification::ConnectError {
                message,
                auth_rejected,
            } => {
                if !inner.realtime.mark_connected(generation, false) {
                    debug!(generation, error = %message, "Ignoring connect error of a superseded session");
                    continue;
                }
                inner.chat.set_connected(false);
                warn!(error = %message, auth_rejected, "Realtime connection refused");
                if auth_rejected {
                    inner.force_logout();
                } else {
                    inner.chat.set_error(message);
                }
            }

            SocketNotification::Reconnecting { .. } | SocketNotification::Event { .. }
                if !inner.realtime.is_current(generation) =>
            {
                debug!(generation, "Dropping notification of a superseded session");
            }

            SocketNotification::Reconnecting { attempt, delay } => {
                debug!(attempt, delay_ms = delay.as_millis() as u64, "Realtime reconnecting");
                inner
                    .events
                    .emit(ClientEvent::Reconnecting { attempt, delay });
            }

            SocketNotification::Event { name, payload } => match InboundEvent::parse(&name, payload) {
                Ok(Some(event)) => apply_event(&inner, event),
                Ok(None) => debug!(event = %name, "Ignoring unknown realtime event"),
                Err(e) => warn!(event = %name, error = %e, "Dropping malformed realtime event"),
            },
        }
    }

    inner.realtime.finished(generation);
    if !inner.realtime.is_active() {
        inner.chat.set_connected(false);
    }
    info!(generation, "Realtime bridge stopped");
}

/// Rejoin the active channel and ask for presence. Runs on its own task so
/// the bridge keeps draining notifications while the emits are in flight.
fn on_connected(inner: Arc<ClientInner>) {
    tokio::spawn(async move {
        if let Some(channel) = inner.channels.current_channel_id() {
            if let Err(e) = inner.realtime.join_channel(channel).await {
                warn!(channel = %channel, error = %e, "Failed to rejoin channel");
            }
        }
        if let Err(e) = inner.realtime.request_online_users().await {
            debug!(error = %e, "Failed to request online users");
        }
    });
}

/// Apply one application event to the stores.
pub(crate) fn apply_event(inner: &ClientInner, event: InboundEvent) {
    match event {
        InboundEvent::NewMessage(message) => {
            inner
                .chat
                .clear_typing_for(message.channel_id, message.sender_id, &message.sender_name);
            inner.channels.add_message_to_channel(message);
        }

        InboundEvent::MessageDeleted(deleted) => {
            if !inner
                .channels
                .remove_message_from_channel(deleted.channel_id, deleted.message_id)
            {
                debug!(message = %deleted.message_id, "Deleted message was not loaded");
            }
        }

        InboundEvent::UserJoined(notice) => {
            let text = notice
                .message
                .clone()
                .unwrap_or_else(|| format!("{} joined", notice.name()));
            inner.chat.upsert_presence(PresenceEntry {
                user_id: notice.user_id,
                username: notice.username,
                display_name: notice.display_name,
                is_online: true,
                last_seen: Some(Utc::now()),
            });
            inner.chat.push_notice(text);
        }

        InboundEvent::UserLeft(notice) => {
            let text = notice
                .message
                .clone()
                .unwrap_or_else(|| format!("{} left", notice.name()));
            inner.chat.remove_presence(notice.user_id);
            inner.chat.push_notice(text);
        }

        InboundEvent::OnlineUsers(users) => inner.chat.replace_presence(users),

        InboundEvent::UserTyping(typing) => {
            let own = inner.session.user_id();
            if typing.user_id.is_some() && typing.user_id == own {
                return;
            }
            inner.chat.set_typing(
                typing.channel_id,
                typing.user_id,
                &typing.display_name,
                typing.is_typing,
            );
        }

        InboundEvent::Error(notice) => {
            let message = if notice.message.is_empty() {
                "Connection error".to_string()
            } else {
                notice.message
            };
            warn!(error = %message, "Server reported an error");
            inner.chat.set_error(message);
        }

        InboundEvent::Status(notice) => {
            if !notice.message.is_empty() {
                inner.chat.push_notice(notice.message);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ChatClient;
    use crate::config::ClientConfig;
    use parley_shared::{ChannelId, MessageId};
    use parley_store::MemoryTokenStore;

    fn client() -> ChatClient {
        let config = ClientConfig {
            api_base: url::Url::parse("http://127.0.0.1:9").unwrap(),
            ..Default::default()
        };
        ChatClient::new(config, Arc::new(MemoryTokenStore::new())).unwrap()
    }

    fn event(name: &str, payload: serde_json::Value) -> InboundEvent {
        InboundEvent::parse(name, payload).unwrap().unwrap()
    }

    fn new_message(id: i64, sender: &str) -> InboundEvent {
        event(
            "new_message",
            serde_json::json!({
                "id": id, "content": "hi", "sender_id": 2, "sender_name": sender,
                "channel_id": 1, "created_on": "2025-08-13T06:21:44"
            }),
        )
    }

    #[test]
    fn test_new_message_twice_is_stored_once() {
        let client = client();
        apply_event(client.inner(), new_message(5, "alice"));
        apply_event(client.inner(), new_message(5, "alice"));
        assert_eq!(client.channels().messages(ChannelId(1)).len(), 1);
    }

    #[test]
    fn test_message_deleted_removes_only_that_message() {
        let client = client();
        apply_event(client.inner(), new_message(5, "alice"));
        apply_event(client.inner(), new_message(6, "alice"));
        apply_event(
            client.inner(),
            event("message_deleted", serde_json::json!({ "message_id": 5, "channel_id": 1 })),
        );
        let ids: Vec<Option<MessageId>> = client
            .channels()
            .messages(ChannelId(1))
            .iter()
            .map(|e| e.message_id())
            .collect();
        assert_eq!(ids, vec![Some(MessageId(6))]);
    }

    #[test]
    fn test_typing_start_stop_and_send() {
        let client = client();
        let typing = |is_typing: bool| {
            event(
                "user_typing",
                serde_json::json!({
                    "user_id": 2, "display_name": "Alice",
                    "is_typing": is_typing, "channel_id": 1
                }),
            )
        };

        apply_event(client.inner(), typing(true));
        assert_eq!(client.chat().typing_names(Some(ChannelId(1))), vec!["Alice".to_string()]);
        apply_event(client.inner(), typing(false));
        assert!(client.chat().typing_names(Some(ChannelId(1))).is_empty());

        apply_event(client.inner(), typing(true));
        apply_event(client.inner(), new_message(7, "alice"));
        assert!(client.chat().typing_names(Some(ChannelId(1))).is_empty());
    }

    #[test]
    fn test_join_and_leave_produce_notices_and_presence() {
        let client = client();
        apply_event(
            client.inner(),
            event(
                "user_joined",
                serde_json::json!({ "user_id": 3, "username": "carol", "display_name": "Carol" }),
            ),
        );
        assert_eq!(client.chat().online_users().len(), 1);

        apply_event(
            client.inner(),
            event("user_left", serde_json::json!({ "user_id": 3, "username": "carol" })),
        );
        assert!(client.chat().online_users().is_empty());

        let texts: Vec<String> = client.chat().notices().into_iter().map(|n| n.text).collect();
        assert_eq!(texts, vec!["Carol joined".to_string(), "carol left".to_string()]);
    }

    #[test]
    fn test_online_users_replace_snapshot() {
        let client = client();
        apply_event(
            client.inner(),
            event(
                "online_users",
                serde_json::json!([
                    { "user_id": 1, "username": "a" },
                    { "user_id": 2, "username": "b" }
                ]),
            ),
        );
        apply_event(
            client.inner(),
            event("online_users", serde_json::json!([{ "user_id": 9, "username": "z" }])),
        );
        let online = client.chat().online_users();
        assert_eq!(online.len(), 1);
        assert_eq!(online[0].username, "z");
    }

    #[tokio::test]
    async fn test_superseded_session_cannot_end_live_one() {
        use base64::engine::general_purpose::URL_SAFE_NO_PAD;
        use base64::Engine;
        use parley_net::SocketNotification;
        use parley_shared::AccessToken;
        use tokio::sync::mpsc;

        let exp = Utc::now().timestamp() + 3600;
        let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"exp":{exp},"sub":"1"}}"#));
        let token = AccessToken::new(format!("eyJhbGciOiJIUzI1NiJ9.{payload}.sig"));
        let config = ClientConfig {
            api_base: url::Url::parse("http://127.0.0.1:9").unwrap(),
            ..Default::default()
        };
        let client =
            ChatClient::new(config, Arc::new(MemoryTokenStore::with_token(token.clone()))).unwrap();
        client.session().restore().unwrap();
        let inner = client.inner();

        let first = inner.realtime.connect(token.clone()).unwrap().unwrap();
        inner.realtime.disconnect();
        let second = inner.realtime.connect(token).unwrap().unwrap();
        assert!(inner.realtime.mark_connected(second.generation, true));
        inner.chat.set_connected(true);

        let (tx, notifications) = mpsc::channel(8);
        tx.send(SocketNotification::ConnectError {
            message: "Connection rejected by server".into(),
            auth_rejected: true,
        })
        .await
        .unwrap();
        tx.send(SocketNotification::Disconnected {
            reason: DisconnectReason::TransportLost("reset".into()),
        })
        .await
        .unwrap();
        drop(tx);

        notification_loop(
            Arc::clone(inner),
            SocketSession {
                generation: first.generation,
                notifications,
            },
        )
        .await;

        assert!(client.session().is_authenticated());
        assert!(inner.realtime.is_connected());
        assert!(client.chat().is_connected());
        assert!(client.chat().error().is_none());
    }

    #[test]
    fn test_error_event_fills_error_slot() {
        let client = client();
        apply_event(client.inner(), event("error", serde_json::json!("Room is full")));
        assert_eq!(client.chat().error().as_deref(), Some("Room is full"));
    }
}
