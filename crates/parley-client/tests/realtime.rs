//! Real-time behaviour of the client against a mock Socket.IO server.

mod common;

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::Message;
use url::Url;

use parley_client::{ChatClient, ClientEvent, RestoreOutcome};
use parley_shared::{ChannelId, TransportKind};
use parley_store::{MemoryTokenStore, TokenStorage};

use common::{config, message_json, token, wait_for};

const OPEN: &str =
    r#"0{"sid":"eio-1","upgrades":[],"pingInterval":25000,"pingTimeout":20000,"maxPayload":1000000}"#;

/// Script-driven mock: `push` sends frames to the client, `seen` yields the
/// Socket.IO frames the client sent after the handshake.
struct MockServer {
    push: mpsc::UnboundedSender<String>,
    seen: mpsc::UnboundedReceiver<String>,
}

impl MockServer {
    fn event(&self, name: &str, payload: Value) {
        self.push
            .send(format!("42{}", json!([name, payload])))
            .unwrap();
    }

    /// Wait for the next client event called `name`; returns its payload.
    async fn expect_event(&mut self, name: &str) -> Value {
        let deadline = Duration::from_secs(5);
        loop {
            let frame = tokio::time::timeout(deadline, self.seen.recv())
                .await
                .expect("no frame from client")
                .expect("mock server stopped");
            let Some(body) = frame.strip_prefix("42") else {
                continue;
            };
            let array: Vec<Value> = serde_json::from_str(body).unwrap();
            if array[0] == name {
                return array.get(1).cloned().unwrap_or(Value::Null);
            }
        }
    }
}

async fn listen() -> (TcpListener, Url) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, Url::parse(&format!("http://{addr}")).unwrap())
}

fn serve(listener: TcpListener) -> MockServer {
    let (push, mut push_rx) = mpsc::unbounded_channel::<String>();
    let (seen_tx, seen) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        ws.send(Message::Text(OPEN.to_string())).await.unwrap();
        loop {
            tokio::select! {
                frame = push_rx.recv() => match frame {
                    Some(frame) => ws.send(Message::Text(frame)).await.unwrap(),
                    None => break,
                },
                msg = ws.next() => match msg {
                    Some(Ok(Message::Text(text))) if text.starts_with("40") => {
                        ws.send(Message::Text(r#"40{"sid":"sio-1"}"#.to_string())).await.unwrap();
                    }
                    Some(Ok(Message::Text(text))) => {
                        let _ = seen_tx.send(text);
                    }
                    Some(Ok(_)) => {}
                    _ => break,
                },
            }
        }
    });

    MockServer { push, seen }
}

fn client(url: Url, storage: Arc<MemoryTokenStore>) -> ChatClient {
    let mut config = config(url);
    config.transports = vec![TransportKind::WebSocket];
    config.reconnect_attempts = 1;
    ChatClient::new(config, storage).unwrap()
}

fn restored(url: Url) -> (ChatClient, Arc<MemoryTokenStore>) {
    let storage = Arc::new(MemoryTokenStore::with_token(token(3600, "1")));
    let client = client(url, storage.clone());
    assert!(matches!(
        client.session().restore().unwrap(),
        RestoreOutcome::Restored
    ));
    (client, storage)
}

async fn wait_event(rx: &mut broadcast::Receiver<ClientEvent>, want: impl Fn(&ClientEvent) -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match rx.recv().await {
                Ok(event) if want(&event) => return,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => panic!("event bus closed"),
            }
        }
    })
    .await
    .expect("event not observed");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_connect_requests_presence_and_applies_snapshot() {
    let (listener, url) = listen().await;
    let mut server = serve(listener);
    let (client, _storage) = restored(url);

    assert!(client.connect().unwrap());
    wait_for(|| client.chat().is_connected()).await;
    assert!(client.realtime().is_connected());

    server.expect_event("get_online_users").await;
    server.event(
        "online_users",
        json!([{ "user_id": 2, "username": "bob" }, { "user_id": 3, "username": "carol" }]),
    );
    wait_for(|| client.chat().online_users().len() == 2).await;

    client.dispose();
}

#[tokio::test]
async fn test_duplicate_new_message_is_stored_once() {
    let (listener, url) = listen().await;
    let server = serve(listener);
    let (client, _storage) = restored(url);
    let mut rx = client.subscribe();

    client.connect().unwrap();
    wait_for(|| client.chat().is_connected()).await;

    server.event("new_message", message_json(7, 1, "hi"));
    server.event("new_message", message_json(7, 1, "hi"));
    server.event("status", json!({ "message": "marker" }));

    wait_for(|| !client.chat().notices().is_empty()).await;
    assert_eq!(client.channels().messages(ChannelId(1)).len(), 1);
    wait_event(&mut rx, |e| matches!(e, ClientEvent::MessageAdded { .. })).await;

    client.dispose();
}

#[tokio::test]
async fn test_typing_indicator_follows_server_events() {
    let (listener, url) = listen().await;
    let server = serve(listener);
    let (client, _storage) = restored(url);

    client.connect().unwrap();
    wait_for(|| client.chat().is_connected()).await;

    let typing = |is_typing: bool| {
        json!({ "user_id": 2, "display_name": "Bob", "is_typing": is_typing, "channel_id": 1 })
    };

    server.event("user_typing", typing(true));
    wait_for(|| client.chat().typing_names(Some(ChannelId(1))) == vec!["Bob".to_string()]).await;

    server.event("user_typing", typing(false));
    wait_for(|| client.chat().typing_names(Some(ChannelId(1))).is_empty()).await;

    client.dispose();
}

#[tokio::test]
async fn test_outbound_events_reach_server() {
    let (listener, url) = listen().await;
    let mut server = serve(listener);
    let (client, _storage) = restored(url);

    client.connect().unwrap();
    wait_for(|| client.chat().is_connected()).await;

    client.join_room("general").await.unwrap();
    assert_eq!(server.expect_event("join_room").await["room"], "general");

    client.emit_message("hello", Some(ChannelId(1))).await.unwrap();
    let sent = server.expect_event("send_message").await;
    assert_eq!(sent["content"], "hello");
    assert_eq!(sent["channel_id"], 1);

    client.dispose();
}

#[tokio::test]
async fn test_rejected_connection_ends_session() {
    let (listener, url) = listen().await;
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        ws.send(Message::Text(OPEN.to_string())).await.unwrap();
        while let Some(Ok(msg)) = ws.next().await {
            if let Message::Text(text) = msg {
                if text.starts_with("40") {
                    let reject = r#"44{"message":"Connection rejected by server"}"#;
                    ws.send(Message::Text(reject.to_string())).await.unwrap();
                }
            }
        }
    });

    let (client, storage) = restored(url);
    let mut rx = client.subscribe();
    client.connect().unwrap();

    wait_event(&mut rx, |e| matches!(e, ClientEvent::AuthRequired)).await;
    assert!(!client.session().is_authenticated());
    assert_eq!(storage.load_token().unwrap(), None);
    assert!(!client.chat().is_connected());
}

#[tokio::test]
async fn test_late_rejection_of_abandoned_connection_keeps_session() {
    let (listener, url) = listen().await;
    tokio::spawn(async move {
        let mut accepted = 0;
        loop {
            let (stream, _) = listener.accept().await.unwrap();
            accepted += 1;
            let first = accepted == 1;
            tokio::spawn(async move {
                let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
                    return;
                };
                let _ = ws.send(Message::Text(OPEN.to_string())).await;
                while let Some(Ok(msg)) = ws.next().await {
                    let Message::Text(text) = msg else { continue };
                    if !text.starts_with("40") {
                        continue;
                    }
                    if first {
                        tokio::time::sleep(Duration::from_millis(400)).await;
                        let reject = r#"44{"message":"Connection rejected by server"}"#;
                        let _ = ws.send(Message::Text(reject.to_string())).await;
                    } else {
                        let _ = ws.send(Message::Text(r#"40{"sid":"sio-2"}"#.to_string())).await;
                    }
                }
            });
        }
    });

    let (client, storage) = restored(url);
    client.connect().unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    client.disconnect();
    client.connect().unwrap();

    wait_for(|| client.chat().is_connected()).await;
    tokio::time::sleep(Duration::from_millis(600)).await;

    assert!(client.session().is_authenticated());
    assert!(storage.load_token().unwrap().is_some());
    assert!(client.chat().is_connected());
    assert!(client.realtime().is_connected());

    client.dispose();
}
