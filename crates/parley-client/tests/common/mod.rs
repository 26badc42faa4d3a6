//! In-process mock of the chat REST backend.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU16, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Notify};
use url::Url;

use parley_client::ClientConfig;
use parley_shared::AccessToken;

/// Unsigned JWT-shaped token expiring `exp_offset` seconds from now.
pub fn token(exp_offset: i64, subject: &str) -> AccessToken {
    let exp = chrono::Utc::now().timestamp() + exp_offset;
    let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"exp":{exp},"sub":"{subject}"}}"#));
    AccessToken::new(format!("eyJhbGciOiJIUzI1NiJ9.{payload}.c2ln"))
}

pub fn message_json(id: i64, channel: i64, content: &str) -> Value {
    json!({
        "id": id,
        "content": content,
        "sender_id": 2,
        "sender_name": "bob",
        "channel_id": channel,
        "created_on": format!("2025-08-13T06:{:02}:00", id % 60),
    })
}

fn channel_json(id: i64, name: &str, is_private: bool) -> Value {
    json!({
        "id": id,
        "name": name,
        "is_private": is_private,
        "creator_id": 1,
        "created_on": "2025-01-01T00:00:00"
    })
}

pub struct Backend {
    /// Token handed out by the login endpoint and accepted by `/me`.
    pub issued: AccessToken,
    pub logout_status: AtomicU16,
    pub logout_calls: Mutex<u32>,
    /// `/me` answers 401 even for the issued token.
    pub reject_profile: AtomicBool,
    pub hold_sends: AtomicBool,
    pub fail_sends: AtomicBool,
    pub send_gate: Notify,
    /// Id given to the next successfully sent message.
    pub next_message_id: AtomicI64,
    pub hold_recent: AtomicBool,
    pub recent_gate: Notify,
    pub recent_calls: AtomicU32,
    /// Messages appended to channel 1's recent list.
    pub recent_extra: Mutex<Vec<Value>>,
    pub hold_history: AtomicBool,
    pub history_gate: Notify,
    pub hold_members: AtomicBool,
    pub members_gate: Notify,
    pub members_calls: AtomicU32,
    pub sent: Mutex<Vec<Value>>,
    pub deleted: Mutex<Vec<i64>>,
    pub created: Mutex<Vec<Value>>,
    pub updated: Mutex<Vec<(i64, Value)>>,
    pub history_queries: Mutex<Vec<HashMap<String, String>>>,
    pub hold_channels: AtomicBool,
    pub channels_gate: Notify,
    pub channels_calls: AtomicU32,
    /// Engine.IO polling endpoint: packets queued for the client and the
    /// Socket.IO frames it posted.
    socket_outbox: mpsc::UnboundedSender<String>,
    socket_inbox: tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>,
    pub socket_frames: Mutex<Vec<String>>,
}

impl Backend {
    fn new() -> Self {
        let (socket_outbox, socket_inbox) = mpsc::unbounded_channel();
        Self {
            issued: token(3600, "1"),
            logout_status: AtomicU16::new(200),
            logout_calls: Mutex::new(0),
            reject_profile: AtomicBool::new(false),
            hold_sends: AtomicBool::new(false),
            fail_sends: AtomicBool::new(false),
            send_gate: Notify::new(),
            next_message_id: AtomicI64::new(200),
            hold_recent: AtomicBool::new(false),
            recent_gate: Notify::new(),
            recent_calls: AtomicU32::new(0),
            recent_extra: Mutex::new(Vec::new()),
            hold_history: AtomicBool::new(false),
            history_gate: Notify::new(),
            hold_members: AtomicBool::new(false),
            members_gate: Notify::new(),
            members_calls: AtomicU32::new(0),
            sent: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
            created: Mutex::new(Vec::new()),
            updated: Mutex::new(Vec::new()),
            history_queries: Mutex::new(Vec::new()),
            hold_channels: AtomicBool::new(false),
            channels_gate: Notify::new(),
            channels_calls: AtomicU32::new(0),
            socket_outbox,
            socket_inbox: tokio::sync::Mutex::new(socket_inbox),
            socket_frames: Mutex::new(Vec::new()),
        }
    }

    /// Payloads of the Socket.IO events called `name` the client emitted.
    pub fn socket_events(&self, name: &str) -> Vec<Value> {
        self.socket_frames
            .lock()
            .unwrap()
            .iter()
            .filter_map(|frame| frame.strip_prefix("42"))
            .filter_map(|body| serde_json::from_str::<Vec<Value>>(body).ok())
            .filter(|array| array.first().is_some_and(|n| n == name))
            .map(|array| array.get(1).cloned().unwrap_or(Value::Null))
            .collect()
    }

    fn authorized(&self, headers: &HeaderMap) -> bool {
        headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v == self.issued.bearer())
    }
}

type Shared = Arc<Backend>;
type Reply = (StatusCode, Json<Value>);

fn unauthorized() -> Reply {
    (StatusCode::UNAUTHORIZED, Json(json!({ "message": "Token expired" })))
}

async fn login(State(backend): State<Shared>, Json(body): Json<Value>) -> Reply {
    if body["provider"] != "db" {
        return (StatusCode::BAD_REQUEST, Json(json!({ "message": "provider required" })));
    }
    if body["password"] == "secret" {
        (
            StatusCode::OK,
            Json(json!({ "access_token": backend.issued.as_str(), "refresh_token": "r" })),
        )
    } else {
        (StatusCode::UNAUTHORIZED, Json(json!({ "message": "Invalid credentials" })))
    }
}

async fn logout(State(backend): State<Shared>) -> Reply {
    *backend.logout_calls.lock().unwrap() += 1;
    let status = StatusCode::from_u16(backend.logout_status.load(Ordering::SeqCst)).unwrap();
    (status, Json(json!({})))
}

async fn me(State(backend): State<Shared>, headers: HeaderMap) -> Reply {
    if !backend.authorized(&headers) || backend.reject_profile.load(Ordering::SeqCst) {
        return unauthorized();
    }
    (
        StatusCode::OK,
        Json(json!({ "result": { "id": 1, "user_id": 1, "username": "alice", "display_name": "Alice" } })),
    )
}

async fn public_channels(State(backend): State<Shared>) -> Json<Value> {
    backend.channels_calls.fetch_add(1, Ordering::SeqCst);
    if backend.hold_channels.load(Ordering::SeqCst) {
        backend.channels_gate.notified().await;
    }
    Json(json!({ "result": [channel_json(1, "general", false)], "count": 1 }))
}

async fn my_channels() -> Json<Value> {
    Json(json!({
        "result": [channel_json(1, "general", false), channel_json(2, "secret", true)],
        "count": 2
    }))
}

async fn create_channel(State(backend): State<Shared>, Json(body): Json<Value>) -> Reply {
    backend.created.lock().unwrap().push(body.clone());
    let name = body["name"].as_str().unwrap_or_default().to_string();
    (
        StatusCode::OK,
        Json(json!({ "result": channel_json(3, &name, false), "message": "created" })),
    )
}

async fn update_channel(
    State(backend): State<Shared>,
    Path(id): Path<i64>,
    Json(body): Json<Value>,
) -> Reply {
    backend.updated.lock().unwrap().push((id, body));
    (StatusCode::OK, Json(json!({ "message": "updated" })))
}

async fn members(State(backend): State<Shared>, Path(id): Path<i64>) -> Json<Value> {
    backend.members_calls.fetch_add(1, Ordering::SeqCst);
    if backend.hold_members.load(Ordering::SeqCst) {
        backend.members_gate.notified().await;
    }
    Json(json!({ "result": [
        { "id": 1, "channel_id": id, "user_id": 1, "username": "alice", "role": "owner" },
        { "id": 2, "channel_id": id, "user_id": 2, "username": "bob", "role": "member" }
    ] }))
}

async fn recent(
    State(backend): State<Shared>,
    Path(_limit): Path<u32>,
    Query(query): Query<HashMap<String, String>>,
) -> Json<Value> {
    // The list is fixed when the request arrives, before any hold.
    let mut result = vec![message_json(100, 1, "first"), message_json(101, 1, "second")];
    result.extend(backend.recent_extra.lock().unwrap().iter().cloned());
    backend.recent_calls.fetch_add(1, Ordering::SeqCst);
    if backend.hold_recent.load(Ordering::SeqCst) {
        backend.recent_gate.notified().await;
    }
    let channel: i64 = query
        .get("channel_id")
        .and_then(|c| c.parse().ok())
        .unwrap_or_default();
    if channel == 1 {
        Json(json!({ "result": result }))
    } else {
        Json(json!({ "result": [] }))
    }
}

async fn history(State(backend): State<Shared>, Query(query): Query<HashMap<String, String>>) -> Reply {
    backend.history_queries.lock().unwrap().push(query.clone());
    if backend.hold_history.load(Ordering::SeqCst) {
        backend.history_gate.notified().await;
    }
    if query.get("channel_id").map(String::as_str) == Some("2") {
        return (StatusCode::NOT_FOUND, Json(json!({ "message": "No history" })));
    }
    (
        StatusCode::OK,
        Json(json!({
            "result": [
                message_json(99, 1, "c"),
                message_json(97, 1, "a"),
                message_json(100, 1, "first"),
                message_json(98, 1, "b")
            ],
            "pagination": { "per_page": 20, "has_next": true, "next_before_id": 97 }
        })),
    )
}

async fn send(State(backend): State<Shared>, Json(body): Json<Value>) -> Reply {
    backend.sent.lock().unwrap().push(body.clone());
    if backend.hold_sends.load(Ordering::SeqCst) {
        backend.send_gate.notified().await;
    }
    if backend.fail_sends.load(Ordering::SeqCst) {
        return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": "Database unavailable" })));
    }
    let id = backend.next_message_id.fetch_add(1, Ordering::SeqCst);
    let mut message = message_json(id, body["channel_id"].as_i64().unwrap_or(1), "");
    message["content"] = body["content"].clone();
    message["sender_id"] = json!(1);
    message["sender_name"] = json!("alice");
    message["client_id"] = body["client_id"].clone();
    (StatusCode::OK, Json(json!({ "data": message, "message": "sent" })))
}

async fn delete(State(backend): State<Shared>, Path(id): Path<i64>) -> Reply {
    backend.deleted.lock().unwrap().push(id);
    (StatusCode::OK, Json(json!({ "message": "deleted" })))
}

async fn online_users() -> Json<Value> {
    Json(json!({ "result": [
        { "user_id": 1, "username": "alice", "display_name": "Alice" },
        { "user_id": 2, "username": "bob" }
    ] }))
}

async fn socket_poll(State(backend): State<Shared>, Query(query): Query<HashMap<String, String>>) -> String {
    if !query.contains_key("sid") {
        return r#"0{"sid":"eio-1","upgrades":[],"pingInterval":25000,"pingTimeout":20000,"maxPayload":1000000}"#
            .to_string();
    }
    let mut inbox = backend.socket_inbox.lock().await;
    match tokio::time::timeout(Duration::from_secs(2), inbox.recv()).await {
        Ok(Some(packet)) => packet,
        _ => "6".to_string(),
    }
}

async fn socket_post(State(backend): State<Shared>, body: String) -> &'static str {
    for packet in body.split('\u{1e}') {
        if packet.starts_with("40") {
            let _ = backend.socket_outbox.send(r#"40{"sid":"sio-1"}"#.to_string());
        }
        backend.socket_frames.lock().unwrap().push(packet.to_string());
    }
    "ok"
}

/// Start the mock backend; returns its state and base URL.
pub async fn spawn_backend() -> (Shared, Url) {
    let backend = Arc::new(Backend::new());
    let app = Router::new()
        .route("/api/v1/auth/login", post(login))
        .route("/api/auth/logout", post(logout))
        .route("/api/v1/userprofileapi/me", get(me))
        .route("/api/v1/userprofileapi/online-users", get(online_users))
        .route("/api/v1/chatchannelapi/public-channels", get(public_channels))
        .route("/api/v1/chatchannelapi/my-channels", get(my_channels))
        .route("/api/v1/chatchannelapi/create-channel", post(create_channel))
        .route("/api/v1/chatchannelapi/:id", put(update_channel))
        .route("/api/v1/channelmemberapi/channel/:id/members", get(members))
        .route("/api/v1/chatmessageapi/recent/:limit", get(recent))
        .route("/api/v1/chatmessageapi/history", get(history))
        .route("/api/v1/chatmessageapi/send", post(send))
        .route("/api/v1/chatmessageapi/delete/:id", post(delete))
        .route("/socket.io/", get(socket_poll).post(socket_post))
        .with_state(Arc::clone(&backend));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (backend, Url::parse(&format!("http://{addr}")).unwrap())
}

pub fn config(api_base: Url) -> ClientConfig {
    ClientConfig {
        api_base,
        request_timeout: Duration::from_secs(5),
        ..Default::default()
    }
}

/// Poll `cond` until it holds or five seconds pass.
pub async fn wait_for(mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(tokio::time::Instant::now() < deadline, "condition not met in time");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
