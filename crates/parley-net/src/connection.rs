//! The Socket.IO connection task.
//!
//! The connection runs in a dedicated tokio task. Callers talk to it through
//! a typed command channel and receive typed notifications back, mirroring
//! how the rest of the client is wired. The task owns the transport, answers
//! server pings, and reconnects with backoff after transport loss.

use std::time::Duration;

use rand::Rng;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, error, info, warn};
use url::Url;

use parley_shared::{AccessToken, TransportKind};

use crate::error::NetError;
use crate::packet::{connect_error_message, EnginePacket, SocketPacket};
use crate::transport::{TransportLink, TransportParams};

const CHANNEL_CAPACITY: usize = 256;

// ---------------------------------------------------------------------------
// Command / notification types
// ---------------------------------------------------------------------------

/// Commands sent *into* the connection task.
#[derive(Debug)]
pub enum SocketCommand {
    /// Emit an event. The reply reports whether it was handed to the
    /// transport; nothing is queued while the connection is down.
    Emit {
        event: String,
        payload: Option<Value>,
        reply: oneshot::Sender<Result<(), NetError>>,
    },
    /// Disconnect and stop the task. No reconnection follows.
    Shutdown,
}

/// Notifications sent *from* the connection task.
#[derive(Debug, Clone, PartialEq)]
pub enum SocketNotification {
    Connected {
        sid: Option<String>,
        transport: TransportKind,
    },
    Disconnected {
        reason: DisconnectReason,
    },
    ConnectError {
        message: String,
        /// The server refused the credentials; the task has stopped.
        auth_rejected: bool,
    },
    Event {
        name: String,
        payload: Value,
    },
    Reconnecting {
        attempt: u32,
        delay: Duration,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// `Shutdown` command or dropped command channel.
    ClientRequested,
    /// The server sent a Socket.IO disconnect; no reconnection follows.
    ServerRequested,
    /// Transport failure or heartbeat timeout.
    TransportLost(String),
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Exponential backoff between reconnection attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub factor: u32,
    pub max_delay: Duration,
    /// Relative jitter applied to each delay, e.g. `0.2` for ±20%.
    pub jitter: f64,
    /// `0` retries forever.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            factor: 2,
            max_delay: Duration::from_secs(10),
            jitter: 0.2,
            max_attempts: 0,
        }
    }
}

impl ReconnectPolicy {
    /// Whether attempt number `attempt` (1-based) may be made.
    pub fn allows(&self, attempt: u32) -> bool {
        self.max_attempts == 0 || attempt <= self.max_attempts
    }

    /// Delay before attempt number `attempt` (1-based).
    pub fn delay(&self, attempt: u32, rng: &mut impl Rng) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let multiplier = self.factor.max(1).saturating_pow(exponent);
        let raw = self
            .base_delay
            .checked_mul(multiplier)
            .unwrap_or(self.max_delay)
            .min(self.max_delay);

        if self.jitter <= 0.0 {
            return raw;
        }
        let spread = rng.gen_range(-self.jitter..=self.jitter);
        raw.mul_f64((1.0 + spread).max(0.0))
    }
}

/// Everything the connection task needs.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// HTTP origin of the backend; the Socket.IO path is appended.
    pub base_url: Url,
    pub token: Option<AccessToken>,
    /// Transports in the order they are tried.
    pub transports: Vec<TransportKind>,
    pub reconnect: ReconnectPolicy,
    pub connect_timeout: Duration,
}

impl ConnectionConfig {
    pub fn new(base_url: Url, token: Option<AccessToken>) -> Self {
        Self {
            base_url,
            token,
            transports: vec![TransportKind::WebSocket, TransportKind::Polling],
            reconnect: ReconnectPolicy::default(),
            connect_timeout: Duration::from_secs(10),
        }
    }

    /// Socket.IO `CONNECT` auth payload.
    fn auth_payload(&self) -> Option<Value> {
        self.token
            .as_ref()
            .map(|token| serde_json::json!({ "token": token.as_str() }))
    }
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// Spawn the connection task.
///
/// Returns `(command_tx, notification_rx)`. The task ends after a
/// `Shutdown`, a server-side disconnect, a credential rejection or when the
/// reconnection budget is spent; the notification channel closes then.
pub fn spawn_connection(
    config: ConnectionConfig,
    http: reqwest::Client,
) -> (mpsc::Sender<SocketCommand>, mpsc::Receiver<SocketNotification>) {
    let (cmd_tx, cmd_rx) = mpsc::channel::<SocketCommand>(CHANNEL_CAPACITY);
    let (notif_tx, notif_rx) = mpsc::channel::<SocketNotification>(CHANNEL_CAPACITY);

    tokio::spawn(async move {
        run(config, http, cmd_rx, notif_tx).await;
        info!("Socket connection task terminated");
    });

    (cmd_tx, notif_rx)
}

enum SessionEnd {
    Shutdown,
    ServerDisconnect,
    TransportLost(String),
}

async fn run(
    config: ConnectionConfig,
    http: reqwest::Client,
    mut cmd_rx: mpsc::Receiver<SocketCommand>,
    notif_tx: mpsc::Sender<SocketNotification>,
) {
    let mut attempt: u32 = 0;

    loop {
        let established = tokio::select! {
            result = establish(&config, &http) => result,
            _ = refuse_until_shutdown(&mut cmd_rx) => {
                info!("Socket shutdown requested during handshake");
                let _ = notif_tx
                    .send(SocketNotification::Disconnected {
                        reason: DisconnectReason::ClientRequested,
                    })
                    .await;
                return;
            }
        };

        match established {
            Ok((link, sid)) => {
                attempt = 0;
                let transport = link.kind();
                info!(transport = %transport, sid = ?sid, "Socket connected");
                let _ = notif_tx
                    .send(SocketNotification::Connected { sid, transport })
                    .await;

                match run_session(link, &mut cmd_rx, &notif_tx).await {
                    SessionEnd::Shutdown => {
                        let _ = notif_tx
                            .send(SocketNotification::Disconnected {
                                reason: DisconnectReason::ClientRequested,
                            })
                            .await;
                        return;
                    }
                    SessionEnd::ServerDisconnect => {
                        info!("Server closed the socket session");
                        let _ = notif_tx
                            .send(SocketNotification::Disconnected {
                                reason: DisconnectReason::ServerRequested,
                            })
                            .await;
                        return;
                    }
                    SessionEnd::TransportLost(reason) => {
                        warn!(reason = %reason, "Socket transport lost");
                        let _ = notif_tx
                            .send(SocketNotification::Disconnected {
                                reason: DisconnectReason::TransportLost(reason),
                            })
                            .await;
                    }
                }
            }
            Err(e) => {
                let auth_rejected = e.is_auth_rejection();
                let message = match &e {
                    NetError::Rejected(message) => message.clone(),
                    other => other.to_string(),
                };
                error!(error = %e, auth_rejected, "Socket connect failed");
                let _ = notif_tx
                    .send(SocketNotification::ConnectError {
                        message,
                        auth_rejected,
                    })
                    .await;
                // A refused handshake is final, whatever the reason.
                if auth_rejected || matches!(e, NetError::Rejected(_)) {
                    return;
                }
            }
        }

        attempt += 1;
        if !config.reconnect.allows(attempt) {
            warn!(attempts = attempt - 1, "Giving up on reconnection");
            return;
        }
        let delay = config.reconnect.delay(attempt, &mut rand::thread_rng());
        info!(attempt, delay_ms = delay.as_millis() as u64, "Reconnecting");
        let _ = notif_tx
            .send(SocketNotification::Reconnecting { attempt, delay })
            .await;

        if wait_for_retry(delay, &mut cmd_rx).await {
            let _ = notif_tx
                .send(SocketNotification::Disconnected {
                    reason: DisconnectReason::ClientRequested,
                })
                .await;
            return;
        }
    }
}

/// Sleep for `delay` while refusing emits. Returns `true` if a shutdown was
/// requested meanwhile.
async fn wait_for_retry(delay: Duration, cmd_rx: &mut mpsc::Receiver<SocketCommand>) -> bool {
    tokio::select! {
        _ = sleep(delay) => false,
        _ = refuse_until_shutdown(cmd_rx) => true,
    }
}

/// Answer emits with `NotConnected` until a shutdown arrives or every
/// sender is gone.
async fn refuse_until_shutdown(cmd_rx: &mut mpsc::Receiver<SocketCommand>) {
    loop {
        match cmd_rx.recv().await {
            Some(SocketCommand::Emit { event, reply, .. }) => {
                debug!(event = %event, "emit refused while not connected");
                let _ = reply.send(Err(NetError::NotConnected));
            }
            Some(SocketCommand::Shutdown) | None => return,
        }
    }
}

/// Open the first transport that works and complete the Socket.IO handshake.
async fn establish(
    config: &ConnectionConfig,
    http: &reqwest::Client,
) -> Result<(TransportLink, Option<String>), NetError> {
    let params = TransportParams {
        base_url: &config.base_url,
        token: config.token.as_ref(),
        timeout: config.connect_timeout,
    };

    let mut last_error = NetError::Handshake("no transport configured".into());
    for &kind in &config.transports {
        let mut link = match TransportLink::open(kind, &params, http).await {
            Ok(link) => link,
            Err(e) if e.is_auth_rejection() => return Err(e),
            Err(e) => {
                warn!(transport = %kind, error = %e, "Transport unavailable");
                last_error = e;
                continue;
            }
        };

        match socket_connect(config, &mut link).await {
            Ok(sid) => return Ok((link, sid)),
            Err(e) if e.is_auth_rejection() || matches!(e, NetError::Rejected(_)) => {
                return Err(e)
            }
            Err(e) => {
                warn!(transport = %kind, error = %e, "Socket.IO handshake failed");
                link.close().await;
                last_error = e;
            }
        }
    }
    Err(last_error)
}

/// Send CONNECT on an open transport and wait for the ack.
async fn socket_connect(
    config: &ConnectionConfig,
    link: &mut TransportLink,
) -> Result<Option<String>, NetError> {
    let connect = SocketPacket::Connect(config.auth_payload());
    link.send(EnginePacket::Message(connect.encode())).await?;

    tokio::time::timeout(config.connect_timeout, await_connect_ack(link))
        .await
        .map_err(|_| NetError::Timeout("socket.io connect"))?
}

async fn await_connect_ack(link: &mut TransportLink) -> Result<Option<String>, NetError> {
    loop {
        let packet = match link.recv().await {
            Some(packet) => packet?,
            None => return Err(NetError::Closed),
        };
        match packet {
            EnginePacket::Ping(data) => link.send(EnginePacket::Pong(data)).await?,
            EnginePacket::Message(data) => match SocketPacket::decode(&data)? {
                SocketPacket::Connect(ack) => {
                    let sid = ack
                        .as_ref()
                        .and_then(|v| v.get("sid"))
                        .and_then(Value::as_str)
                        .map(str::to_string);
                    return Ok(sid);
                }
                SocketPacket::ConnectError(data) => {
                    return Err(NetError::Rejected(connect_error_message(&data)))
                }
                other => debug!(packet = ?other, "ignoring packet before connect ack"),
            },
            EnginePacket::Close => return Err(NetError::Closed),
            _ => {}
        }
    }
}

async fn run_session(
    mut link: TransportLink,
    cmd_rx: &mut mpsc::Receiver<SocketCommand>,
    notif_tx: &mpsc::Sender<SocketNotification>,
) -> SessionEnd {
    let handshake = link.handshake().clone();
    let heartbeat = Duration::from_millis(handshake.ping_interval + handshake.ping_timeout);
    let mut deadline = Instant::now() + heartbeat;

    loop {
        tokio::select! {
            // --- Outgoing commands ---
            cmd = cmd_rx.recv() => match cmd {
                Some(SocketCommand::Emit { event, payload, reply }) => {
                    let packet = SocketPacket::event(event.as_str(), payload);
                    match link.send(EnginePacket::Message(packet.encode())).await {
                        Ok(()) => {
                            debug!(event = %event, "emitted");
                            let _ = reply.send(Ok(()));
                        }
                        Err(e) => {
                            let reason = e.to_string();
                            let _ = reply.send(Err(e));
                            return SessionEnd::TransportLost(reason);
                        }
                    }
                }
                Some(SocketCommand::Shutdown) | None => {
                    info!("Socket shutdown requested");
                    let _ = link
                        .send(EnginePacket::Message(SocketPacket::Disconnect.encode()))
                        .await;
                    link.close().await;
                    return SessionEnd::Shutdown;
                }
            },

            // --- Inbound packets ---
            inbound = link.recv() => match inbound {
                Some(Ok(EnginePacket::Ping(data))) => {
                    deadline = Instant::now() + heartbeat;
                    if let Err(e) = link.send(EnginePacket::Pong(data)).await {
                        return SessionEnd::TransportLost(e.to_string());
                    }
                }
                Some(Ok(EnginePacket::Message(data))) => match SocketPacket::decode(&data) {
                    Ok(SocketPacket::Event { name, mut args, .. }) => {
                        let payload = if args.is_empty() { Value::Null } else { args.swap_remove(0) };
                        debug!(event = %name, "event received");
                        let _ = notif_tx.send(SocketNotification::Event { name, payload }).await;
                    }
                    Ok(SocketPacket::Disconnect) => return SessionEnd::ServerDisconnect,
                    Ok(other) => debug!(packet = ?other, "ignoring socket.io packet"),
                    Err(e) => warn!(error = %e, "dropping undecodable socket.io packet"),
                },
                Some(Ok(EnginePacket::Close)) => {
                    return SessionEnd::TransportLost("server closed the transport".into())
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return SessionEnd::TransportLost(e.to_string()),
                None => return SessionEnd::TransportLost("transport closed".into()),
            },

            _ = sleep_until(deadline) => {
                return SessionEnd::TransportLost("ping timeout".into());
            }
        }
    }
}
