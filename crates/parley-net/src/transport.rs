//! Engine.IO transports: WebSocket and HTTP long-polling.
//!
//! Both transports hand inbound packets to the connection task through an
//! mpsc channel fed by a dedicated reader task, so the connection loop only
//! ever awaits cancel-safe futures.

use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};
use url::Url;

use parley_shared::constants::{ENGINE_IO_VERSION, SOCKET_IO_PATH};
use parley_shared::{AccessToken, TransportKind};

use crate::error::NetError;
use crate::packet::{decode_payload, encode_payload, EnginePacket, OpenHandshake};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;
type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Inbound channel depth per transport.
const INBOUND_BUFFER: usize = 64;

/// Build the Engine.IO endpoint URL for `kind` from the API origin.
pub fn engine_url(base: &Url, kind: TransportKind, sid: Option<&str>) -> Result<Url, NetError> {
    let scheme = match (kind, base.scheme()) {
        (TransportKind::WebSocket, "https" | "wss") => "wss",
        (TransportKind::WebSocket, "http" | "ws") => "ws",
        (TransportKind::Polling, "https" | "wss") => "https",
        (TransportKind::Polling, "http" | "ws") => "http",
        (_, other) => return Err(NetError::InvalidUrl(format!("unsupported scheme '{other}'"))),
    };

    let mut url = base.clone();
    url.set_scheme(scheme)
        .map_err(|_| NetError::InvalidUrl(format!("cannot use scheme '{scheme}' for {base}")))?;
    url.set_path(SOCKET_IO_PATH);
    url.set_query(None);
    url.set_fragment(None);
    {
        let mut query = url.query_pairs_mut();
        query.append_pair("EIO", &ENGINE_IO_VERSION.to_string());
        query.append_pair("transport", kind.as_str());
        if let Some(sid) = sid {
            query.append_pair("sid", sid);
        }
    }
    Ok(url)
}

/// Parameters needed to open a transport.
#[derive(Debug, Clone)]
pub struct TransportParams<'a> {
    pub base_url: &'a Url,
    pub token: Option<&'a AccessToken>,
    pub timeout: Duration,
}

/// An open Engine.IO session over one transport.
pub struct TransportLink {
    kind: TransportKind,
    handshake: OpenHandshake,
    sink: PacketSink,
    inbound: mpsc::Receiver<Result<EnginePacket, NetError>>,
    reader: JoinHandle<()>,
}

enum PacketSink {
    WebSocket(WsSink),
    Polling {
        http: reqwest::Client,
        url: Url,
        token: Option<AccessToken>,
    },
}

impl TransportLink {
    pub async fn open(
        kind: TransportKind,
        params: &TransportParams<'_>,
        http: &reqwest::Client,
    ) -> Result<Self, NetError> {
        match kind {
            TransportKind::WebSocket => open_websocket(params).await,
            TransportKind::Polling => open_polling(params, http).await,
        }
    }

    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    pub fn handshake(&self) -> &OpenHandshake {
        &self.handshake
    }

    /// Next inbound packet. `None` once the transport is gone.
    pub async fn recv(&mut self) -> Option<Result<EnginePacket, NetError>> {
        self.inbound.recv().await
    }

    pub async fn send(&mut self, packet: EnginePacket) -> Result<(), NetError> {
        match &mut self.sink {
            PacketSink::WebSocket(sink) => {
                sink.send(WsMessage::Text(packet.encode())).await?;
            }
            PacketSink::Polling { http, url, token } => {
                let mut request = http
                    .post(url.clone())
                    .header(reqwest::header::CONTENT_TYPE, "text/plain;charset=UTF-8")
                    .body(encode_payload(std::slice::from_ref(&packet)));
                if let Some(token) = token {
                    request = request.header(reqwest::header::AUTHORIZATION, token.bearer());
                }
                let response = request.send().await?;
                if !response.status().is_success() {
                    return Err(NetError::HttpStatus {
                        status: response.status().as_u16(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Send an Engine.IO close and release the transport.
    pub async fn close(mut self) {
        if let Err(e) = self.send(EnginePacket::Close).await {
            debug!(error = %e, "close packet not delivered");
        }
        if let PacketSink::WebSocket(sink) = &mut self.sink {
            let _ = sink.close().await;
        }
    }
}

impl Drop for TransportLink {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

// ---------------------------------------------------------------------------
// WebSocket
// ---------------------------------------------------------------------------

async fn open_websocket(params: &TransportParams<'_>) -> Result<TransportLink, NetError> {
    let url = engine_url(params.base_url, TransportKind::WebSocket, None)?;
    let mut request = url.as_str().into_client_request()?;
    if let Some(token) = params.token {
        let value = HeaderValue::from_str(&token.bearer())
            .map_err(|e| NetError::Handshake(e.to_string()))?;
        request.headers_mut().insert(AUTHORIZATION, value);
    }

    debug!(url = %url, "opening websocket transport");
    let (stream, _response) = tokio::time::timeout(params.timeout, connect_async(request))
        .await
        .map_err(|_| NetError::Timeout("websocket handshake"))??;
    let (sink, mut read) = stream.split();

    let handshake = tokio::time::timeout(params.timeout, read_open_packet(&mut read))
        .await
        .map_err(|_| NetError::Timeout("engine.io open"))??;

    let (tx, inbound) = mpsc::channel(INBOUND_BUFFER);
    let reader = tokio::spawn(async move {
        while let Some(frame) = read.next().await {
            let item = match frame {
                Ok(WsMessage::Text(text)) => match EnginePacket::decode(&text) {
                    Ok(packet) => Ok(packet),
                    Err(e) => {
                        warn!(error = %e, "dropping undecodable engine.io frame");
                        continue;
                    }
                },
                Ok(WsMessage::Close(_)) => break,
                Ok(WsMessage::Binary(data)) => {
                    warn!(len = data.len(), "ignoring binary websocket frame");
                    continue;
                }
                Ok(_) => continue,
                Err(e) => Err(NetError::from(e)),
            };
            let fatal = item.is_err();
            if tx.send(item).await.is_err() || fatal {
                break;
            }
        }
        debug!("websocket reader finished");
    });

    Ok(TransportLink {
        kind: TransportKind::WebSocket,
        handshake,
        sink: PacketSink::WebSocket(sink),
        inbound,
        reader,
    })
}

async fn read_open_packet(read: &mut WsStream) -> Result<OpenHandshake, NetError> {
    loop {
        match read.next().await {
            Some(Ok(WsMessage::Text(text))) => {
                return match EnginePacket::decode(&text)? {
                    EnginePacket::Open(handshake) => Ok(handshake),
                    other => Err(NetError::Handshake(format!(
                        "expected open packet, got {other:?}"
                    ))),
                };
            }
            Some(Ok(WsMessage::Close(_))) | None => return Err(NetError::Closed),
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(NetError::from(e)),
        }
    }
}

// ---------------------------------------------------------------------------
// HTTP long-polling
// ---------------------------------------------------------------------------

async fn open_polling(
    params: &TransportParams<'_>,
    http: &reqwest::Client,
) -> Result<TransportLink, NetError> {
    let url = engine_url(params.base_url, TransportKind::Polling, None)?;
    debug!(url = %url, "opening polling transport");

    let token = params.token.cloned();
    let body = poll(http, &url, token.as_ref(), params.timeout).await?;
    let mut packets = decode_payload(&body)?.into_iter();
    let handshake = match packets.next() {
        Some(EnginePacket::Open(handshake)) => handshake,
        other => {
            return Err(NetError::Handshake(format!(
                "expected open packet, got {other:?}"
            )))
        }
    };
    let leftovers: Vec<EnginePacket> = packets.collect();

    let session_url = engine_url(params.base_url, TransportKind::Polling, Some(&handshake.sid))?;
    // A poll may legitimately stay open until the next server ping.
    let poll_timeout = Duration::from_millis(handshake.ping_interval + handshake.ping_timeout);

    let (tx, inbound) = mpsc::channel(INBOUND_BUFFER);
    let reader = tokio::spawn(poll_loop(
        http.clone(),
        session_url.clone(),
        token.clone(),
        poll_timeout,
        leftovers,
        tx,
    ));

    Ok(TransportLink {
        kind: TransportKind::Polling,
        handshake,
        sink: PacketSink::Polling {
            http: http.clone(),
            url: session_url,
            token,
        },
        inbound,
        reader,
    })
}

async fn poll_loop(
    http: reqwest::Client,
    url: Url,
    token: Option<AccessToken>,
    timeout: Duration,
    leftovers: Vec<EnginePacket>,
    tx: mpsc::Sender<Result<EnginePacket, NetError>>,
) {
    for packet in leftovers {
        if tx.send(Ok(packet)).await.is_err() {
            return;
        }
    }

    loop {
        let batch = match poll(&http, &url, token.as_ref(), timeout).await {
            Ok(body) => decode_payload(&body).map_err(NetError::from),
            Err(e) => Err(e),
        };
        match batch {
            Ok(packets) => {
                for packet in packets {
                    let closing = packet == EnginePacket::Close;
                    if tx.send(Ok(packet)).await.is_err() || closing {
                        return;
                    }
                }
            }
            Err(e) => {
                let _ = tx.send(Err(e)).await;
                return;
            }
        }
    }
}

async fn poll(
    http: &reqwest::Client,
    url: &Url,
    token: Option<&AccessToken>,
    timeout: Duration,
) -> Result<String, NetError> {
    let mut request = http.get(url.clone()).timeout(timeout);
    if let Some(token) = token {
        request = request.header(reqwest::header::AUTHORIZATION, token.bearer());
    }
    let response = request.send().await?;
    if !response.status().is_success() {
        return Err(NetError::HttpStatus {
            status: response.status().as_u16(),
        });
    }
    Ok(response.text().await?)
}
