//! Engine.IO v4 and Socket.IO v5 packet codec.
//!
//! Engine.IO frames the transport: every frame starts with a single digit
//! packet type. Socket.IO packets travel inside Engine.IO `message` frames.
//! Only the default namespace and text packets are supported.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Separator between packets of one HTTP long-polling payload.
pub const PAYLOAD_SEPARATOR: char = '\u{1e}';

#[derive(Error, Debug, PartialEq, Eq)]
pub enum PacketError {
    #[error("Empty packet")]
    Empty,

    #[error("Unknown {layer} packet type '{kind}'")]
    UnknownType { layer: &'static str, kind: char },

    #[error("Binary packets are not supported")]
    Binary,

    #[error("Namespace '{0}' is not supported")]
    Namespace(String),

    #[error("Invalid packet body: {0}")]
    Body(String),
}

// ---------------------------------------------------------------------------
// Engine.IO
// ---------------------------------------------------------------------------

/// Parameters announced by the server in the Engine.IO `open` packet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OpenHandshake {
    pub sid: String,
    #[serde(default)]
    pub upgrades: Vec<String>,
    /// Milliseconds between server pings.
    pub ping_interval: u64,
    /// Milliseconds the server waits for a pong.
    pub ping_timeout: u64,
    #[serde(default)]
    pub max_payload: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnginePacket {
    Open(OpenHandshake),
    Close,
    Ping(String),
    Pong(String),
    Message(String),
    Upgrade,
    Noop,
}

impl EnginePacket {
    pub fn encode(&self) -> String {
        match self {
            Self::Open(handshake) => {
                // Serialising a struct of strings and integers cannot fail.
                let body = serde_json::to_string(handshake).unwrap_or_default();
                format!("0{body}")
            }
            Self::Close => "1".to_string(),
            Self::Ping(data) => format!("2{data}"),
            Self::Pong(data) => format!("3{data}"),
            Self::Message(data) => format!("4{data}"),
            Self::Upgrade => "5".to_string(),
            Self::Noop => "6".to_string(),
        }
    }

    pub fn decode(frame: &str) -> Result<Self, PacketError> {
        let mut chars = frame.chars();
        let kind = chars.next().ok_or(PacketError::Empty)?;
        let body = chars.as_str();

        Ok(match kind {
            '0' => Self::Open(
                serde_json::from_str(body).map_err(|e| PacketError::Body(e.to_string()))?,
            ),
            '1' => Self::Close,
            '2' => Self::Ping(body.to_string()),
            '3' => Self::Pong(body.to_string()),
            '4' => Self::Message(body.to_string()),
            '5' => Self::Upgrade,
            '6' => Self::Noop,
            'b' => return Err(PacketError::Binary),
            other => {
                return Err(PacketError::UnknownType {
                    layer: "engine.io",
                    kind: other,
                })
            }
        })
    }
}

/// Join packets into one long-polling request body.
pub fn encode_payload(packets: &[EnginePacket]) -> String {
    packets
        .iter()
        .map(EnginePacket::encode)
        .collect::<Vec<_>>()
        .join(&PAYLOAD_SEPARATOR.to_string())
}

/// Split a long-polling response body into packets.
pub fn decode_payload(body: &str) -> Result<Vec<EnginePacket>, PacketError> {
    body.split(PAYLOAD_SEPARATOR)
        .filter(|frame| !frame.is_empty())
        .map(EnginePacket::decode)
        .collect()
}

// ---------------------------------------------------------------------------
// Socket.IO
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    /// Client: auth payload. Server: `{"sid": ...}` acknowledgement.
    Connect(Option<Value>),
    Disconnect,
    Event {
        name: String,
        args: Vec<Value>,
        ack_id: Option<u64>,
    },
    Ack {
        id: u64,
        args: Vec<Value>,
    },
    ConnectError(Value),
}

impl SocketPacket {
    /// Event with a single optional argument, the only shape the chat
    /// protocol uses.
    pub fn event(name: impl Into<String>, payload: Option<Value>) -> Self {
        Self::Event {
            name: name.into(),
            args: payload.into_iter().collect(),
            ack_id: None,
        }
    }

    pub fn encode(&self) -> String {
        match self {
            Self::Connect(None) => "0".to_string(),
            Self::Connect(Some(auth)) => format!("0{auth}"),
            Self::Disconnect => "1".to_string(),
            Self::Event { name, args, ack_id } => {
                let mut array = Vec::with_capacity(args.len() + 1);
                array.push(Value::String(name.clone()));
                array.extend(args.iter().cloned());
                let id = ack_id.map(|id| id.to_string()).unwrap_or_default();
                format!("2{id}{}", Value::Array(array))
            }
            Self::Ack { id, args } => format!("3{id}{}", Value::Array(args.clone())),
            Self::ConnectError(data) => format!("4{data}"),
        }
    }

    pub fn decode(data: &str) -> Result<Self, PacketError> {
        let mut chars = data.chars();
        let kind = chars.next().ok_or(PacketError::Empty)?;
        let mut rest = chars.as_str();

        if kind == '5' || kind == '6' {
            return Err(PacketError::Binary);
        }

        if rest.starts_with('/') {
            let (namespace, tail) = match rest.split_once(',') {
                Some((ns, tail)) => (ns, tail),
                None => (rest, ""),
            };
            if namespace != "/" {
                return Err(PacketError::Namespace(namespace.to_string()));
            }
            rest = tail;
        }

        let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
        let (id, body) = rest.split_at(digits);
        let ack_id = if id.is_empty() {
            None
        } else {
            Some(id.parse::<u64>().map_err(|e| PacketError::Body(e.to_string()))?)
        };

        let json = |body: &str| -> Result<Option<Value>, PacketError> {
            if body.is_empty() {
                return Ok(None);
            }
            serde_json::from_str(body)
                .map(Some)
                .map_err(|e| PacketError::Body(e.to_string()))
        };

        match kind {
            '0' => Ok(Self::Connect(json(body)?)),
            '1' => Ok(Self::Disconnect),
            '2' => {
                let mut args = match json(body)? {
                    Some(Value::Array(items)) => items,
                    _ => return Err(PacketError::Body("event must be a JSON array".into())),
                };
                if args.is_empty() {
                    return Err(PacketError::Body("event without a name".into()));
                }
                let name = match args.remove(0) {
                    Value::String(name) => name,
                    _ => return Err(PacketError::Body("event name must be a string".into())),
                };
                Ok(Self::Event { name, args, ack_id })
            }
            '3' => {
                let id = ack_id.ok_or_else(|| PacketError::Body("ack without id".into()))?;
                let args = match json(body)? {
                    Some(Value::Array(items)) => items,
                    _ => Vec::new(),
                };
                Ok(Self::Ack { id, args })
            }
            '4' => Ok(Self::ConnectError(json(body)?.unwrap_or(Value::Null))),
            other => Err(PacketError::UnknownType {
                layer: "socket.io",
                kind: other,
            }),
        }
    }
}

/// Human-readable reason carried by a `CONNECT_ERROR` payload.
pub fn connect_error_message(data: &Value) -> String {
    match data {
        Value::String(s) => s.clone(),
        Value::Object(map) => map
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("Connection rejected by server")
            .to_string(),
        _ => "Connection rejected by server".to_string(),
    }
}
