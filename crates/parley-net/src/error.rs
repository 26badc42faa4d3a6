use thiserror::Error;
use tokio_tungstenite::tungstenite;

use crate::packet::PacketError;

#[derive(Error, Debug)]
pub enum NetError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Server answered with HTTP {status}")]
    HttpStatus { status: u16 },

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Packet error: {0}")]
    Packet(#[from] PacketError),

    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// The server refused the Socket.IO connection (`CONNECT_ERROR`).
    #[error("Connection rejected: {0}")]
    Rejected(String),

    #[error("Timed out during {0}")]
    Timeout(&'static str),

    #[error("Transport closed")]
    Closed,

    #[error("Not connected")]
    NotConnected,
}

impl NetError {
    /// Whether the failure means the credentials were refused, in which case
    /// retrying with the same token is pointless.
    pub fn is_auth_rejection(&self) -> bool {
        match self {
            Self::Rejected(message) => looks_like_auth_failure(message),
            Self::HttpStatus { status } => matches!(status, 401 | 403),
            Self::WebSocket(tungstenite::Error::Http(response)) => {
                matches!(response.status().as_u16(), 401 | 403)
            }
            Self::Http(e) => e
                .status()
                .map(|s| matches!(s.as_u16(), 401 | 403))
                .unwrap_or(false),
            _ => false,
        }
    }
}

/// The server only rejects a connection from its connect handler, which
/// checks the token, but it does not tag the reason; match on the wording.
pub(crate) fn looks_like_auth_failure(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    ["rejected", "unauthor", "auth", "token", "jwt", "expired", "forbidden"]
        .iter()
        .any(|needle| lower.contains(needle))
}
