use thiserror::Error;

#[derive(Error, Debug)]
pub enum TokenError {
    #[error("Malformed token: {0}")]
    Malformed(String),

    #[error("Token payload is not valid base64url: {0}")]
    Encoding(#[from] base64::DecodeError),

    #[error("Token claims are not valid JSON: {0}")]
    Claims(#[from] serde_json::Error),

    #[error("Token has no expiry claim")]
    MissingExpiry,

    #[error("Token expired at {expired_at}")]
    Expired { expired_at: i64 },
}

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Invalid payload for event '{event}': {source}")]
    InvalidPayload {
        event: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid timestamp: {0}")]
    Timestamp(#[from] chrono::ParseError),
}
