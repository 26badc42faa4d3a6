use thiserror::Error;

use parley_shared::rest::ErrorBody;
use parley_shared::{ChannelId, LocalId, TokenError};

/// Failure of a single REST call.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid endpoint '{path}': {source}")]
    Url {
        path: String,
        #[source]
        source: url::ParseError,
    },

    #[error("Unauthorized: {message}")]
    Unauthorized { message: String },

    #[error("Forbidden: {message}")]
    Forbidden { message: String },

    #[error("Not found: {message}")]
    NotFound { message: String },

    #[error("Request rejected ({status}): {message}")]
    Validation { status: u16, message: String },

    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("Unexpected response from {endpoint}: {source}")]
    Decode {
        endpoint: String,
        #[source]
        source: serde_json::Error,
    },
}

impl ApiError {
    /// Map a non-success status and its raw body to an error, pulling the
    /// server's message out of the JSON body when there is one.
    pub fn from_status(status: u16, body: &str) -> Self {
        let message = serde_json::from_str::<ErrorBody>(body)
            .ok()
            .and_then(ErrorBody::into_message)
            .unwrap_or_else(|| default_message(status).to_string());

        match status {
            401 => Self::Unauthorized { message },
            403 => Self::Forbidden { message },
            404 => Self::NotFound { message },
            400..=499 => Self::Validation { status, message },
            _ => Self::Server { status, message },
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Unauthorized { .. } => Some(401),
            Self::Forbidden { .. } => Some(403),
            Self::NotFound { .. } => Some(404),
            Self::Validation { status, .. } | Self::Server { status, .. } => Some(*status),
            Self::Network(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(401)
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    /// Short text suitable for showing to the user.
    pub fn user_message(&self) -> String {
        match self {
            Self::Network(_) => "Unable to reach the server".to_string(),
            Self::Url { .. } | Self::Decode { .. } => "Unexpected server response".to_string(),
            Self::Unauthorized { message }
            | Self::Forbidden { message }
            | Self::NotFound { message }
            | Self::Validation { message, .. }
            | Self::Server { message, .. } => message.clone(),
        }
    }
}

fn default_message(status: u16) -> &'static str {
    match status {
        400 => "Invalid request",
        401 => "Authentication required",
        403 => "Permission denied",
        404 => "Not found",
        409 => "Conflict",
        422 => "Validation failed",
        429 => "Too many requests",
        400..=499 => "Request rejected",
        _ => "Server error",
    }
}

#[derive(Error, Debug)]
pub enum ClientError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("Realtime error: {0}")]
    Net(#[from] parley_net::NetError),

    #[error("Storage error: {0}")]
    Store(#[from] parley_store::StoreError),

    #[error("Invalid session token: {0}")]
    Token(#[from] TokenError),

    #[error("Login failed: {0}")]
    LoginFailed(String),

    #[error("Registration failed: {0}")]
    RegistrationFailed(String),

    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Not connected")]
    NotConnected,

    #[error("Realtime client has been disposed")]
    Disposed,

    #[error("Message is empty")]
    EmptyMessage,

    #[error("No active channel")]
    NoActiveChannel,

    #[error("Unknown channel: {0}")]
    UnknownChannel(ChannelId),

    #[error("Unknown pending message: {0}")]
    UnknownMessage(LocalId),

    #[error("Message is still being sent: {0}")]
    MessageInFlight(LocalId),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ClientError {
    /// Short text suitable for showing to the user.
    pub fn user_message(&self) -> String {
        match self {
            Self::Api(e) => e.user_message(),
            Self::Net(parley_net::NetError::NotConnected) | Self::NotConnected => {
                "Not connected".to_string()
            }
            Self::Net(_) => "Connection problem".to_string(),
            Self::Token(_) => "Your session has expired".to_string(),
            other => other.to_string(),
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Api(e) if e.is_unauthorized())
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert!(matches!(ApiError::from_status(401, ""), ApiError::Unauthorized { .. }));
        assert!(matches!(ApiError::from_status(403, ""), ApiError::Forbidden { .. }));
        assert!(matches!(ApiError::from_status(404, ""), ApiError::NotFound { .. }));
        assert!(matches!(
            ApiError::from_status(422, ""),
            ApiError::Validation { status: 422, .. }
        ));
        assert!(matches!(
            ApiError::from_status(503, ""),
            ApiError::Server { status: 503, .. }
        ));
    }

    #[test]
    fn test_server_message_is_extracted() {
        let err = ApiError::from_status(400, r#"{"msg":"Channel name taken"}"#);
        assert_eq!(err.user_message(), "Channel name taken");

        let err = ApiError::from_status(500, "<html>oops</html>");
        assert_eq!(err.user_message(), "Server error");
    }

    #[test]
    fn test_status_accessors() {
        let err = ApiError::from_status(401, r#"{"message":"Token expired"}"#);
        assert!(err.is_unauthorized());
        assert!(!err.is_not_found());
        assert_eq!(err.status(), Some(401));
        assert!(ClientError::from(err).is_unauthorized());
    }
}
