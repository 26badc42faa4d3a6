//! Client configuration loaded from environment variables.
//!
//! Every setting has a default suitable for a local development backend, so
//! the client starts with zero configuration.

use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use parley_net::{ConnectionConfig, ReconnectPolicy};
use parley_shared::constants::DEFAULT_API_BASE;
use parley_shared::{AccessToken, TransportKind};

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Origin of the REST API and the Socket.IO endpoint.
    /// Env: `PARLEY_API_BASE`, falling back to `API_BASE`
    /// Default: `http://localhost:8080`
    pub api_base: Url,

    /// Public CAPTCHA site key handed to whatever renders the signup form.
    /// Env: `RECAPTCHA_SITE_KEY`
    pub recaptcha_site_key: Option<String>,

    /// Real-time transports in the order they are tried.
    /// Env: `PARLEY_TRANSPORTS` (comma separated, e.g. `websocket,polling`)
    pub transports: Vec<TransportKind>,

    /// Reconnection attempts after a transport loss (0 = unlimited).
    /// Env: `PARLEY_RECONNECT_ATTEMPTS`
    pub reconnect_attempts: u32,

    /// Timeout applied to every REST request and to socket handshakes.
    /// Env: `PARLEY_REQUEST_TIMEOUT_SECS`
    /// Default: 30 s
    pub request_timeout: Duration,

    /// Directory of the client database.
    /// Env: `PARLEY_DATA_DIR`
    /// Default: the platform data directory.
    pub data_dir: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            recaptcha_site_key: None,
            transports: vec![TransportKind::WebSocket, TransportKind::Polling],
            reconnect_attempts: 0,
            request_timeout: Duration::from_secs(30),
            data_dir: None,
        }
    }
}

fn default_api_base() -> Url {
    // The constant is a valid absolute URL.
    Url::parse(DEFAULT_API_BASE).unwrap_or_else(|_| unreachable!("DEFAULT_API_BASE is valid"))
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an explicit variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(base) = lookup("PARLEY_API_BASE").or_else(|| lookup("API_BASE")) {
            match Url::parse(base.trim()) {
                Ok(url) if matches!(url.scheme(), "http" | "https") => config.api_base = url,
                _ => {
                    tracing::warn!(value = %base, "Invalid PARLEY_API_BASE, using default");
                }
            }
        }

        if let Some(key) = lookup("RECAPTCHA_SITE_KEY") {
            let key = key.trim();
            if !key.is_empty() {
                config.recaptcha_site_key = Some(key.to_string());
            }
        }

        if let Some(raw) = lookup("PARLEY_TRANSPORTS") {
            let parsed: Result<Vec<TransportKind>, String> = raw
                .split(',')
                .filter(|s| !s.trim().is_empty())
                .map(str::parse)
                .collect();
            match parsed {
                Ok(list) if !list.is_empty() => config.transports = dedup(list),
                Ok(_) => {
                    tracing::warn!("Empty PARLEY_TRANSPORTS, using default");
                }
                Err(e) => {
                    tracing::warn!(value = %raw, error = %e, "Invalid PARLEY_TRANSPORTS, using default");
                }
            }
        }

        if let Some(raw) = lookup("PARLEY_RECONNECT_ATTEMPTS") {
            match raw.trim().parse::<u32>() {
                Ok(n) => config.reconnect_attempts = n,
                Err(_) => {
                    tracing::warn!(value = %raw, "Invalid PARLEY_RECONNECT_ATTEMPTS, using default");
                }
            }
        }

        if let Some(raw) = lookup("PARLEY_REQUEST_TIMEOUT_SECS") {
            match raw.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => config.request_timeout = Duration::from_secs(secs),
                _ => {
                    tracing::warn!(value = %raw, "Invalid PARLEY_REQUEST_TIMEOUT_SECS, using default");
                }
            }
        }

        if let Some(dir) = lookup("PARLEY_DATA_DIR") {
            if !dir.trim().is_empty() {
                config.data_dir = Some(PathBuf::from(dir));
            }
        }

        config
    }

    /// Settings for the socket connection task.
    pub fn connection(&self, token: AccessToken) -> ConnectionConfig {
        let mut connection = ConnectionConfig::new(self.api_base.clone(), Some(token));
        connection.transports = self.transports.clone();
        connection.connect_timeout = self.request_timeout;
        connection.reconnect = ReconnectPolicy {
            max_attempts: self.reconnect_attempts,
            ..ReconnectPolicy::default()
        };
        connection
    }
}

fn dedup(list: Vec<TransportKind>) -> Vec<TransportKind> {
    let mut out = Vec::with_capacity(list.len());
    for kind in list {
        if !out.contains(&kind) {
            out.push(kind);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ClientConfig::from_lookup(lookup(&[]));
        assert_eq!(config.api_base.as_str(), "http://localhost:8080/");
        assert_eq!(
            config.transports,
            vec![TransportKind::WebSocket, TransportKind::Polling]
        );
        assert_eq!(config.reconnect_attempts, 0);
        assert!(config.data_dir.is_none());
    }

    #[test]
    fn test_api_base_fallback_and_precedence() {
        let legacy = ClientConfig::from_lookup(lookup(&[("API_BASE", "https://chat.example.com")]));
        assert_eq!(legacy.api_base.host_str(), Some("chat.example.com"));

        let both = ClientConfig::from_lookup(lookup(&[
            ("API_BASE", "https://old.example.com"),
            ("PARLEY_API_BASE", "https://new.example.com"),
        ]));
        assert_eq!(both.api_base.host_str(), Some("new.example.com"));
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let config = ClientConfig::from_lookup(lookup(&[
            ("PARLEY_API_BASE", "not a url"),
            ("PARLEY_TRANSPORTS", "carrier-pigeon"),
            ("PARLEY_RECONNECT_ATTEMPTS", "-1"),
            ("PARLEY_REQUEST_TIMEOUT_SECS", "0"),
        ]));
        assert_eq!(config.api_base.as_str(), "http://localhost:8080/");
        assert_eq!(config.transports.len(), 2);
        assert_eq!(config.reconnect_attempts, 0);
        assert_eq!(config.request_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_transport_order_is_respected() {
        let config = ClientConfig::from_lookup(lookup(&[(
            "PARLEY_TRANSPORTS",
            "polling, websocket, polling",
        )]));
        assert_eq!(
            config.transports,
            vec![TransportKind::Polling, TransportKind::WebSocket]
        );
    }

    #[test]
    fn test_connection_settings() {
        let config = ClientConfig {
            reconnect_attempts: 5,
            ..Default::default()
        };
        let connection = config.connection(AccessToken::new("a.b.c"));
        assert_eq!(connection.reconnect.max_attempts, 5);
        assert_eq!(connection.transports, config.transports);
    }
}
