//! Bearer token handling.
//!
//! Only the claims are inspected; the signature is the server's business.

use std::fmt;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::TokenError;

/// Opaque bearer token issued by the login endpoint.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `Bearer <token>` header value.
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.0)
    }

    /// Decode the JWT payload segment.
    pub fn claims(&self) -> Result<TokenClaims, TokenError> {
        let mut parts = self.0.split('.');
        let payload = match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(_), Some(payload), Some(_), None) if !payload.is_empty() => payload,
            _ => {
                return Err(TokenError::Malformed(
                    "expected three dot-separated segments".into(),
                ))
            }
        };

        let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('='))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Check that the token carries an expiry later than `now` (unix seconds).
    pub fn validate(&self, now: i64) -> Result<TokenClaims, TokenError> {
        let claims = self.claims()?;
        match claims.exp {
            None => Err(TokenError::MissingExpiry),
            Some(exp) if exp <= now => Err(TokenError::Expired { expired_at: exp }),
            Some(_) => Ok(claims),
        }
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never print the credential itself.
        f.debug_tuple("AccessToken").field(&"<redacted>").finish()
    }
}

/// Registered claims the client cares about.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TokenClaims {
    #[serde(default)]
    pub exp: Option<i64>,
    #[serde(default)]
    pub iat: Option<i64>,
    /// Subject; the backend uses both numeric and string ids here.
    #[serde(default)]
    pub sub: Option<serde_json::Value>,
}
