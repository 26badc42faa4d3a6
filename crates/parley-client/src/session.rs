//! Session manager: login/logout, token persistence and the user identity.

use std::sync::{Arc, Mutex, MutexGuard};

use parley_shared::constants::GUEST_DISPLAY_NAME;
use parley_shared::models::{User, UserProfile};
use parley_shared::rest::{LoginRequest, ProfilePatch, RegisterRequest};
use parley_shared::{AccessToken, TokenError, UserId};
use parley_store::TokenStorage;

use crate::api::ApiClient;
use crate::error::{ClientError, Result};
use crate::events::{ClientEvent, EventBus};

/// Snapshot of the session as seen by the rest of the client.
#[derive(Debug, Clone, Default)]
pub struct Session {
    pub profile: Option<UserProfile>,
    pub token: Option<AccessToken>,
    pub is_authenticated: bool,
    pub is_loading: bool,
    pub last_error: Option<String>,
}

/// Outcome of restoring a persisted token at startup.
#[derive(Debug)]
pub enum RestoreOutcome {
    /// Nothing was stored.
    NoSession,
    Restored,
    /// A token was stored but cannot be used; it has been cleared.
    Rejected(TokenError),
}

/// Result of a username / email availability check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    Available,
    Taken,
    /// The check itself failed; callers decide whether to let the user continue.
    Unknown,
}

/// Signup form contents.
#[derive(Debug, Clone)]
pub struct Registration {
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password: String,
    /// Response token produced by the CAPTCHA widget, if one was shown.
    pub captcha_response: Option<String>,
}

pub struct SessionManager {
    api: ApiClient,
    storage: Arc<dyn TokenStorage>,
    events: EventBus,
    state: Mutex<Session>,
}

impl SessionManager {
    pub fn new(api: ApiClient, storage: Arc<dyn TokenStorage>, events: EventBus) -> Self {
        Self {
            api,
            storage,
            events,
            state: Mutex::new(Session::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Session> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn is_authenticated(&self) -> bool {
        self.lock().is_authenticated
    }

    pub fn token(&self) -> Option<AccessToken> {
        self.lock().token.clone()
    }

    pub fn profile(&self) -> Option<UserProfile> {
        self.lock().profile.clone()
    }

    pub fn user_id(&self) -> Option<UserId> {
        self.lock().profile.as_ref().and_then(|p| p.user_id)
    }

    pub fn display_name(&self) -> String {
        self.lock()
            .profile
            .as_ref()
            .map(UserProfile::display_name)
            .unwrap_or_else(|| GUEST_DISPLAY_NAME.to_string())
    }

    pub fn snapshot(&self) -> Session {
        self.lock().clone()
    }

    /// The session token if it is present and not expired.
    pub fn valid_token(&self) -> Option<AccessToken> {
        let token = self.token()?;
        match token.validate(chrono::Utc::now().timestamp()) {
            Ok(_) => Some(token),
            Err(e) => {
                tracing::warn!(error = %e, "Session token is no longer valid");
                None
            }
        }
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Load the persisted token and check its expiry. Makes no network calls.
    pub fn restore(&self) -> Result<RestoreOutcome> {
        let Some(token) = self.storage.load_token()? else {
            tracing::debug!("No stored session");
            return Ok(RestoreOutcome::NoSession);
        };

        match token.validate(chrono::Utc::now().timestamp()) {
            Ok(claims) => {
                tracing::info!(exp = ?claims.exp, "Session restored");
                self.api.set_token(Some(token.clone()));
                {
                    let mut state = self.lock();
                    state.token = Some(token);
                    state.is_authenticated = true;
                    state.last_error = None;
                }
                self.events
                    .emit(ClientEvent::SessionChanged { authenticated: true });
                Ok(RestoreOutcome::Restored)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Stored token rejected, clearing session");
                self.clear();
                Ok(RestoreOutcome::Rejected(e))
            }
        }
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<Option<UserProfile>> {
        self.begin();

        let response = match self.api.login(&LoginRequest::new(username, password)).await {
            Ok(response) => response,
            Err(e) => {
                self.fail(e.user_message());
                return Err(e.into());
            }
        };

        let Some(raw) = response.access_token.filter(|t| !t.is_empty()) else {
            let message = response
                .message
                .unwrap_or_else(|| "Login failed".to_string());
            self.fail(message.clone());
            return Err(ClientError::LoginFailed(message));
        };

        let token = AccessToken::new(raw);
        if let Err(e) = self.storage.save_token(&token) {
            tracing::warn!(error = %e, "Failed to persist session token");
        }
        self.api.set_token(Some(token.clone()));
        {
            let mut state = self.lock();
            state.token = Some(token);
            state.is_authenticated = true;
            state.is_loading = false;
        }
        tracing::info!(username, "Logged in");
        self.events
            .emit(ClientEvent::SessionChanged { authenticated: true });

        match self.refresh_identity().await {
            Ok(None) if !self.is_authenticated() => {
                let message = "Session rejected by server".to_string();
                self.fail(message.clone());
                Err(ClientError::LoginFailed(message))
            }
            Ok(profile) => Ok(profile),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to fetch profile after login");
                Ok(None)
            }
        }
    }

    /// Tell the server we are leaving, then drop all local session state.
    /// Local state is cleared whatever the server says.
    pub async fn logout(&self) {
        if self.token().is_some() {
            if let Err(e) = self.api.logout().await {
                tracing::warn!(error = %e, "Remote logout failed, clearing locally");
            }
        }
        self.clear();
    }

    /// Drop the session locally without contacting the server.
    pub fn clear(&self) {
        if let Err(e) = self.storage.clear_token() {
            tracing::warn!(error = %e, "Failed to clear stored token");
        }
        self.api.set_token(None);
        let was_authenticated = {
            let mut state = self.lock();
            let was = state.is_authenticated;
            *state = Session::default();
            was
        };
        if was_authenticated {
            tracing::info!("Session cleared");
        }
        self.events
            .emit(ClientEvent::SessionChanged { authenticated: false });
    }

    /// Fetch the current user's profile. A 401 ends the session and yields
    /// `Ok(None)`.
    pub async fn refresh_identity(&self) -> Result<Option<UserProfile>> {
        if self.token().is_none() {
            return Ok(None);
        }

        match self.api.me().await {
            Ok(profile) => {
                tracing::debug!(username = %profile.username, "Identity refreshed");
                self.lock().profile = Some(profile.clone());
                Ok(Some(profile))
            }
            Err(e) if e.is_unauthorized() => {
                tracing::warn!("Identity refresh unauthorized, clearing session");
                self.clear();
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    // -----------------------------------------------------------------------
    // Registration
    // -----------------------------------------------------------------------

    pub async fn register(&self, form: Registration) -> Result<Option<User>> {
        self.begin();
        let request = RegisterRequest {
            username: form.username,
            first_name: form.first_name,
            last_name: form.last_name,
            email: form.email,
            password: form.password,
            recaptcha_response: form.captcha_response,
        };

        match self.api.register(&request).await {
            Ok(response) if response.success => {
                self.lock().is_loading = false;
                tracing::info!(username = %request.username, "Registered");
                Ok(response.user)
            }
            Ok(response) => {
                let message = response
                    .message
                    .unwrap_or_else(|| "Registration failed".to_string());
                self.fail(message.clone());
                Err(ClientError::RegistrationFailed(message))
            }
            Err(e) => {
                self.fail(e.user_message());
                Err(e.into())
            }
        }
    }

    pub async fn check_username(&self, username: &str) -> Availability {
        availability(self.api.check_username(username).await, "username")
    }

    pub async fn check_email(&self, email: &str) -> Availability {
        availability(self.api.check_email(email).await, "email")
    }

    // -----------------------------------------------------------------------
    // Profile
    // -----------------------------------------------------------------------

    pub async fn update_profile(&self, patch: &ProfilePatch) -> Result<Option<UserProfile>> {
        if self.token().is_none() {
            return Err(ClientError::NotAuthenticated);
        }
        self.begin();
        match self.api.update_profile(patch).await {
            Ok(updated) => {
                let mut state = self.lock();
                state.is_loading = false;
                if let Some(profile) = updated {
                    state.profile = Some(profile);
                }
                Ok(state.profile.clone())
            }
            Err(e) => {
                self.fail(e.user_message());
                Err(e.into())
            }
        }
    }

    pub async fn set_online_status(&self, is_online: bool) -> Result<()> {
        if self.token().is_none() {
            return Err(ClientError::NotAuthenticated);
        }
        self.api.set_online_status(is_online).await?;
        if let Some(profile) = self.lock().profile.as_mut() {
            profile.is_online = is_online;
        }
        Ok(())
    }

    fn begin(&self) {
        let mut state = self.lock();
        state.is_loading = true;
        state.last_error = None;
    }

    fn fail(&self, message: String) {
        tracing::warn!(error = %message, "Session operation failed");
        let mut state = self.lock();
        state.is_loading = false;
        state.last_error = Some(message);
    }
}

fn availability(
    result: std::result::Result<parley_shared::rest::AvailabilityResponse, crate::error::ApiError>,
    what: &str,
) -> Availability {
    match result {
        Ok(response) => match response.available {
            Some(true) => Availability::Available,
            Some(false) => Availability::Taken,
            None => Availability::Unknown,
        },
        Err(e) => {
            tracing::warn!(what, error = %e, "Availability check failed");
            Availability::Unknown
        }
    }
}
