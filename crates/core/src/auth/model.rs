//! OAuth domain types.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from the OAuth flows.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The state parameter is unknown, expired, or already consumed. The
    /// user has to restart authorization.
    #[error("authorization state is unknown or expired")]
    InvalidState,

    /// The provider rejected the code exchange
    #[error("token exchange failed: {0}")]
    TokenExchangeFailed(String),

    /// The provider rejected the refresh token. Terminal for that token.
    #[error("token refresh failed: {0}")]
    RefreshFailed(String),
}

/// Failure of one provider HTTP call, before the service decides which flow
/// error it becomes.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct TransportError {
    message: String,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// One persisted token, unique per (provider, user).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRecord {
    pub provider: String,
    pub user_id: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub token_type: String,
    pub expires_at: DateTime<Utc>,
    pub scope: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TokenRecord {
    /// Whether the token is still usable once the safety margin is applied.
    /// A token inside the margin is treated as already expired so a request
    /// started near the boundary cannot outlive it.
    pub fn is_fresh(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        self.expires_at - margin > now
    }
}

/// Wire shape of a provider token endpoint response, for both the code
/// exchange and refresh grants.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub token_type: Option<String>,
    pub expires_in: Option<i64>,
    pub scope: Option<String>,
}

/// Authorization redirect handed to the HTTP layer.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationRequest {
    pub url: String,
    pub state: String,
}

/// Static configuration for one OAuth provider.
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    /// Registry key, e.g. "device-platform" or "task-tracker".
    pub provider: String,
    pub client_id: String,
    pub client_secret: Option<String>,
    pub authorize_url: String,
    pub token_url: String,
    /// Revocation endpoint; not every provider has one.
    pub revoke_url: Option<String>,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    pub use_pkce: bool,
}

impl ProviderSettings {
    /// Read a provider block from `<PREFIX>_CLIENT_ID`-style environment
    /// variables.
    pub fn from_env(provider: &str, prefix: &str) -> crate::Result<Self> {
        let require = |suffix: &str| {
            let name = format!("{}_{}", prefix, suffix);
            crate::settings::env_var(&name)
                .ok_or_else(|| crate::Error::config(format!("{} is not set", name)))
        };
        Ok(Self {
            provider: provider.to_string(),
            client_id: require("CLIENT_ID")?,
            client_secret: crate::settings::env_var(&format!("{}_CLIENT_SECRET", prefix)),
            authorize_url: require("AUTHORIZE_URL")?,
            token_url: require("TOKEN_URL")?,
            revoke_url: crate::settings::env_var(&format!("{}_REVOKE_URL", prefix)),
            redirect_uri: require("REDIRECT_URI")?,
            scopes: crate::settings::env_var(&format!("{}_SCOPES", prefix))
                .map(|raw| raw.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default(),
            use_pkce: crate::settings::env_var(&format!("{}_USE_PKCE", prefix))
                .map(|raw| raw != "0" && !raw.eq_ignore_ascii_case("false"))
                .unwrap_or(true),
        })
    }
}
