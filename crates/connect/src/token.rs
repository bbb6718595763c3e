//! Access token plumbing between the token store and the API clients.

use std::sync::Arc;

use async_trait::async_trait;

use fleetmon_core::auth::TokenService;

use crate::error::{ConnectError, Result};

/// Supplies the bearer token for each outgoing call.
#[async_trait]
pub trait AccessTokenProvider: Send + Sync {
    async fn access_token(&self) -> Result<String>;
}

/// Fixed token, for tests and personal-access-token deployments.
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl AccessTokenProvider for StaticTokenProvider {
    async fn access_token(&self) -> Result<String> {
        Ok(self.token.clone())
    }
}

/// Pulls the current token for one user from the token store, which
/// refreshes it when it is near expiry.
pub struct StoredTokenProvider {
    service: Arc<TokenService>,
    user_id: String,
}

impl StoredTokenProvider {
    pub fn new(service: Arc<TokenService>, user_id: impl Into<String>) -> Self {
        Self {
            service,
            user_id: user_id.into(),
        }
    }
}

#[async_trait]
impl AccessTokenProvider for StoredTokenProvider {
    async fn access_token(&self) -> Result<String> {
        let record = self
            .service
            .get_valid_token(&self.user_id)
            .await
            .map_err(|err| ConnectError::auth(err.to_string()))?;
        match record {
            Some(record) => Ok(record.access_token),
            None => Err(ConnectError::auth(
                "no valid token on file; authorization flow must be restarted",
            )),
        }
    }
}
