//! Persistence and transport seams for the token service.

use async_trait::async_trait;

use super::model::{ProviderSettings, TokenRecord, TokenResponse, TransportError};
use crate::Result;

/// Token persistence, one row per (provider, user).
#[async_trait]
pub trait TokenRepository: Send + Sync {
    async fn get(&self, provider: &str, user_id: &str) -> Result<Option<TokenRecord>>;

    /// Insert or update in place; the (provider, user) pair never gains a
    /// second row.
    async fn upsert(&self, record: TokenRecord) -> Result<TokenRecord>;

    /// Returns the number of rows removed.
    async fn delete(&self, provider: &str, user_id: &str) -> Result<u64>;
}

/// HTTP calls against the provider's OAuth endpoints.
#[async_trait]
pub trait OAuthTransport: Send + Sync {
    async fn exchange_code(
        &self,
        settings: &ProviderSettings,
        code: &str,
        code_verifier: Option<&str>,
    ) -> std::result::Result<TokenResponse, TransportError>;

    async fn refresh(
        &self,
        settings: &ProviderSettings,
        refresh_token: &str,
    ) -> std::result::Result<TokenResponse, TransportError>;

    /// Best-effort revocation; callers log failures and carry on.
    async fn revoke(
        &self,
        settings: &ProviderSettings,
        token: &str,
    ) -> std::result::Result<(), TransportError>;
}
