//! HTTP transport for the provider OAuth endpoints.

use std::time::Duration;

use async_trait::async_trait;
use log::debug;

use fleetmon_core::auth::{OAuthTransport, ProviderSettings, TokenResponse, TransportError};

use crate::error::Result;

/// Timeout for token endpoint calls.
const TOKEN_TIMEOUT_SECS: u64 = 30;

/// Form-posting transport against a provider's token and revocation
/// endpoints. The token service decides what each failure means; this layer
/// only reports what the wire did.
#[derive(Debug, Clone)]
pub struct OAuthHttpTransport {
    client: reqwest::Client,
}

impl OAuthHttpTransport {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(TOKEN_TIMEOUT_SECS))
            .build()
            .expect("Failed to build HTTP client");

        Self { client }
    }

    async fn post_form(
        &self,
        url: &str,
        params: &[(&str, &str)],
    ) -> Result<TokenResponse, TransportError> {
        let response = self
            .client
            .post(url)
            .form(params)
            .send()
            .await
            .map_err(|err| TransportError::new(format!("token endpoint unreachable: {}", err)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| TransportError::new(format!("token endpoint read failed: {}", err)))?;

        if !status.is_success() {
            return Err(TransportError::new(format!(
                "token endpoint returned {}: {}",
                status, body
            )));
        }

        serde_json::from_str(&body)
            .map_err(|err| TransportError::new(format!("token response did not parse: {}", err)))
    }
}

impl Default for OAuthHttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OAuthTransport for OAuthHttpTransport {
    async fn exchange_code(
        &self,
        settings: &ProviderSettings,
        code: &str,
        code_verifier: Option<&str>,
    ) -> Result<TokenResponse, TransportError> {
        let mut params = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", settings.redirect_uri.as_str()),
            ("client_id", settings.client_id.as_str()),
        ];
        if let Some(secret) = settings.client_secret.as_deref() {
            params.push(("client_secret", secret));
        }
        if let Some(verifier) = code_verifier {
            params.push(("code_verifier", verifier));
        }

        debug!(
            "[Connect] Exchanging authorization code with {}",
            settings.provider
        );
        self.post_form(&settings.token_url, &params).await
    }

    async fn refresh(
        &self,
        settings: &ProviderSettings,
        refresh_token: &str,
    ) -> Result<TokenResponse, TransportError> {
        let mut params = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", settings.client_id.as_str()),
        ];
        if let Some(secret) = settings.client_secret.as_deref() {
            params.push(("client_secret", secret));
        }

        debug!("[Connect] Refreshing token with {}", settings.provider);
        self.post_form(&settings.token_url, &params).await
    }

    async fn revoke(
        &self,
        settings: &ProviderSettings,
        token: &str,
    ) -> Result<(), TransportError> {
        let Some(revoke_url) = settings.revoke_url.as_deref() else {
            debug!(
                "[Connect] {} has no revocation endpoint, skipping",
                settings.provider
            );
            return Ok(());
        };

        let params = [("token", token), ("client_id", settings.client_id.as_str())];
        let response = self
            .client
            .post(revoke_url)
            .form(&params)
            .send()
            .await
            .map_err(|err| {
                TransportError::new(format!("revocation endpoint unreachable: {}", err))
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::new(format!(
                "revocation endpoint returned {}",
                status
            )));
        }
        Ok(())
    }
}
