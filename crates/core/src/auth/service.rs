//! Token lifecycle: authorization URL issuance, code exchange, and refresh.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use log::{debug, info, warn};
use rand::RngCore;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::model::{AuthError, AuthorizationRequest, ProviderSettings, TokenRecord, TokenResponse};
use super::repository::{OAuthTransport, TokenRepository};
use crate::locks::AdvisoryLockService;
use crate::{Error, Result};

/// Tokens are treated as expired this long before their actual expiry.
pub const EXPIRY_SAFETY_MARGIN_SECS: i64 = 300;

/// Lifetime of a pending authorization (CSRF state + PKCE verifier).
pub const PENDING_STATE_TTL_SECS: i64 = 600;

/// Cadence of the expired-state sweep.
const STATE_SWEEP_INTERVAL_SECS: u64 = 60;

/// Fallback token lifetime when the provider omits `expires_in`.
const DEFAULT_TOKEN_TTL_SECS: i64 = 55 * 60;

/// How long a caller waits on the per-user refresh lock before yielding.
const REFRESH_LOCK_ATTEMPTS: u32 = 10;
const REFRESH_LOCK_RETRY_DELAY_MS: u64 = 200;

struct PendingAuthorization {
    user_id: String,
    code_verifier: Option<String>,
    created_at: DateTime<Utc>,
}

/// Token store for one OAuth provider.
pub struct TokenService {
    settings: ProviderSettings,
    repository: Arc<dyn TokenRepository>,
    transport: Arc<dyn OAuthTransport>,
    locks: Arc<AdvisoryLockService>,
    pending: Arc<Mutex<HashMap<String, PendingAuthorization>>>,
    sweep_task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService")
            .field("provider", &self.settings.provider)
            .finish_non_exhaustive()
    }
}

impl TokenService {
    pub fn new(
        settings: ProviderSettings,
        repository: Arc<dyn TokenRepository>,
        transport: Arc<dyn OAuthTransport>,
        locks: Arc<AdvisoryLockService>,
    ) -> Self {
        Self {
            settings,
            repository,
            transport,
            locks,
            pending: Arc::new(Mutex::new(HashMap::new())),
            sweep_task: Mutex::new(None),
        }
    }

    /// Provider key this service manages tokens for.
    pub fn provider(&self) -> &str {
        &self.settings.provider
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Authorization flow
    // ─────────────────────────────────────────────────────────────────────────

    /// Build the provider authorization URL for `user_id`.
    ///
    /// Generates a fresh CSRF state (and, when enabled, a PKCE verifier with
    /// its S256 challenge) and parks both until the callback arrives or the
    /// TTL runs out.
    pub async fn get_authorization_url(&self, user_id: &str) -> AuthorizationRequest {
        let state = Uuid::new_v4().to_string();
        let code_verifier = self.settings.use_pkce.then(generate_code_verifier);

        let mut url = format!(
            "{}?response_type=code&client_id={}&redirect_uri={}&state={}",
            self.settings.authorize_url,
            urlencoding::encode(&self.settings.client_id),
            urlencoding::encode(&self.settings.redirect_uri),
            state,
        );
        if !self.settings.scopes.is_empty() {
            url.push_str(&format!(
                "&scope={}",
                urlencoding::encode(&self.settings.scopes.join(" "))
            ));
        }
        if let Some(verifier) = &code_verifier {
            url.push_str(&format!(
                "&code_challenge={}&code_challenge_method=S256",
                code_challenge(verifier)
            ));
        }

        self.pending.lock().await.insert(
            state.clone(),
            PendingAuthorization {
                user_id: user_id.to_string(),
                code_verifier,
                created_at: Utc::now(),
            },
        );
        debug!(
            "[TokenStore] Issued authorization state for {}:{}",
            self.settings.provider, user_id
        );
        AuthorizationRequest { url, state }
    }

    /// Exchange an authorization code for a token and persist it.
    ///
    /// The pending entry is consumed before the network call, so a replayed
    /// (code, state) pair fails with `InvalidState` no matter how the first
    /// attempt ended.
    pub async fn exchange_code_for_token(&self, code: &str, state: &str) -> Result<TokenRecord> {
        let entry = self.pending.lock().await.remove(state);
        let Some(entry) = entry else {
            warn!(
                "[TokenStore] Rejected code exchange for {}: unknown or reused state",
                self.settings.provider
            );
            return Err(AuthError::InvalidState.into());
        };
        if Utc::now() - entry.created_at > ChronoDuration::seconds(PENDING_STATE_TTL_SECS) {
            warn!(
                "[TokenStore] Rejected code exchange for {}:{}: state expired",
                self.settings.provider, entry.user_id
            );
            return Err(AuthError::InvalidState.into());
        }

        let response = self
            .transport
            .exchange_code(&self.settings, code, entry.code_verifier.as_deref())
            .await
            .map_err(|err| {
                warn!(
                    "[TokenStore] Code exchange failed for {}:{}: {}",
                    self.settings.provider, entry.user_id, err
                );
                Error::from(AuthError::TokenExchangeFailed(err.to_string()))
            })?;

        let record = self.record_from_response(&entry.user_id, response, None);
        let record = self.repository.upsert(record).await?;
        info!(
            "[TokenStore] Stored token for {}:{} (expires {})",
            self.settings.provider, entry.user_id, record.expires_at
        );
        Ok(record)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Token access
    // ─────────────────────────────────────────────────────────────────────────

    /// Current usable token for `user_id`, refreshing when the stored one is
    /// inside the expiry safety margin.
    ///
    /// Returns `None` when no token exists or the refresh token is dead; the
    /// stale record is deleted in the latter case so callers are never handed
    /// a token known to be invalid.
    pub async fn get_valid_token(&self, user_id: &str) -> Result<Option<TokenRecord>> {
        let Some(record) = self.repository.get(&self.settings.provider, user_id).await? else {
            return Ok(None);
        };
        if record.is_fresh(Utc::now(), expiry_margin()) {
            return Ok(Some(record));
        }
        self.refresh_with_lock(user_id).await
    }

    /// Refresh serialized per user through the advisory lock manager.
    ///
    /// Competing callers that lose the lock wait and re-read: when the winner
    /// already refreshed, they return the stored record without spending a
    /// second refresh grant.
    async fn refresh_with_lock(&self, user_id: &str) -> Result<Option<TokenRecord>> {
        let lock_name = format!("token-refresh:{}", user_id);
        for _ in 0..REFRESH_LOCK_ATTEMPTS {
            if let Some(guard) = self.locks.acquire_scoped(&lock_name).await {
                let outcome = self.refresh_locked(user_id).await;
                guard.release().await;
                return outcome;
            }

            tokio::time::sleep(Duration::from_millis(REFRESH_LOCK_RETRY_DELAY_MS)).await;
            match self.repository.get(&self.settings.provider, user_id).await? {
                Some(current) if current.is_fresh(Utc::now(), expiry_margin()) => {
                    debug!(
                        "[TokenStore] {}:{} refreshed by a competing holder",
                        self.settings.provider, user_id
                    );
                    return Ok(Some(current));
                }
                Some(_) => {}
                // The competing holder hit a dead refresh token and removed
                // the record.
                None => return Ok(None),
            }
        }
        warn!(
            "[TokenStore] Refresh lock for {}:{} stayed contended; yielding without a token",
            self.settings.provider, user_id
        );
        Ok(None)
    }

    async fn refresh_locked(&self, user_id: &str) -> Result<Option<TokenRecord>> {
        // Re-read under the lock: the previous holder may have refreshed or
        // deleted the record while we were waiting.
        let Some(current) = self.repository.get(&self.settings.provider, user_id).await? else {
            return Ok(None);
        };
        if current.is_fresh(Utc::now(), expiry_margin()) {
            return Ok(Some(current));
        }

        let Some(refresh_token) = current.refresh_token.clone() else {
            info!(
                "[TokenStore] {}:{} expired without a refresh token; dropping record",
                self.settings.provider, user_id
            );
            self.repository.delete(&self.settings.provider, user_id).await?;
            return Ok(None);
        };

        match self.transport.refresh(&self.settings, &refresh_token).await {
            Ok(response) => {
                let mut record = self.record_from_response(user_id, response, Some(refresh_token));
                record.created_at = current.created_at;
                let record = self.repository.upsert(record).await?;
                info!(
                    "[TokenStore] Refreshed token for {}:{} (expires {})",
                    self.settings.provider, user_id, record.expires_at
                );
                Ok(Some(record))
            }
            Err(err) => {
                let err = AuthError::RefreshFailed(err.to_string());
                warn!("[TokenStore] {}:{}: {}", self.settings.provider, user_id, err);
                // A rejected refresh token never recovers; drop the record so
                // the next call reports None instead of retrying it forever.
                self.repository.delete(&self.settings.provider, user_id).await?;
                Ok(None)
            }
        }
    }

    /// Best-effort remote revocation followed by an unconditional local
    /// delete.
    pub async fn revoke_token(&self, user_id: &str) -> Result<()> {
        if let Some(record) = self.repository.get(&self.settings.provider, user_id).await? {
            match self.transport.revoke(&self.settings, &record.access_token).await {
                Ok(()) => debug!(
                    "[TokenStore] Revoked remote token for {}:{}",
                    self.settings.provider, user_id
                ),
                Err(err) => warn!(
                    "[TokenStore] Remote revocation failed for {}:{}: {} (continuing)",
                    self.settings.provider, user_id, err
                ),
            }
        }
        self.delete_token(user_id).await
    }

    /// Remove the stored record without touching the provider.
    pub async fn delete_token(&self, user_id: &str) -> Result<()> {
        let removed = self.repository.delete(&self.settings.provider, user_id).await?;
        if removed > 0 {
            info!(
                "[TokenStore] Deleted token for {}:{}",
                self.settings.provider, user_id
            );
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Pending-state sweep
    // ─────────────────────────────────────────────────────────────────────────

    /// Start the periodic sweep that drops expired pending authorizations.
    /// No-op when already running.
    pub async fn start_state_sweep(self: &Arc<Self>) {
        let mut slot = self.sweep_task.lock().await;
        if slot.is_some() {
            return;
        }
        let pending = Arc::clone(&self.pending);
        let provider = self.settings.provider.clone();
        let handle = tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(Duration::from_secs(STATE_SWEEP_INTERVAL_SECS));
            loop {
                ticker.tick().await;
                let cutoff = Utc::now() - ChronoDuration::seconds(PENDING_STATE_TTL_SECS);
                let mut map = pending.lock().await;
                let before = map.len();
                map.retain(|_, entry| entry.created_at > cutoff);
                let dropped = before - map.len();
                if dropped > 0 {
                    debug!(
                        "[TokenStore] Swept {} expired authorization state(s) for {}",
                        dropped, provider
                    );
                }
            }
        });
        *slot = Some(handle);
    }

    /// Abort the sweep task. Part of process shutdown.
    pub async fn stop_state_sweep(&self) {
        if let Some(handle) = self.sweep_task.lock().await.take() {
            handle.abort();
        }
    }

    fn record_from_response(
        &self,
        user_id: &str,
        response: TokenResponse,
        prior_refresh_token: Option<String>,
    ) -> TokenRecord {
        let now = Utc::now();
        let ttl = response.expires_in.unwrap_or(DEFAULT_TOKEN_TTL_SECS);
        TokenRecord {
            provider: self.settings.provider.clone(),
            user_id: user_id.to_string(),
            access_token: response.access_token,
            // Providers that do not rotate refresh tokens omit the field on
            // refresh; keep the one we already have.
            refresh_token: response.refresh_token.or(prior_refresh_token),
            token_type: response.token_type.unwrap_or_else(|| "Bearer".to_string()),
            expires_at: now + ChronoDuration::seconds(ttl),
            scope: response.scope,
            created_at: now,
            updated_at: now,
        }
    }

    #[cfg(test)]
    pub(crate) async fn pending_state_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    #[cfg(test)]
    pub(crate) async fn backdate_pending_state(&self, state: &str, age_secs: i64) {
        if let Some(entry) = self.pending.lock().await.get_mut(state) {
            entry.created_at = Utc::now() - ChronoDuration::seconds(age_secs);
        }
    }

    #[cfg(test)]
    pub(crate) async fn sweep_pending_once(&self) {
        let cutoff = Utc::now() - ChronoDuration::seconds(PENDING_STATE_TTL_SECS);
        self.pending
            .lock()
            .await
            .retain(|_, entry| entry.created_at > cutoff);
    }
}

fn expiry_margin() -> ChronoDuration {
    ChronoDuration::seconds(EXPIRY_SAFETY_MARGIN_SECS)
}

/// 32 random bytes, base64url without padding, per RFC 7636.
fn generate_code_verifier() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// S256 challenge for a verifier.
fn code_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}
